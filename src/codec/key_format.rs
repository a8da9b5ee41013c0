//! SEC1 encodings of P-256 passkey public keys.
//!
//! Authenticators hand out uncompressed keys (`0x04‖x‖y`); the verifier and
//! the guardian account store the 33-byte compressed form (`0x02|0x03‖x`).

use p256::PublicKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{WalletError, WalletResult};

pub const UNCOMPRESSED_KEY_LEN: usize = 65;
pub const COMPRESSED_KEY_LEN: usize = 33;

fn invalid(reason: impl Into<String>) -> WalletError {
    WalletError::InvalidKeyFormat(reason.into())
}

fn check_shape(bytes: &[u8], len: usize, prefixes: &[u8]) -> WalletResult<()> {
    if bytes.len() != len {
        return Err(invalid(format!("expected {len} bytes, got {}", bytes.len())));
    }
    if !prefixes.contains(&bytes[0]) {
        return Err(invalid(format!("invalid SEC1 prefix: 0x{:02x}", bytes[0])));
    }
    Ok(())
}

/// Parse and encode a SEC1 point; only points on P-256 parse.
fn reencode<const N: usize>(bytes: &[u8], compress: bool) -> WalletResult<[u8; N]> {
    let key = PublicKey::from_sec1_bytes(bytes).map_err(|_| invalid("point is not on P-256"))?;
    let encoded = key.to_encoded_point(compress);

    let mut out = [0u8; N];
    if encoded.as_bytes().len() != N {
        return Err(invalid(format!(
            "SEC1 encoding is {} bytes, expected {N}",
            encoded.as_bytes().len()
        )));
    }
    out.copy_from_slice(encoded.as_bytes());
    Ok(out)
}

/// Compress an uncompressed SEC1 point to `prefix‖x`.
///
/// The prefix is 0x02 for even `y` and 0x03 for odd `y`.
pub fn compress_point(uncompressed: &[u8]) -> WalletResult<[u8; COMPRESSED_KEY_LEN]> {
    check_shape(uncompressed, UNCOMPRESSED_KEY_LEN, &[0x04])?;
    reencode(uncompressed, true)
}

/// Recover `0x04‖x‖y` from a compressed P-256 point. Fails if `x` is not on
/// the curve.
pub fn decompress_point(compressed: &[u8]) -> WalletResult<[u8; UNCOMPRESSED_KEY_LEN]> {
    check_shape(compressed, COMPRESSED_KEY_LEN, &[0x02, 0x03])?;
    reencode(compressed, false)
}

/// Parse a hex-encoded compressed key as stored by the staging collections.
///
/// Accepts either the 33-byte compressed form or a 65-byte uncompressed key,
/// which is compressed on the way in.
pub fn compressed_key_from_hex(key_hex: &str) -> WalletResult<[u8; COMPRESSED_KEY_LEN]> {
    let bytes = hex::decode(key_hex.trim().trim_start_matches("0x"))
        .map_err(|e| invalid(format!("invalid public key hex: {e}")))?;

    match bytes.len() {
        COMPRESSED_KEY_LEN => {
            if !matches!(bytes[0], 0x02 | 0x03) {
                return Err(invalid(format!(
                    "invalid compressed prefix: 0x{:02x}",
                    bytes[0]
                )));
            }
            let mut out = [0u8; COMPRESSED_KEY_LEN];
            out.copy_from_slice(&bytes);
            Ok(out)
        }
        UNCOMPRESSED_KEY_LEN => compress_point(&bytes),
        other => Err(invalid(format!(
            "expected {COMPRESSED_KEY_LEN} or {UNCOMPRESSED_KEY_LEN} bytes, got {other}"
        ))),
    }
}
