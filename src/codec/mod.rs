//! Byte-format conversions between passkey authenticators and the ledger's
//! P-256 verifier.
//!
//! Every conversion fails closed: a malformed signature or key is an error,
//! never a substituted placeholder.

pub mod digest;
pub mod key_format;
pub mod signature;

use num_bigint::BigUint;

use crate::error::{WalletError, WalletResult};

pub use digest::{
    MIN_RECOVERY_PHRASE_CHARS, RECOVERY_HASH_LEN, digest_message, hash_recovery_phrase, short_hex,
    webauthn_signed_message,
};
pub use key_format::{
    COMPRESSED_KEY_LEN, UNCOMPRESSED_KEY_LEN, compress_point, compressed_key_from_hex,
    decompress_point,
};
pub use signature::{
    P256_ORDER, RAW_SIGNATURE_LEN, der_to_raw, is_low_s, normalize_low_s,
    prepare_passkey_signature,
};

/// Left-pad a big-endian integer to exactly 32 bytes.
pub(crate) fn to_be_32(value: &BigUint) -> WalletResult<[u8; 32]> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(WalletError::Internal(format!(
            "Field element of {} bytes does not fit 32",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
