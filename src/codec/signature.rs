//! ECDSA-P256 signature handling: DER to raw `r‖s`, low-S canonicalization.

use num_bigint::BigUint;
use num_traits::Zero;
use p256::ecdsa::Signature;

use super::to_be_32;
use crate::error::{WalletError, WalletResult};

pub const RAW_SIGNATURE_LEN: usize = 64;

/// Order `n` of the P-256 group, big-endian.
pub const P256_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xBC, 0xE6, 0xFA, 0xAD, 0xA7, 0x17, 0x9E, 0x84, 0xF3, 0xB9, 0xCA, 0xC2, 0xFC, 0x63, 0x25, 0x51,
];

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;

fn malformed(reason: impl Into<String>) -> WalletError {
    WalletError::MalformedSignature(reason.into())
}

/// Read one `0x02 len bytes` INTEGER starting at `offset`.
fn read_integer<'a>(
    der: &'a [u8],
    offset: usize,
    name: &str,
) -> WalletResult<(&'a [u8], usize)> {
    match der.get(offset) {
        Some(&INTEGER_TAG) => {}
        Some(tag) => {
            return Err(malformed(format!(
                "expected INTEGER tag 0x02 for {name}, got 0x{tag:02x}"
            )));
        }
        None => return Err(malformed(format!("truncated before {name}"))),
    }

    let len = *der
        .get(offset + 1)
        .ok_or_else(|| malformed(format!("missing length for {name}")))? as usize;
    let start = offset + 2;
    let value = der
        .get(start..start + len)
        .ok_or_else(|| malformed(format!("{name} length {len} overruns signature")))?;
    if value.is_empty() {
        return Err(malformed(format!("{name} is empty")));
    }

    Ok((value, start + len))
}

/// Fit a DER integer into 32 bytes: strip sign padding, left-pad short values.
fn fit_component(value: &[u8], name: &str) -> WalletResult<[u8; 32]> {
    let mut trimmed = value;
    while trimmed.len() > 32 && trimmed[0] == 0 {
        trimmed = &trimmed[1..];
    }
    if trimmed.len() > 32 {
        return Err(malformed(format!(
            "{name} is {} bytes, expected at most 32",
            trimmed.len()
        )));
    }

    let mut out = [0u8; 32];
    out[32 - trimmed.len()..].copy_from_slice(trimmed);
    Ok(out)
}

/// Parse an ASN.1 DER ECDSA signature (`0x30 len 0x02 rlen r 0x02 slen s`)
/// into the raw 64-byte `r‖s` form.
pub fn der_to_raw(der: &[u8]) -> WalletResult<[u8; RAW_SIGNATURE_LEN]> {
    match der.first() {
        Some(&SEQUENCE_TAG) => {}
        Some(tag) => {
            return Err(malformed(format!(
                "expected SEQUENCE tag 0x30, got 0x{tag:02x}"
            )));
        }
        None => return Err(malformed("empty signature")),
    }

    // P-256 signatures are at most 72 bytes, so the sequence length is
    // normally short-form; accept the one-byte long form too.
    let (body_start, body_len) = match (der.get(1), der.get(2)) {
        (Some(0x81), Some(len)) => (3, usize::from(*len)),
        (Some(0x81), None) => return Err(malformed("missing long-form sequence length")),
        (Some(len), _) if len & 0x80 == 0 => (2, usize::from(*len)),
        (Some(len), _) => return Err(malformed(format!("unsupported length byte 0x{len:02x}"))),
        (None, _) => return Err(malformed("missing sequence length")),
    };
    if body_start + body_len != der.len() {
        return Err(malformed(format!(
            "sequence declares {body_len} bytes, signature carries {}",
            der.len() - body_start
        )));
    }

    let (r, next) = read_integer(der, body_start, "r")?;
    let (s, end) = read_integer(der, next, "s")?;
    if end != der.len() {
        return Err(malformed(format!("{} trailing bytes after s", der.len() - end)));
    }

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    raw[..32].copy_from_slice(&fit_component(r, "r")?);
    raw[32..].copy_from_slice(&fit_component(s, "s")?);
    Ok(raw)
}

/// Replace `s` with `order - s` when `s > order / 2`.
///
/// Fails for `s == 0` or `s >= order`, which no verifier accepts.
pub fn normalize_low_s(
    signature: &[u8; RAW_SIGNATURE_LEN],
    curve_order: &BigUint,
) -> WalletResult<[u8; RAW_SIGNATURE_LEN]> {
    let s = BigUint::from_bytes_be(&signature[32..]);
    if s.is_zero() || &s >= curve_order {
        return Err(malformed("s is outside [1, n)"));
    }

    let half_order = curve_order >> 1u32;
    if s <= half_order {
        return Ok(*signature);
    }

    let mut normalized = *signature;
    normalized[32..].copy_from_slice(&to_be_32(&(curve_order - &s))?);
    Ok(normalized)
}

/// Whether the `s` half of a raw signature is already canonical for P-256.
pub fn is_low_s(signature: &[u8; RAW_SIGNATURE_LEN]) -> bool {
    let order = BigUint::from_bytes_be(&P256_ORDER);
    BigUint::from_bytes_be(&signature[32..]) <= (order >> 1u32)
}

/// DER assertion signature to the low-S raw form the verifier checks.
pub fn prepare_passkey_signature(der: &[u8]) -> WalletResult<[u8; RAW_SIGNATURE_LEN]> {
    let raw = der_to_raw(der)?;
    let signature =
        Signature::from_slice(&raw).map_err(|_| malformed("r or s is outside [1, n)"))?;
    let canonical = signature.normalize_s().unwrap_or(signature);

    let mut out = [0u8; RAW_SIGNATURE_LEN];
    out.copy_from_slice(&canonical.to_bytes());
    Ok(out)
}


#[cfg(test)]
mod proptest_low_s {
    use proptest::prelude::*;

    use super::*;

    fn order() -> BigUint {
        BigUint::from_bytes_be(&P256_ORDER)
    }

    /// Scalars uniformly folded into `[1, n)`.
    fn arb_scalar() -> impl Strategy<Value = [u8; 32]> {
        prop::array::uniform32(any::<u8>()).prop_map(|seed| {
            let value = BigUint::from_bytes_be(&seed) % (order() - 1u32) + 1u32;
            to_be_32(&value).expect("reduced below n")
        })
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(r in arb_scalar(), s in arb_scalar()) {
            let mut sig = [0u8; RAW_SIGNATURE_LEN];
            sig[..32].copy_from_slice(&r);
            sig[32..].copy_from_slice(&s);

            let once = normalize_low_s(&sig, &order()).unwrap();
            let twice = normalize_low_s(&once, &order()).unwrap();
            prop_assert_eq!(once, twice);
            prop_assert!(is_low_s(&once));
            prop_assert_eq!(&once[..32], &r[..]);
        }

        #[test]
        fn normalize_agrees_with_p256(r in arb_scalar(), s in arb_scalar()) {
            let mut sig = [0u8; RAW_SIGNATURE_LEN];
            sig[..32].copy_from_slice(&r);
            sig[32..].copy_from_slice(&s);

            let parsed = Signature::from_slice(&sig).unwrap();
            let expected = parsed.normalize_s().unwrap_or(parsed).to_bytes();
            let normalized = normalize_low_s(&sig, &order()).unwrap();
            prop_assert_eq!(&normalized[..], expected.as_slice());
        }
    }
}
