//! Digests: recovery phrase hashing, message challenges, WebAuthn payloads.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};

/// Minimum recovery phrase length, counted in characters.
pub const MIN_RECOVERY_PHRASE_CHARS: usize = 8;
pub const RECOVERY_HASH_LEN: usize = 32;

/// Hash a recovery phrase into the 32-byte value stored on guardian accounts.
///
/// The first 32 UTF-8 bytes are zero-padded to 32 and hashed with SHA-256.
/// Bytes past 32 do not contribute.
pub fn hash_recovery_phrase(phrase: &str) -> WalletResult<[u8; RECOVERY_HASH_LEN]> {
    let chars = phrase.chars().count();
    if chars < MIN_RECOVERY_PHRASE_CHARS {
        return Err(WalletError::RecoveryPhraseTooShort {
            min: MIN_RECOVERY_PHRASE_CHARS,
            actual: chars,
        });
    }

    let bytes = phrase.as_bytes();
    let take = bytes.len().min(RECOVERY_HASH_LEN);
    let mut padded = Zeroizing::new([0u8; RECOVERY_HASH_LEN]);
    padded[..take].copy_from_slice(&bytes[..take]);

    Ok(Sha256::digest(padded.as_slice()).into())
}

/// SHA-256 of a canonical message; the authenticator challenge and the
/// message hash carried by the guarded instruction.
pub fn digest_message(message: &str) -> [u8; 32] {
    Sha256::digest(message.as_bytes()).into()
}

/// Bytes a WebAuthn assertion signs: `authenticatorData ‖ SHA256(clientDataJSON)`.
pub fn webauthn_signed_message(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(authenticator_data.len() + 32);
    message.extend_from_slice(authenticator_data);
    message.extend_from_slice(&Sha256::digest(client_data_json));
    message
}

/// First bytes of a value as hex, for log fields.
pub fn short_hex(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(6)];
    if bytes.len() > head.len() {
        format!("{}…", hex::encode(head))
    } else {
        hex::encode(head)
    }
}
