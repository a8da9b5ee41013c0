//! Staging records shared by the owner device, the invited device and the
//! staging service.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{self, Pubkey};
use crate::codec::{self, COMPRESSED_KEY_LEN};
use crate::error::{WalletError, WalletResult};

/// Invitation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    /// Created by the owner, waiting for the invited device.
    Pending,
    /// Registration material staged, waiting for on-chain installation.
    Ready,
    /// Installed on-chain; the records are erased right after.
    Completed,
}

impl std::fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Invitation to add a guardian to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    pub invite_code: String,
    #[serde(with = "address::base58")]
    pub wallet: Pubkey,
    /// Proposed id; reassigned if another device claims it first.
    pub guardian_id: u64,
    pub owner_id: String,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl InviteRecord {
    pub fn new(invite_code: String, wallet: Pubkey, guardian_id: u64, owner_id: String) -> Self {
        Self {
            invite_code,
            wallet,
            guardian_id,
            owner_id,
            status: InviteStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            transaction_id: None,
        }
    }

    /// Fail unless the invite is in `expected`.
    pub fn ensure_status(&self, expected: InviteStatus) -> WalletResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(WalletError::InvalidInviteState {
                invite_code: self.invite_code.clone(),
                expected: expected.to_string(),
                actual: self.status.to_string(),
            })
        }
    }

    /// Older than `ttl` and still pending.
    pub fn is_expired_pending(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == InviteStatus::Pending && now - self.created_at > ttl
    }
}

/// Output of a passkey creation ceremony on the invited device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRegistration {
    /// Opaque authenticator-chosen identifier.
    pub credential_id: Vec<u8>,
    /// Uncompressed SEC1 P-256 key, `0x04‖x‖y`.
    pub public_key: Vec<u8>,
}

/// Registration material staged under an invite code.
///
/// Only hashed and compressed values are staged; the recovery phrase never
/// leaves the invited device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRegistration {
    pub invite_code: String,
    pub status: InviteStatus,
    /// base64url (no padding) credential id.
    pub credential_id: String,
    /// Hex compressed public key.
    pub public_key: String,
    pub name: String,
    /// Hex SHA-256 of the padded recovery phrase.
    pub recovery_hash: String,
    pub submitted_at: DateTime<Utc>,
}

impl StagedRegistration {
    pub fn public_key_bytes(&self) -> WalletResult<[u8; COMPRESSED_KEY_LEN]> {
        codec::compressed_key_from_hex(&self.public_key)
    }

    pub fn recovery_hash_bytes(&self) -> WalletResult<[u8; 32]> {
        decode_hash(&self.recovery_hash)
    }

    pub fn credential_id_bytes(&self) -> WalletResult<Vec<u8>> {
        decode_credential_id(&self.credential_id)
    }
}

/// Which wallet and guardian a credential signs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
    /// base64url (no padding) credential id.
    pub credential_id: String,
    #[serde(with = "address::base58")]
    pub wallet: Pubkey,
    pub guardian_id: u64,
    /// Hex compressed public key.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl CredentialBinding {
    pub fn new(
        credential_id: &[u8],
        wallet: Pubkey,
        guardian_id: u64,
        public_key: &[u8; COMPRESSED_KEY_LEN],
    ) -> Self {
        Self {
            credential_id: encode_credential_id(credential_id),
            wallet,
            guardian_id,
            public_key: hex::encode(public_key),
            created_at: Utc::now(),
        }
    }

    pub fn public_key_bytes(&self) -> WalletResult<[u8; COMPRESSED_KEY_LEN]> {
        codec::compressed_key_from_hex(&self.public_key)
    }
}

/// Field filters for invite queries; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "address::base58::option"
    )]
    pub wallet: Option<Pubkey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InviteStatus>,
}

impl InviteQuery {
    pub fn matches(&self, invite: &InviteRecord) -> bool {
        self.owner_id.as_ref().is_none_or(|owner| *owner == invite.owner_id)
            && self.wallet.is_none_or(|wallet| wallet == invite.wallet)
            && self.status.is_none_or(|status| status == invite.status)
    }
}

pub fn encode_credential_id(credential_id: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(credential_id)
}

pub fn decode_credential_id(encoded: &str) -> WalletResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| WalletError::Validation(format!("credential id is not base64url: {e}")))
}

fn decode_hash(hash_hex: &str) -> WalletResult<[u8; 32]> {
    let bytes = hex::decode(hash_hex)
        .map_err(|e| WalletError::Deserialization(format!("recovery hash hex: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        WalletError::Deserialization(format!("recovery hash must be 32 bytes, got {}", bytes.len()))
    })
}
