//! On-chain account layouts for wallets and guardians.
//!
//! Both records start with an 8-byte account discriminator followed by
//! little-endian fields.

use serde::{Deserialize, Serialize};

use super::instruction::account_discriminator;
use super::{ByteReader, put_length_prefixed};
use crate::address::Pubkey;
use crate::codec::COMPRESSED_KEY_LEN;
use crate::error::{WalletError, WalletResult};

/// Longest guardian display name, in bytes.
pub const MAX_GUARDIAN_NAME_LEN: usize = 32;
/// Highest threshold the wallet program accepts.
pub const MAX_THRESHOLD: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Wallet,
    Guardian,
}

impl AccountKind {
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Wallet => "MultisigWallet",
            Self::Guardian => "Guardian",
        }
    }

    pub fn discriminator(self) -> [u8; 8] {
        account_discriminator(self.type_name())
    }
}

fn check_discriminator(reader: &mut ByteReader<'_>, kind: AccountKind) -> WalletResult<()> {
    let tag: [u8; 8] = reader.array()?;
    if tag != kind.discriminator() {
        return Err(WalletError::Deserialization(format!(
            "account is not a {}",
            kind.type_name()
        )));
    }
    Ok(())
}

/// The multisig root account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub threshold: u8,
    pub guardian_count: u8,
    pub recovery_nonce: u64,
    pub bump: u8,
    pub transaction_nonce: u64,
    pub last_transaction_timestamp: i64,
}

impl WalletAccount {
    pub const LEN: usize = 8 + 1 + 1 + 8 + 1 + 8 + 8;

    pub fn decode(data: &[u8]) -> WalletResult<Self> {
        let mut reader = ByteReader::new(data, "wallet account");
        check_discriminator(&mut reader, AccountKind::Wallet)?;
        // Allocations may be padded past the fields; trailing bytes are ignored.
        Ok(Self {
            threshold: reader.u8()?,
            guardian_count: reader.u8()?,
            recovery_nonce: reader.u64()?,
            bump: reader.u8()?,
            transaction_nonce: reader.u64()?,
            last_transaction_timestamp: reader.i64()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::LEN);
        data.extend_from_slice(&AccountKind::Wallet.discriminator());
        data.push(self.threshold);
        data.push(self.guardian_count);
        data.extend_from_slice(&self.recovery_nonce.to_le_bytes());
        data.push(self.bump);
        data.extend_from_slice(&self.transaction_nonce.to_le_bytes());
        data.extend_from_slice(&self.last_transaction_timestamp.to_le_bytes());
        data
    }

    /// The only nonce the program will accept next.
    pub fn next_nonce(&self) -> u64 {
        self.transaction_nonce.saturating_add(1)
    }
}

/// One authorized key on a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianAccount {
    pub wallet: Pubkey,
    pub guardian_id: u64,
    pub name: String,
    pub is_active: bool,
    pub recovery_hash: [u8; 32],
    pub is_owner: bool,
    pub public_key: Option<[u8; COMPRESSED_KEY_LEN]>,
    pub bump: u8,
}

impl GuardianAccount {
    pub fn decode(data: &[u8]) -> WalletResult<Self> {
        let mut reader = ByteReader::new(data, "guardian account");
        check_discriminator(&mut reader, AccountKind::Guardian)?;

        let wallet = reader.pubkey()?;
        let guardian_id = reader.u64()?;
        let name_bytes = reader.length_prefixed()?;
        if name_bytes.len() > MAX_GUARDIAN_NAME_LEN {
            return Err(WalletError::Deserialization(format!(
                "guardian name of {} bytes exceeds {MAX_GUARDIAN_NAME_LEN}",
                name_bytes.len()
            )));
        }
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| WalletError::Deserialization(format!("guardian name: {e}")))?;
        let is_active = reader.bool()?;
        let recovery_hash = reader.array()?;
        let is_owner = reader.bool()?;
        let public_key = if reader.bool()? {
            Some(reader.array()?)
        } else {
            None
        };
        let bump = reader.u8()?;

        Ok(Self {
            wallet,
            guardian_id,
            name,
            is_active,
            recovery_hash,
            is_owner,
            public_key,
            bump,
        })
    }

    pub fn encode(&self) -> WalletResult<Vec<u8>> {
        let mut data = AccountKind::Guardian.discriminator().to_vec();
        data.extend_from_slice(self.wallet.as_ref());
        data.extend_from_slice(&self.guardian_id.to_le_bytes());
        put_length_prefixed(&mut data, self.name.as_bytes())?;
        data.push(u8::from(self.is_active));
        data.extend_from_slice(&self.recovery_hash);
        data.push(u8::from(self.is_owner));
        data.push(u8::from(self.public_key.is_some()));
        if let Some(key) = &self.public_key {
            data.extend_from_slice(key);
        }
        data.push(self.bump);
        Ok(data)
    }
}
