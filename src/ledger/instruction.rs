//! Instruction encodings for the wallet program and the secp256r1 precompile.

use sha2::{Digest, Sha256};
pub use solana_instruction::{AccountMeta, Instruction};

use super::{ByteReader, put_length_prefixed};
use crate::address::{Pubkey, ids};
use crate::codec::{COMPRESSED_KEY_LEN, RAW_SIGNATURE_LEN};
use crate::error::{WalletError, WalletResult};

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// `SHA256("global:<name>")[..8]`
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator("global", name)
}

/// `SHA256("account:<Name>")[..8]`
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator("account", name)
}

/// Instruction data understood by the wallet program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletInstruction {
    InitializeWallet {
        threshold: u8,
        recovery_hash: [u8; 32],
        /// The 24-byte folded credential seed the wallet address derives from.
        credential_seed: Vec<u8>,
    },
    AddGuardian {
        guardian_id: u64,
        name: String,
        recovery_hash: [u8; 32],
        is_owner: bool,
        public_key: Option<[u8; COMPRESSED_KEY_LEN]>,
    },
    ExecuteTransfer {
        destination: Pubkey,
        amount: u64,
        nonce: u64,
        timestamp: i64,
        message_hash: [u8; 32],
    },
}

impl WalletInstruction {
    pub const INITIALIZE_WALLET: &'static str = "initialize_wallet";
    pub const ADD_GUARDIAN: &'static str = "add_guardian";
    pub const EXECUTE_TRANSFER: &'static str = "execute_transfer";

    pub fn name(&self) -> &'static str {
        match self {
            Self::InitializeWallet { .. } => Self::INITIALIZE_WALLET,
            Self::AddGuardian { .. } => Self::ADD_GUARDIAN,
            Self::ExecuteTransfer { .. } => Self::EXECUTE_TRANSFER,
        }
    }

    /// `discriminator(8) ‖ fields`, integers little-endian, strings u32-length-prefixed.
    pub fn encode(&self) -> WalletResult<Vec<u8>> {
        let mut data = instruction_discriminator(self.name()).to_vec();
        match self {
            Self::InitializeWallet {
                threshold,
                recovery_hash,
                credential_seed,
            } => {
                data.push(*threshold);
                data.extend_from_slice(recovery_hash);
                put_length_prefixed(&mut data, credential_seed)?;
            }
            Self::AddGuardian {
                guardian_id,
                name,
                recovery_hash,
                is_owner,
                public_key,
            } => {
                data.extend_from_slice(&guardian_id.to_le_bytes());
                put_length_prefixed(&mut data, name.as_bytes())?;
                data.extend_from_slice(recovery_hash);
                data.push(u8::from(*is_owner));
                data.push(u8::from(public_key.is_some()));
                if let Some(key) = public_key {
                    data.extend_from_slice(key);
                }
            }
            Self::ExecuteTransfer {
                destination,
                amount,
                nonce,
                timestamp,
                message_hash,
            } => {
                data.extend_from_slice(destination.as_ref());
                data.extend_from_slice(&amount.to_le_bytes());
                data.extend_from_slice(&nonce.to_le_bytes());
                data.extend_from_slice(&timestamp.to_le_bytes());
                data.extend_from_slice(message_hash);
            }
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> WalletResult<Self> {
        let mut reader = ByteReader::new(data, "wallet instruction");
        let tag: [u8; 8] = reader.array()?;

        let decoded = if tag == instruction_discriminator(Self::INITIALIZE_WALLET) {
            Self::InitializeWallet {
                threshold: reader.u8()?,
                recovery_hash: reader.array()?,
                credential_seed: reader.length_prefixed()?.to_vec(),
            }
        } else if tag == instruction_discriminator(Self::ADD_GUARDIAN) {
            let guardian_id = reader.u64()?;
            let name = String::from_utf8(reader.length_prefixed()?.to_vec()).map_err(|e| {
                WalletError::Deserialization(format!("guardian name is not UTF-8: {e}"))
            })?;
            let recovery_hash = reader.array()?;
            let is_owner = reader.bool()?;
            let public_key = if reader.bool()? {
                Some(reader.array()?)
            } else {
                None
            };
            Self::AddGuardian {
                guardian_id,
                name,
                recovery_hash,
                is_owner,
                public_key,
            }
        } else if tag == instruction_discriminator(Self::EXECUTE_TRANSFER) {
            Self::ExecuteTransfer {
                destination: reader.pubkey()?,
                amount: reader.u64()?,
                nonce: reader.u64()?,
                timestamp: reader.i64()?,
                message_hash: reader.array()?,
            }
        } else {
            return Err(WalletError::Deserialization(format!(
                "unknown instruction discriminator {}",
                hex::encode(tag)
            )));
        };

        reader.finish()?;
        Ok(decoded)
    }
}

/// Instruction index meaning "this instruction's own data".
const CURRENT_INSTRUCTION: u16 = u16::MAX;
const SECP256R1_HEADER_LEN: usize = 2;
const SECP256R1_OFFSETS_LEN: usize = 14;
const SECP256R1_DATA_START: usize = SECP256R1_HEADER_LEN + SECP256R1_OFFSETS_LEN;

/// One signature checked by the secp256r1 precompile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secp256r1Verify {
    pub public_key: [u8; COMPRESSED_KEY_LEN],
    pub signature: [u8; RAW_SIGNATURE_LEN],
    pub message: Vec<u8>,
}

impl Secp256r1Verify {
    /// `num_signatures(1) ‖ padding(1) ‖ offsets(14) ‖ pubkey(33) ‖ signature(64) ‖ message`
    pub fn encode(&self) -> WalletResult<Vec<u8>> {
        let public_key_offset = SECP256R1_DATA_START;
        let signature_offset = public_key_offset + COMPRESSED_KEY_LEN;
        let message_offset = signature_offset + RAW_SIGNATURE_LEN;

        let to_u16 = |value: usize| {
            u16::try_from(value).map_err(|_| {
                WalletError::Validation(format!(
                    "secp256r1 payload too large: offset {value} exceeds u16"
                ))
            })
        };

        let mut data = Vec::with_capacity(message_offset + self.message.len());
        data.push(1);
        data.push(0);
        for field in [
            to_u16(signature_offset)?,
            CURRENT_INSTRUCTION,
            to_u16(public_key_offset)?,
            CURRENT_INSTRUCTION,
            to_u16(message_offset)?,
            to_u16(self.message.len())?,
            CURRENT_INSTRUCTION,
        ] {
            data.extend_from_slice(&field.to_le_bytes());
        }
        data.extend_from_slice(&self.public_key);
        data.extend_from_slice(&self.signature);
        data.extend_from_slice(&self.message);
        Ok(data)
    }

    /// Parse single-signature precompile data that references only itself.
    pub fn decode(data: &[u8]) -> WalletResult<Self> {
        let mut reader = ByteReader::new(data, "secp256r1 instruction");
        let count = reader.u8()?;
        if count != 1 {
            return Err(WalletError::Deserialization(format!(
                "expected one secp256r1 signature, got {count}"
            )));
        }
        let _padding = reader.u8()?;

        let signature_offset = reader.u16()? as usize;
        let signature_ix = reader.u16()?;
        let public_key_offset = reader.u16()? as usize;
        let public_key_ix = reader.u16()?;
        let message_offset = reader.u16()? as usize;
        let message_size = reader.u16()? as usize;
        let message_ix = reader.u16()?;

        if [signature_ix, public_key_ix, message_ix]
            .iter()
            .any(|ix| *ix != CURRENT_INSTRUCTION)
        {
            return Err(WalletError::Deserialization(
                "secp256r1 offsets must reference the current instruction".to_string(),
            ));
        }

        let slice = |offset: usize, len: usize| {
            data.get(offset..offset + len).ok_or_else(|| {
                WalletError::Deserialization(format!(
                    "secp256r1 field at {offset}+{len} overruns {} bytes",
                    data.len()
                ))
            })
        };

        let mut public_key = [0u8; COMPRESSED_KEY_LEN];
        public_key.copy_from_slice(slice(public_key_offset, COMPRESSED_KEY_LEN)?);
        let mut signature = [0u8; RAW_SIGNATURE_LEN];
        signature.copy_from_slice(slice(signature_offset, RAW_SIGNATURE_LEN)?);
        let message = slice(message_offset, message_size)?.to_vec();

        Ok(Self {
            public_key,
            signature,
            message,
        })
    }
}

/// Precompile instruction asking the runtime to verify `signature` over
/// `message` with `public_key`. It takes no accounts.
pub fn secp256r1_verify_instruction(verify: &Secp256r1Verify) -> WalletResult<Instruction> {
    Ok(Instruction::new_with_bytes(
        ids::SECP256R1_PROGRAM,
        &verify.encode()?,
        Vec::new(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminators_are_distinct() {
        let names = [
            WalletInstruction::INITIALIZE_WALLET,
            WalletInstruction::ADD_GUARDIAN,
            WalletInstruction::EXECUTE_TRANSFER,
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(instruction_discriminator(a), instruction_discriminator(b));
            }
        }
        assert_ne!(
            instruction_discriminator("Guardian"),
            account_discriminator("Guardian")
        );
    }

    #[test]
    fn test_add_guardian_layout() {
        let ix = WalletInstruction::AddGuardian {
            guardian_id: 3,
            name: "laptop".to_string(),
            recovery_hash: [0xEE; 32],
            is_owner: false,
            public_key: Some([0x02; COMPRESSED_KEY_LEN]),
        };
        let data = ix.encode().unwrap();

        assert_eq!(&data[..8], &instruction_discriminator("add_guardian"));
        assert_eq!(&data[8..16], &3u64.to_le_bytes());
        assert_eq!(&data[16..20], &6u32.to_le_bytes());
        assert_eq!(&data[20..26], b"laptop");
        assert_eq!(&data[26..58], &[0xEE; 32]);
        assert_eq!(data[58], 0);
        assert_eq!(data[59], 1);
        assert_eq!(&data[60..], &[0x02; COMPRESSED_KEY_LEN]);

        assert_eq!(WalletInstruction::decode(&data).unwrap(), ix);
    }

    #[test]
    fn test_add_guardian_without_key() {
        let ix = WalletInstruction::AddGuardian {
            guardian_id: 1,
            name: "owner".to_string(),
            recovery_hash: [1; 32],
            is_owner: true,
            public_key: None,
        };
        let data = ix.encode().unwrap();
        assert_eq!(data.len(), 8 + 8 + 4 + 5 + 32 + 1 + 1);
        assert_eq!(*data.last().unwrap(), 0);
    }

    #[test]
    fn test_initialize_layout() {
        let data = WalletInstruction::InitializeWallet {
            threshold: 1,
            recovery_hash: [9; 32],
            credential_seed: vec![7; 24],
        }
        .encode()
        .unwrap();

        assert_eq!(data[8], 1);
        assert_eq!(&data[41..45], &24u32.to_le_bytes());
        assert_eq!(data.len(), 8 + 1 + 32 + 4 + 24);
    }

    #[test]
    fn test_decode_rejects_unknown_and_trailing() {
        assert!(WalletInstruction::decode(&[0u8; 16]).is_err());

        let mut data = WalletInstruction::ExecuteTransfer {
            destination: Pubkey::new_from_array([4; 32]),
            amount: 5,
            nonce: 1,
            timestamp: 1_700_000_000,
            message_hash: [3; 32],
        }
        .encode()
        .unwrap();
        data.push(0);
        assert!(WalletInstruction::decode(&data).is_err());
    }

    #[test]
    fn test_secp256r1_layout() {
        let verify = Secp256r1Verify {
            public_key: [0x03; COMPRESSED_KEY_LEN],
            signature: [0x55; RAW_SIGNATURE_LEN],
            message: b"hello".to_vec(),
        };
        let ix = secp256r1_verify_instruction(&verify).unwrap();
        let data = &ix.data;

        assert_eq!(ix.program_id, ids::SECP256R1_PROGRAM);
        assert!(ix.accounts.is_empty());
        assert_eq!(&data[..2], &[1, 0]);
        // signature_offset, then its instruction index
        assert_eq!(u16::from_le_bytes([data[2], data[3]]), 49);
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), u16::MAX);
        assert_eq!(u16::from_le_bytes([data[6], data[7]]), 16);
        assert_eq!(u16::from_le_bytes([data[10], data[11]]), 113);
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), 5);
        assert_eq!(&data[16..49], &[0x03; COMPRESSED_KEY_LEN]);
        assert_eq!(&data[113..], b"hello");

        assert_eq!(Secp256r1Verify::decode(data).unwrap(), verify);
    }
}
