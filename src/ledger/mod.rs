//! Ledger wire model and RPC access.
//!
//! Instructions are encoded exactly as the wallet program and the secp256r1
//! precompile expect them, compiled into legacy messages and signed by the
//! fee payer. [`LedgerClient`] is the seam to the network.

pub mod accounts;
pub mod client;
pub mod instruction;
pub mod message;
pub mod rejection;

pub use accounts::{AccountKind, GuardianAccount, WalletAccount};
pub use client::{AccountInfo, LedgerClient, RpcLedgerClient, SignatureStatus};
pub use instruction::{
    AccountMeta, Instruction, Secp256r1Verify, WalletInstruction, account_discriminator,
    instruction_discriminator, secp256r1_verify_instruction,
};
pub use message::{
    Hash, Message, MessageExt, Signature, Transaction, TransactionExt, compile_message,
    sign_message, transaction_from_base64,
};
pub use rejection::{RejectionContext, classify_rejection};

use crate::address::Pubkey;
use crate::error::{WalletError, WalletResult};

/// Cursor over little-endian encoded program data.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], what: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            what,
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> WalletResult<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(WalletError::Deserialization(format!(
                "{}: need {len} bytes at offset {}, have {}",
                self.what,
                self.offset,
                self.data.len()
            )));
        };
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> WalletResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> WalletResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn bool(&mut self) -> WalletResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WalletError::Deserialization(format!(
                "{}: invalid bool byte {other}",
                self.what
            ))),
        }
    }

    pub(crate) fn u16(&mut self) -> WalletResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> WalletResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> WalletResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> WalletResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn pubkey(&mut self) -> WalletResult<Pubkey> {
        Ok(Pubkey::new_from_array(self.array()?))
    }

    /// `u32 LE` length followed by that many bytes.
    pub(crate) fn length_prefixed(&mut self) -> WalletResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub(crate) fn finish(self) -> WalletResult<()> {
        if self.offset == self.data.len() {
            Ok(())
        } else {
            Err(WalletError::Deserialization(format!(
                "{}: {} trailing bytes",
                self.what,
                self.data.len() - self.offset
            )))
        }
    }
}

/// Append a `u32 LE` length prefix and the bytes.
pub(crate) fn put_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> WalletResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| WalletError::Serialization("field longer than u32::MAX".to_string()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}
