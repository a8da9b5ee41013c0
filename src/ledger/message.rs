//! Legacy transaction messages: compilation, fee payer signing, wire format.
//!
//! The types are the ledger's own (`solana-message`, `solana-transaction`);
//! this module adds the single-signer flow the wallet needs on top of them.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer, SigningKey};
pub use solana_hash::Hash;
pub use solana_message::compiled_instruction::CompiledInstruction;
pub use solana_message::{Message, MessageHeader};
pub use solana_signature::Signature;
pub use solana_transaction::Transaction;

use super::instruction::{AccountMeta, Instruction};
use crate::address::Pubkey;
use crate::error::{WalletError, WalletResult};

/// Keys a legacy message can index with its `u8` account indices.
const MAX_MESSAGE_ACCOUNTS: usize = u8::MAX as usize + 1;

/// Compile `instructions` for `fee_payer`.
///
/// The fee payer comes first, then writable signers, readonly signers,
/// writable and readonly accounts. Instruction order is preserved.
pub fn compile_message(
    fee_payer: &Pubkey,
    instructions: &[Instruction],
    recent_blockhash: Hash,
) -> WalletResult<Message> {
    let mut keys: Vec<&Pubkey> = std::iter::once(fee_payer)
        .chain(instructions.iter().flat_map(|ix| {
            ix.accounts
                .iter()
                .map(|meta| &meta.pubkey)
                .chain(std::iter::once(&ix.program_id))
        }))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    if keys.len() > MAX_MESSAGE_ACCOUNTS {
        return Err(WalletError::Validation(format!(
            "{} accounts exceed message limit",
            keys.len()
        )));
    }

    Ok(Message::new_with_blockhash(
        instructions,
        Some(fee_payer),
        &recent_blockhash,
    ))
}

/// Sign `message` with the fee payer, the only signer these requests carry.
pub fn sign_message(message: Message, fee_payer: &SigningKey) -> WalletResult<Transaction> {
    let payer = Pubkey::new_from_array(fee_payer.verifying_key().to_bytes());
    if message.fee_payer_key() != Some(&payer) {
        return Err(WalletError::Validation(
            "signing key does not match the message fee payer".to_string(),
        ));
    }
    if message.header.num_required_signatures != 1 {
        return Err(WalletError::Validation(format!(
            "message needs {} signatures; only the fee payer signs",
            message.header.num_required_signatures
        )));
    }

    let signature = fee_payer.sign(&message.serialize());
    let mut transaction = Transaction::new_unsigned(message);
    transaction.signatures = vec![Signature::from(signature.to_bytes())];
    Ok(transaction)
}

pub fn transaction_from_base64(encoded: &str) -> WalletResult<Transaction> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| WalletError::Deserialization(format!("invalid base64 transaction: {e}")))?;
    bincode::deserialize(&bytes)
        .map_err(|e| WalletError::Deserialization(format!("invalid transaction: {e}")))
}

/// Header-derived views of a compiled message.
pub trait MessageExt {
    fn fee_payer_key(&self) -> Option<&Pubkey>;

    /// Writability of the key at `index`, as the header declares it.
    fn declares_writable(&self, index: usize) -> bool;

    /// Expand compiled instructions back into full account metas.
    fn to_instructions(&self) -> WalletResult<Vec<Instruction>>;
}

impl MessageExt for Message {
    fn fee_payer_key(&self) -> Option<&Pubkey> {
        self.account_keys.first()
    }

    fn declares_writable(&self, index: usize) -> bool {
        let signers = usize::from(self.header.num_required_signatures);
        let keys = self.account_keys.len();
        if index < signers {
            index < signers.saturating_sub(usize::from(self.header.num_readonly_signed_accounts))
        } else {
            index < keys.saturating_sub(usize::from(self.header.num_readonly_unsigned_accounts))
        }
    }

    fn to_instructions(&self) -> WalletResult<Vec<Instruction>> {
        let key_at = |index: u8| {
            self.account_keys
                .get(usize::from(index))
                .copied()
                .ok_or_else(|| {
                    WalletError::Deserialization(format!("account index {index} out of range"))
                })
        };

        self.instructions
            .iter()
            .map(|ix| {
                let accounts = ix
                    .accounts
                    .iter()
                    .map(|index| {
                        let pubkey = key_at(*index)?;
                        let i = usize::from(*index);
                        Ok(AccountMeta {
                            pubkey,
                            is_signer: i < usize::from(self.header.num_required_signatures),
                            is_writable: self.declares_writable(i),
                        })
                    })
                    .collect::<WalletResult<Vec<_>>>()?;
                Ok(Instruction {
                    program_id: key_at(ix.program_id_index)?,
                    accounts,
                    data: ix.data.clone(),
                })
            })
            .collect()
    }
}

pub trait TransactionExt {
    /// Base58 of the first signature; the ledger's transaction id.
    fn id(&self) -> Option<String>;

    fn to_base64(&self) -> WalletResult<String>;

    /// Check the fee payer signature over the serialized message.
    fn verify_fee_payer(&self) -> WalletResult<()>;
}

impl TransactionExt for Transaction {
    fn id(&self) -> Option<String> {
        self.signatures.first().map(ToString::to_string)
    }

    fn to_base64(&self) -> WalletResult<String> {
        let bytes = bincode::serialize(self)
            .map_err(|e| WalletError::Serialization(format!("transaction: {e}")))?;
        Ok(BASE64.encode(bytes))
    }

    fn verify_fee_payer(&self) -> WalletResult<()> {
        let payer = self
            .message
            .fee_payer_key()
            .ok_or_else(|| WalletError::Validation("message has no accounts".to_string()))?;
        let signature = self
            .signatures
            .first()
            .ok_or_else(|| WalletError::Validation("transaction is unsigned".to_string()))?;

        let key = ed25519_dalek::VerifyingKey::from_bytes(&payer.to_bytes())
            .map_err(|e| WalletError::InvalidKeyFormat(format!("fee payer key: {e}")))?;
        let signature = ed25519_dalek::Signature::from_slice(signature.as_ref())
            .map_err(|e| WalletError::Validation(format!("fee payer signature: {e}")))?;
        key.verify_strict(&self.message.serialize(), &signature)
            .map_err(|_| WalletError::Validation("fee payer signature does not verify".to_string()))
    }
}
