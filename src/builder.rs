//! Authorization request construction.
//!
//! Every guarded request is a list of instructions in a fixed order: the
//! secp256r1 verification comes first, the wallet program instruction
//! second. The program trusts that the precompile already checked the
//! signature it reads back through the instructions sysvar, so swapping
//! the order strips authorization without any error.

use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

use crate::address::{self, Pubkey, SEED_LEN, ids};
use crate::codec::{self, COMPRESSED_KEY_LEN, RAW_SIGNATURE_LEN};
use crate::config::VerifierMode;
use crate::error::{WalletError, WalletResult};
use crate::ledger::accounts::{MAX_GUARDIAN_NAME_LEN, MAX_THRESHOLD};
use crate::ledger::{
    AccountMeta, Hash, Instruction, Message, Secp256r1Verify, Transaction, WalletInstruction,
    compile_message, secp256r1_verify_instruction, sign_message,
};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
const SOL_DECIMALS: u32 = 9;

/// Render lamports as a SOL decimal without trailing zeros (`1.5`, `1`, `0.000000001`).
pub fn format_amount(lamports: u64) -> String {
    Decimal::from_i128_with_scale(i128::from(lamports), SOL_DECIMALS)
        .normalize()
        .to_string()
}

/// Parse a positive SOL amount with at most nine decimals into lamports.
pub fn parse_amount(sol: &str) -> WalletResult<u64> {
    let value = Decimal::from_str(sol.trim())
        .map_err(|e| WalletError::InvalidAmount(format!("'{sol}': {e}")))?
        .normalize();
    if value <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(format!(
            "'{sol}': amount must be positive"
        )));
    }
    if value.scale() > SOL_DECIMALS {
        return Err(WalletError::InvalidAmount(format!(
            "'{sol}': at most {SOL_DECIMALS} decimal places"
        )));
    }

    value
        .checked_mul(Decimal::from(LAMPORTS_PER_SOL))
        .and_then(|lamports| lamports.to_u64())
        .ok_or_else(|| WalletError::InvalidAmount(format!("'{sol}': amount out of range")))
}

/// Canonical transfer message; its SHA-256 is the passkey challenge.
pub fn transfer_message(lamports: u64, destination: &Pubkey, nonce: u64, timestamp: i64) -> String {
    format!(
        "transfer:{}_TO_{destination},nonce:{nonce},timestamp:{timestamp}",
        format_amount(lamports)
    )
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// A verified-shape passkey assertion, ready for the precompile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyProof {
    pub public_key: [u8; COMPRESSED_KEY_LEN],
    /// Low-S raw `r‖s`.
    pub signature: [u8; RAW_SIGNATURE_LEN],
    /// Bytes the precompile checks the signature over.
    pub signed_message: Vec<u8>,
}

impl PasskeyProof {
    /// Turn an authenticator assertion over `message_hash` into a proof.
    ///
    /// In WebAuthn mode the clientDataJSON challenge must be the base64url
    /// of `message_hash`; the signed bytes are `authData ‖ SHA256(clientData)`.
    /// In raw mode the signature covers the hash itself.
    pub fn from_assertion(
        public_key: [u8; COMPRESSED_KEY_LEN],
        der_signature: &[u8],
        authenticator_data: &[u8],
        client_data_json: &[u8],
        message_hash: &[u8; 32],
        mode: VerifierMode,
    ) -> WalletResult<Self> {
        let signature = codec::prepare_passkey_signature(der_signature)?;

        let signed_message = match mode {
            VerifierMode::Raw => message_hash.to_vec(),
            VerifierMode::Webauthn => {
                let client_data: ClientData = serde_json::from_slice(client_data_json)
                    .map_err(|e| WalletError::Validation(format!("clientDataJSON: {e}")))?;
                if client_data.kind != "webauthn.get" {
                    return Err(WalletError::Validation(format!(
                        "clientDataJSON type is '{}', expected 'webauthn.get'",
                        client_data.kind
                    )));
                }
                if client_data.challenge != URL_SAFE_NO_PAD.encode(message_hash) {
                    return Err(WalletError::Validation(
                        "assertion challenge does not match the message hash".to_string(),
                    ));
                }
                codec::webauthn_signed_message(authenticator_data, client_data_json)
            }
        };

        Ok(Self {
            public_key,
            signature,
            signed_message,
        })
    }

    fn verify_instruction(&self) -> WalletResult<Instruction> {
        secp256r1_verify_instruction(&Secp256r1Verify {
            public_key: self.public_key,
            signature: self.signature,
            message: self.signed_message.clone(),
        })
    }
}

/// An ordered, unsigned authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: &'static str,
    pub fee_payer: Pubkey,
    pub instructions: Vec<Instruction>,
}

impl Request {
    /// Whether every secp256r1 verification sits before the first wallet
    /// program instruction.
    pub fn authorization_precedes_operation(&self, program_id: &Pubkey) -> bool {
        let first_operation = self
            .instructions
            .iter()
            .position(|ix| ix.program_id == *program_id);
        let last_verify = self
            .instructions
            .iter()
            .rposition(|ix| ix.program_id == ids::SECP256R1_PROGRAM);

        match (last_verify, first_operation) {
            (Some(verify), Some(operation)) => verify < operation,
            _ => true,
        }
    }

    pub fn compile(&self, recent_blockhash: Hash) -> WalletResult<Message> {
        compile_message(&self.fee_payer, &self.instructions, recent_blockhash)
    }

    /// Compile against `recent_blockhash` and sign with the fee payer.
    pub fn sign(&self, recent_blockhash: Hash, fee_payer: &SigningKey) -> WalletResult<Transaction> {
        sign_message(self.compile(recent_blockhash)?, fee_payer)
    }
}

/// Inputs of a guarded transfer.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub wallet: Pubkey,
    pub guardian: Pubkey,
    pub destination: Pubkey,
    pub amount: u64,
    pub next_nonce: u64,
    pub timestamp: i64,
    pub message_hash: [u8; 32],
    pub fee_payer: Pubkey,
}

impl TransferParams {
    pub fn canonical_message(&self) -> String {
        transfer_message(self.amount, &self.destination, self.next_nonce, self.timestamp)
    }
}

/// Builds requests for one deployed wallet program.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    program_id: Pubkey,
}

impl TransactionBuilder {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Verification instruction followed by `execute_transfer`.
    ///
    /// `current_nonce` is the wallet's on-chain `transaction_nonce`;
    /// `params.next_nonce` must be exactly one more.
    pub fn build_transfer_request(
        &self,
        params: &TransferParams,
        current_nonce: u64,
        proof: &PasskeyProof,
    ) -> WalletResult<Request> {
        if params.amount == 0 {
            return Err(WalletError::InvalidAmount(
                "transfer amount must be positive".to_string(),
            ));
        }
        if Some(params.next_nonce) != current_nonce.checked_add(1) {
            return Err(WalletError::StaleAuthorization {
                wallet: params.wallet.to_string(),
                supplied_nonce: params.next_nonce,
                reason: format!(
                    "expected nonce {}",
                    current_nonce.saturating_add(1)
                ),
            });
        }

        let expected_hash = codec::digest_message(&params.canonical_message());
        if expected_hash != params.message_hash {
            return Err(WalletError::Validation(
                "message hash does not match the canonical transfer message".to_string(),
            ));
        }

        let operation = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(params.wallet, false),
                AccountMeta::new_readonly(params.guardian, false),
                AccountMeta::new(params.destination, false),
                AccountMeta::new(params.fee_payer, true),
                AccountMeta::new_readonly(ids::INSTRUCTIONS_SYSVAR, false),
                AccountMeta::new_readonly(ids::SYSTEM_PROGRAM, false),
            ],
            data: WalletInstruction::ExecuteTransfer {
                destination: params.destination,
                amount: params.amount,
                nonce: params.next_nonce,
                timestamp: params.timestamp,
                message_hash: params.message_hash,
            }
            .encode()?,
        };

        tracing::debug!(
            wallet = %params.wallet,
            nonce = params.next_nonce,
            amount = params.amount,
            message_hash = %codec::short_hex(&params.message_hash),
            "Built transfer request"
        );

        Ok(Request {
            operation: WalletInstruction::EXECUTE_TRANSFER,
            fee_payer: params.fee_payer,
            instructions: vec![proof.verify_instruction()?, operation],
        })
    }

    /// `add_guardian` for `guardian_id`; `guardian_address` must be the
    /// address derived for that id under `wallet`.
    #[allow(clippy::too_many_arguments)]
    pub fn build_add_guardian_request(
        &self,
        wallet: &Pubkey,
        guardian_address: &Pubkey,
        guardian_id: u64,
        name: &str,
        recovery_hash: [u8; 32],
        is_owner: bool,
        public_key: Option<[u8; COMPRESSED_KEY_LEN]>,
        fee_payer: &Pubkey,
    ) -> WalletResult<Request> {
        validate_guardian_name(name)?;
        if guardian_id == 0 {
            return Err(WalletError::Validation(
                "guardian ids start at 1".to_string(),
            ));
        }
        let (expected, _) = address::guardian_address(&self.program_id, wallet, guardian_id)?;
        if expected != *guardian_address {
            return Err(WalletError::Validation(format!(
                "guardian address {guardian_address} is not derived from id {guardian_id}"
            )));
        }

        let operation = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(*wallet, false),
                AccountMeta::new(*guardian_address, false),
                AccountMeta::new(*fee_payer, true),
                AccountMeta::new_readonly(ids::SYSTEM_PROGRAM, false),
            ],
            data: WalletInstruction::AddGuardian {
                guardian_id,
                name: name.to_string(),
                recovery_hash,
                is_owner,
                public_key,
            }
            .encode()?,
        };

        Ok(Request {
            operation: WalletInstruction::ADD_GUARDIAN,
            fee_payer: *fee_payer,
            instructions: vec![operation],
        })
    }

    /// `initialize_wallet` at the address derived from `credential_seed`.
    pub fn build_initialize_wallet_request(
        &self,
        threshold: u8,
        recovery_hash: [u8; 32],
        credential_seed: &[u8; SEED_LEN],
        fee_payer: &Pubkey,
    ) -> WalletResult<Request> {
        if threshold == 0 || threshold > MAX_THRESHOLD {
            return Err(WalletError::InvalidThreshold {
                threshold,
                max: MAX_THRESHOLD,
            });
        }
        let (wallet, _) = address::wallet_address_from_seed(&self.program_id, credential_seed)?;

        let operation = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(wallet, false),
                AccountMeta::new(*fee_payer, true),
                AccountMeta::new_readonly(ids::SYSTEM_PROGRAM, false),
            ],
            data: WalletInstruction::InitializeWallet {
                threshold,
                recovery_hash,
                credential_seed: credential_seed.to_vec(),
            }
            .encode()?,
        };

        Ok(Request {
            operation: WalletInstruction::INITIALIZE_WALLET,
            fee_payer: *fee_payer,
            instructions: vec![operation],
        })
    }
}

/// Guardian names are 1..=32 bytes of UTF-8.
pub fn validate_guardian_name(name: &str) -> WalletResult<()> {
    if name.is_empty() || name.len() > MAX_GUARDIAN_NAME_LEN {
        return Err(WalletError::InvalidGuardianName {
            len: name.len(),
            max: MAX_GUARDIAN_NAME_LEN,
        });
    }
    Ok(())
}
