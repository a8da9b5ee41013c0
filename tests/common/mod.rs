//! Shared fakes for the integration suites.
//!
//! `FakeLedger` applies the wallet program's rules to submitted transactions
//! and checks secp256r1 instructions with real P-256 verification.
//! `FakeAuthenticator` holds deterministic P-256 passkeys and answers
//! assertions in either verifier mode.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey as FeePayerKey;
use num_bigint::BigUint;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use guardian_wallet::address::{self, Pubkey, ids};
use guardian_wallet::builder::transfer_message;
use guardian_wallet::codec::{self, P256_ORDER};
use guardian_wallet::ledger::{
    AccountInfo, GuardianAccount, Hash, LedgerClient, MessageExt, Secp256r1Verify,
    SignatureStatus, Transaction, TransactionExt, WalletAccount, WalletInstruction,
};
use guardian_wallet::orchestrator::Assertion;
use guardian_wallet::registry::{CredentialRegistration, GuardianRegistry, RedbStagingStore};
use guardian_wallet::retry::RetryPolicy;
use guardian_wallet::storage::Storage;
use guardian_wallet::{AuthorizationOrchestrator, Authenticator, VerifierMode, WalletError, WalletResult};

pub const PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0x4e, 0x1a, 0x62, 0x2c, 0x91, 0x07, 0xd3, 0x55, 0x18, 0xb0, 0x6f, 0x2e, 0xc4, 0x39, 0x8a,
    0x71, 0x0d, 0xe6, 0x53, 0x9b, 0x24, 0xf8, 0x46, 0x1c, 0xa7, 0x3e, 0x80, 0x5d, 0x12, 0xc9,
    0x67, 0xb4,
]);

pub const RECOVERY_PHRASE: &str = "correct horse battery staple";

// Wallet program error codes, as reported in preflight logs.
const ERROR_ALREADY_INITIALIZED: u32 = 6000;
const ERROR_INSUFFICIENT_FUNDS: u32 = 6003;
const ERROR_INVALID_NONCE: u32 = 6004;
const ERROR_MESSAGE_MISMATCH: u32 = 6006;
const ERROR_MISSING_AUTHORIZATION: u32 = 6007;

pub fn fee_payer() -> FeePayerKey {
    FeePayerKey::from_bytes(&[0x5a; 32])
}

pub fn destination(tag: u8) -> Pubkey {
    Pubkey::new_from_array([tag; 32])
}

/// Retries fast enough for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::exponential()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(2))
}

pub fn memory_store() -> Arc<RedbStagingStore> {
    Arc::new(RedbStagingStore::new(
        Storage::open_in_memory().expect("in-memory staging store"),
    ))
}

/// An orchestrator over the given fakes with test-speed timings.
pub fn orchestrator(
    ledger: &Arc<FakeLedger>,
    store: Arc<dyn guardian_wallet::StagingStore>,
    authenticator: &Arc<FakeAuthenticator>,
) -> AuthorizationOrchestrator {
    let registry = GuardianRegistry::new(PROGRAM_ID, ledger.clone(), store)
        .with_retry_policy(fast_retry());
    AuthorizationOrchestrator::new(registry, ledger.clone(), authenticator.clone(), fee_payer())
        .with_verifier_mode(authenticator.mode())
        .with_retry_policy(fast_retry())
        .with_confirmation(Duration::from_secs(2), Duration::from_millis(5))
}

fn program_error(instruction: usize, code: u32) -> WalletError {
    WalletError::LedgerRejected {
        instruction: "unknown".to_string(),
        reason: format!(
            "Transaction simulation failed: Error processing Instruction {instruction}: custom program error: {code:#x}"
        ),
    }
}

fn rejected(reason: impl Into<String>) -> WalletError {
    WalletError::LedgerRejected {
        instruction: "unknown".to_string(),
        reason: reason.into(),
    }
}

fn already_in_use(address: &Pubkey) -> WalletError {
    rejected(format!(
        "Transaction simulation failed: Allocate: account Address {{ address: {address}, base: None }} already in use"
    ))
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, AccountInfo>,
    statuses: HashMap<String, SignatureStatus>,
    pending_polls: HashMap<String, u32>,
    polls_before_confirm: u32,
    fail_next_sends: u32,
    fail_next_confirmation: Option<String>,
    race_next_transfer: bool,
    race_next_guardian: Option<(Pubkey, u64)>,
    verified: Vec<Secp256r1Verify>,
}

pub struct FakeLedger {
    program_id: Pubkey,
    verifier_mode: VerifierMode,
    state: Mutex<LedgerState>,
    sends: AtomicU32,
}

impl FakeLedger {
    pub fn new(verifier_mode: VerifierMode) -> Arc<Self> {
        Arc::new(Self {
            program_id: PROGRAM_ID,
            verifier_mode,
            state: Mutex::new(LedgerState::default()),
            sends: AtomicU32::new(0),
        })
    }

    pub fn airdrop(&self, address: &Pubkey, lamports: u64) {
        let mut state = self.state.lock().unwrap();
        let account = state.accounts.entry(*address).or_insert_with(|| AccountInfo {
            lamports: 0,
            owner: ids::SYSTEM_PROGRAM,
            data: Vec::new(),
            executable: false,
        });
        account.lamports += lamports;
    }

    /// Report `Pending` this many times before each confirmation.
    pub fn set_polls_before_confirm(&self, polls: u32) {
        self.state.lock().unwrap().polls_before_confirm = polls;
    }

    /// Drop the next `count` submissions with a transport error.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().unwrap().fail_next_sends = count;
    }

    /// Accept the next submission without applying it and report `reason`
    /// as its confirmed failure.
    pub fn fail_next_confirmation(&self, reason: &str) {
        self.state.lock().unwrap().fail_next_confirmation = Some(reason.to_string());
    }

    /// Let another device consume the wallet's next nonce just before the
    /// next transfer lands.
    pub fn race_next_transfer(&self) {
        self.state.lock().unwrap().race_next_transfer = true;
    }

    /// Let another device install `guardian_id` on `wallet` just before the
    /// next submission lands.
    pub fn race_next_guardian(&self, wallet: Pubkey, guardian_id: u64) {
        self.state.lock().unwrap().race_next_guardian = Some((wallet, guardian_id));
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    /// Every signature the precompile accepted, in order.
    pub fn verified(&self) -> Vec<Secp256r1Verify> {
        self.state.lock().unwrap().verified.clone()
    }

    pub fn wallet(&self, wallet: &Pubkey) -> Option<WalletAccount> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(wallet)
            .map(|account| WalletAccount::decode(&account.data).expect("wallet layout"))
    }

    pub fn guardian(&self, wallet: &Pubkey, guardian_id: u64) -> Option<GuardianAccount> {
        let (address, _) = address::guardian_address(&self.program_id, wallet, guardian_id).unwrap();
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(&address)
            .map(|account| GuardianAccount::decode(&account.data).expect("guardian layout"))
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        let state = self.state.lock().unwrap();
        state.accounts.get(address).map_or(0, |account| account.lamports)
    }

    fn program_account(&self, data: Vec<u8>) -> AccountInfo {
        AccountInfo {
            lamports: 0,
            owner: self.program_id,
            data,
            executable: false,
        }
    }

    fn install_guardian_account(
        &self,
        accounts: &mut HashMap<Pubkey, AccountInfo>,
        wallet: &Pubkey,
        guardian: GuardianAccount,
    ) -> WalletResult<()> {
        let (address, _) = address::guardian_address(&self.program_id, wallet, guardian.guardian_id)?;
        if accounts.contains_key(&address) {
            return Err(already_in_use(&address));
        }
        let wallet_info = accounts
            .get_mut(wallet)
            .ok_or_else(|| rejected("AccountNotInitialized: wallet"))?;
        let mut wallet_account = WalletAccount::decode(&wallet_info.data)?;
        wallet_account.guardian_count += 1;
        wallet_info.data = wallet_account.encode();

        accounts.insert(address, self.program_account(guardian.encode()?));
        Ok(())
    }

    /// Another device's transfer: consume the next nonce.
    fn race_transfer(accounts: &mut HashMap<Pubkey, AccountInfo>, wallet: &Pubkey) {
        if let Some(info) = accounts.get_mut(wallet)
            && let Ok(mut account) = WalletAccount::decode(&info.data)
        {
            account.transaction_nonce += 1;
            info.data = account.encode();
        }
    }

    fn apply(
        &self,
        accounts: &mut HashMap<Pubkey, AccountInfo>,
        verified: &mut Vec<Secp256r1Verify>,
        index: usize,
        instruction: &guardian_wallet::ledger::Instruction,
    ) -> WalletResult<()> {
        if instruction.program_id == ids::SECP256R1_PROGRAM {
            let verify = Secp256r1Verify::decode(&instruction.data)
                .map_err(|e| rejected(format!("precompile: {e}")))?;
            if !codec::is_low_s(&verify.signature) {
                return Err(rejected("precompile: signature s is not low"));
            }
            let key = VerifyingKey::from_sec1_bytes(&verify.public_key)
                .map_err(|_| rejected("precompile: invalid public key"))?;
            let signature = Signature::from_slice(&verify.signature)
                .map_err(|_| rejected("precompile: invalid signature"))?;
            key.verify(&verify.message, &signature)
                .map_err(|_| rejected("precompile: signature verification failed"))?;
            verified.push(verify);
            return Ok(());
        }

        if instruction.program_id != self.program_id {
            return Err(rejected(format!(
                "unsupported program {}",
                instruction.program_id
            )));
        }

        let account_at = |position: usize| {
            instruction
                .accounts
                .get(position)
                .map(|meta| meta.pubkey)
                .ok_or_else(|| rejected("missing account"))
        };

        match WalletInstruction::decode(&instruction.data)? {
            WalletInstruction::InitializeWallet {
                threshold,
                credential_seed,
                ..
            } => {
                let wallet = account_at(0)?;
                let seed: [u8; address::SEED_LEN] = credential_seed
                    .as_slice()
                    .try_into()
                    .map_err(|_| rejected("seed length"))?;
                let (expected, bump) = address::wallet_address_from_seed(&self.program_id, &seed)?;
                if expected != wallet {
                    return Err(rejected("ConstraintSeeds: wallet"));
                }
                if accounts.contains_key(&wallet) {
                    return Err(program_error(index, ERROR_ALREADY_INITIALIZED));
                }
                let account = WalletAccount {
                    threshold,
                    guardian_count: 0,
                    recovery_nonce: 0,
                    bump,
                    transaction_nonce: 0,
                    last_transaction_timestamp: 0,
                };
                accounts.insert(wallet, self.program_account(account.encode()));
            }
            WalletInstruction::AddGuardian {
                guardian_id,
                name,
                recovery_hash,
                is_owner,
                public_key,
            } => {
                let wallet = account_at(0)?;
                let guardian_address = account_at(1)?;
                let (expected, bump) =
                    address::guardian_address(&self.program_id, &wallet, guardian_id)?;
                if expected != guardian_address {
                    return Err(rejected("ConstraintSeeds: guardian"));
                }
                self.install_guardian_account(
                    accounts,
                    &wallet,
                    GuardianAccount {
                        wallet,
                        guardian_id,
                        name,
                        is_active: true,
                        recovery_hash,
                        is_owner,
                        public_key,
                        bump,
                    },
                )?;
            }
            WalletInstruction::ExecuteTransfer {
                destination,
                amount,
                nonce,
                timestamp,
                message_hash,
            } => {
                let wallet = account_at(0)?;
                let guardian_address = account_at(1)?;

                let wallet_info = accounts
                    .get(&wallet)
                    .ok_or_else(|| rejected("AccountNotInitialized: wallet"))?;
                let mut wallet_account = WalletAccount::decode(&wallet_info.data)?;
                if nonce != wallet_account.next_nonce() {
                    return Err(program_error(index, ERROR_INVALID_NONCE));
                }

                let expected_hash =
                    codec::digest_message(&transfer_message(amount, &destination, nonce, timestamp));
                if expected_hash != message_hash {
                    return Err(program_error(index, ERROR_MESSAGE_MISMATCH));
                }

                let guardian = accounts
                    .get(&guardian_address)
                    .filter(|info| info.owner == self.program_id)
                    .map(|info| GuardianAccount::decode(&info.data))
                    .transpose()?
                    .filter(|guardian| guardian.wallet == wallet && guardian.is_active)
                    .ok_or_else(|| program_error(index, ERROR_MISSING_AUTHORIZATION))?;
                let authorized = verified.iter().any(|verify| {
                    Some(verify.public_key) == guardian.public_key
                        && match self.verifier_mode {
                            VerifierMode::Raw => verify.message == message_hash,
                            VerifierMode::Webauthn => verify.message.len() > 32,
                        }
                });
                if !authorized {
                    return Err(program_error(index, ERROR_MISSING_AUTHORIZATION));
                }

                if wallet_info.lamports < amount {
                    return Err(program_error(index, ERROR_INSUFFICIENT_FUNDS));
                }
                wallet_account.transaction_nonce = nonce;
                wallet_account.last_transaction_timestamp = timestamp;

                let wallet_info = accounts
                    .get_mut(&wallet)
                    .ok_or_else(|| rejected("AccountNotInitialized: wallet"))?;
                wallet_info.lamports -= amount;
                wallet_info.data = wallet_account.encode();

                accounts
                    .entry(destination)
                    .or_insert_with(|| AccountInfo {
                        lamports: 0,
                        owner: ids::SYSTEM_PROGRAM,
                        data: Vec::new(),
                        executable: false,
                    })
                    .lamports += amount;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn get_account(&self, address: &Pubkey) -> WalletResult<Option<AccountInfo>> {
        Ok(self.state.lock().unwrap().accounts.get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> WalletResult<u64> {
        Ok(self.lamports(address))
    }

    async fn get_latest_blockhash(&self) -> WalletResult<Hash> {
        let sends = self.sends.load(Ordering::SeqCst).to_le_bytes();
        Ok(Hash::new_from_array(Sha256::digest(sends).into()))
    }

    async fn send_transaction(&self, transaction: &Transaction) -> WalletResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_sends > 0 {
            state.fail_next_sends -= 1;
            return Err(WalletError::Network("connection reset by peer".to_string()));
        }

        transaction
            .verify_fee_payer()
            .map_err(|e| rejected(format!("signature verification failure: {e}")))?;
        let signature = transaction
            .id()
            .ok_or_else(|| rejected("transaction is unsigned"))?;
        let instructions = transaction.message.to_instructions()?;
        self.sends.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = state.fail_next_confirmation.take() {
            state
                .statuses
                .insert(signature.clone(), SignatureStatus::Failed(reason));
            return Ok(signature);
        }

        if let Some((wallet, guardian_id)) = state.race_next_guardian.take() {
            let (_, bump) = address::guardian_address(&self.program_id, &wallet, guardian_id)?;
            let racer = GuardianAccount {
                wallet,
                guardian_id,
                name: "racer".to_string(),
                is_active: true,
                recovery_hash: [0; 32],
                is_owner: false,
                public_key: None,
                bump,
            };
            self.install_guardian_account(&mut state.accounts, &wallet, racer)?;
        }

        if state.race_next_transfer {
            let transfer_wallet = instructions.iter().find_map(|ix| {
                matches!(
                    WalletInstruction::decode(&ix.data),
                    Ok(WalletInstruction::ExecuteTransfer { .. })
                )
                .then(|| ix.accounts.first().map(|meta| meta.pubkey))
                .flatten()
            });
            if let Some(wallet) = transfer_wallet {
                state.race_next_transfer = false;
                Self::race_transfer(&mut state.accounts, &wallet);
            }
        }

        // All-or-nothing: work on a copy and commit only if every
        // instruction succeeds.
        let mut accounts = state.accounts.clone();
        let mut verified = Vec::new();
        for (index, instruction) in instructions.iter().enumerate() {
            self.apply(&mut accounts, &mut verified, index, instruction)?;
        }

        state.accounts = accounts;
        state.verified.extend(verified);
        let polls = state.polls_before_confirm;
        state.pending_polls.insert(signature.clone(), polls);
        state
            .statuses
            .insert(signature.clone(), SignatureStatus::Confirmed);
        Ok(signature)
    }

    async fn get_signature_status(&self, signature: &str) -> WalletResult<SignatureStatus> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.pending_polls.get_mut(signature)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(SignatureStatus::Pending);
        }
        Ok(state
            .statuses
            .get(signature)
            .cloned()
            .unwrap_or(SignatureStatus::Pending))
    }
}

// =============================================================================
// Authenticator
// =============================================================================

struct Passkey {
    credential_id: Vec<u8>,
    key: SigningKey,
}

#[derive(Default)]
struct AuthenticatorState {
    passkeys: Vec<Passkey>,
    selected: Option<Vec<u8>>,
    high_s: bool,
    cancel_next: bool,
    assertions: u32,
}

/// Deterministic platform authenticator.
pub struct FakeAuthenticator {
    mode: VerifierMode,
    rp_id: String,
    key_offset: u8,
    state: Mutex<AuthenticatorState>,
}

impl FakeAuthenticator {
    /// `key_offset` separates the key material of different devices.
    pub fn new(mode: VerifierMode, key_offset: u8) -> Arc<Self> {
        Arc::new(Self {
            mode,
            rp_id: "wallet.example".to_string(),
            key_offset,
            state: Mutex::new(AuthenticatorState::default()),
        })
    }

    pub fn mode(&self) -> VerifierMode {
        self.mode
    }

    /// The credential a discoverable assertion will use.
    pub fn select(&self, credential_id: &[u8]) {
        self.state.lock().unwrap().selected = Some(credential_id.to_vec());
    }

    /// Emit high-S signatures from now on.
    pub fn emit_high_s(&self) {
        self.state.lock().unwrap().high_s = true;
    }

    pub fn cancel_next(&self) {
        self.state.lock().unwrap().cancel_next = true;
    }

    pub fn assertions(&self) -> u32 {
        self.state.lock().unwrap().assertions
    }

    /// Compressed SEC1 key of a credential created on this device.
    pub fn public_key(&self, credential_id: &[u8]) -> Option<[u8; 33]> {
        let state = self.state.lock().unwrap();
        state
            .passkeys
            .iter()
            .find(|passkey| passkey.credential_id == credential_id)
            .map(|passkey| {
                let point = passkey.key.verifying_key().to_encoded_point(true);
                point.as_bytes().try_into().expect("33-byte compressed point")
            })
    }

    fn authenticator_data(&self) -> Vec<u8> {
        let mut data = Sha256::digest(self.rp_id.as_bytes()).to_vec();
        // User present + user verified.
        data.push(0x05);
        data.extend_from_slice(&1u32.to_be_bytes());
        data
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn create_credential(&self, user_name: &str) -> WalletResult<CredentialRegistration> {
        let mut state = self.state.lock().unwrap();
        let index = u8::try_from(state.passkeys.len()).expect("fewer than 256 passkeys");
        let scalar = [self.key_offset.wrapping_add(index).max(1); 32];
        let key = SigningKey::from_slice(&scalar)
            .map_err(|e| WalletError::Authenticator(format!("key generation: {e}")))?;

        let credential_id = format!("passkey:{user_name}:{}:{index}", self.key_offset).into_bytes();
        let public_key = key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
        state.passkeys.push(Passkey {
            credential_id: credential_id.clone(),
            key,
        });

        Ok(CredentialRegistration {
            credential_id,
            public_key,
        })
    }

    async fn get_assertion(
        &self,
        challenge: &[u8; 32],
        credential_id: Option<&[u8]>,
    ) -> WalletResult<Assertion> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.cancel_next) {
            return Err(WalletError::Authenticator(
                "The operation either timed out or was not allowed".to_string(),
            ));
        }
        state.assertions += 1;

        let wanted = credential_id
            .map(<[u8]>::to_vec)
            .or_else(|| state.selected.clone());
        let passkey = match wanted {
            Some(id) => state
                .passkeys
                .iter()
                .find(|passkey| passkey.credential_id == id),
            None => state.passkeys.last(),
        }
        .ok_or_else(|| WalletError::Authenticator("no matching credential".to_string()))?;

        let (authenticator_data, client_data_json, signed) = match self.mode {
            VerifierMode::Raw => (Vec::new(), Vec::new(), challenge.to_vec()),
            VerifierMode::Webauthn => {
                let client_data = serde_json::to_vec(&serde_json::json!({
                    "type": "webauthn.get",
                    "challenge": URL_SAFE_NO_PAD.encode(challenge),
                    "origin": format!("https://{}", self.rp_id),
                    "crossOrigin": false,
                }))
                .map_err(|e| WalletError::Serialization(e.to_string()))?;
                let authenticator_data = self.authenticator_data();
                let signed = codec::webauthn_signed_message(&authenticator_data, &client_data);
                (authenticator_data, client_data, signed)
            }
        };

        let signature: Signature = passkey.key.sign(&signed);
        let signature = if state.high_s {
            high_s_der(&signature)
        } else {
            signature.to_der().as_bytes().to_vec()
        };

        Ok(Assertion {
            credential_id: passkey.credential_id.clone(),
            signature,
            authenticator_data,
            client_data_json,
        })
    }
}

/// DER of the same signature with `s` replaced by its high form `n - s`.
pub fn high_s_der(signature: &Signature) -> Vec<u8> {
    let bytes = signature.to_bytes();
    let (r, s) = bytes.split_at(32);
    let order = BigUint::from_bytes_be(&P256_ORDER);
    let s = BigUint::from_bytes_be(s);
    let high = if s > &order >> 1 { s } else { &order - s };
    der_signature(r, &high.to_bytes_be())
}

pub fn der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
    fn integer(bytes: &[u8]) -> Vec<u8> {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        let trimmed = &bytes[start..];
        let mut out = vec![0x02];
        if trimmed[0] & 0x80 != 0 {
            out.push(u8::try_from(trimmed.len() + 1).unwrap());
            out.push(0);
        } else {
            out.push(u8::try_from(trimmed.len()).unwrap());
        }
        out.extend_from_slice(trimmed);
        out
    }

    let mut body = integer(r);
    body.extend(integer(s));
    let mut der = vec![0x30, u8::try_from(body.len()).unwrap()];
    der.extend(body);
    der
}
