//! End-to-end workflows: wallet creation, guardian onboarding, login and
//! guarded transfers.
//!
//! The orchestrator owns the ordering of every step. Signing always precedes
//! submission, submission precedes confirmation, and local state is only
//! updated after the ledger confirms. Transient transport failures are
//! retried by [`RetryPolicy`]; allocation conflicts and stale nonces are
//! retried after refreshing ledger state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use tokio::sync::watch;

use crate::address::{self, Pubkey};
use crate::builder::{self, PasskeyProof, Request, TransactionBuilder, TransferParams};
use crate::codec::{self, COMPRESSED_KEY_LEN};
use crate::config::{Settings, VerifierMode};
use crate::error::{WalletError, WalletResult};
use crate::ledger::{
    GuardianAccount, LedgerClient, RejectionContext, SignatureStatus, WalletAccount,
    classify_rejection,
};
use crate::registry::{
    CredentialBinding, CredentialRegistration, GuardianRegistry, InviteRecord, InviteStatus,
    OWNER_GUARDIAN_ID, StagedRegistration, StagingStore,
};
use crate::retry::RetryPolicy;

/// Conflict re-allocations attempted per guardian installation.
const MAX_ALLOCATION_ATTEMPTS: u32 = 3;
/// Rebuilds attempted after a stale nonce or timestamp.
const MAX_STALE_RETRIES: u32 = 2;

/// Output of a passkey assertion ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub credential_id: Vec<u8>,
    /// DER-encoded ECDSA P-256 signature.
    pub signature: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

/// The platform passkey capability.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Create a passkey for `user_name`.
    async fn create_credential(&self, user_name: &str) -> WalletResult<CredentialRegistration>;

    /// Sign `challenge` with `credential_id`, or with any discoverable
    /// credential when `None`.
    async fn get_assertion(
        &self,
        challenge: &[u8; 32],
        credential_id: Option<&[u8]>,
    ) -> WalletResult<Assertion>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedWallet {
    pub wallet: Pubkey,
    pub credential_id: Vec<u8>,
    pub guardian_id: u64,
    pub initialize_transaction: String,
    pub owner_transaction: String,
}

/// A credential resolved to the wallet and guardian it signs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub wallet: Pubkey,
    pub guardian_id: u64,
    pub credential_id: Vec<u8>,
    pub public_key: [u8; COMPRESSED_KEY_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledGuardian {
    pub invite_code: String,
    pub guardian_id: u64,
    /// `None` when the guardian was already on-chain and nothing was sent.
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transaction_id: String,
    pub nonce: u64,
    pub amount: u64,
    pub destination: Pubkey,
}

pub struct AuthorizationOrchestrator {
    builder: TransactionBuilder,
    registry: GuardianRegistry,
    ledger: Arc<dyn LedgerClient>,
    authenticator: Arc<dyn Authenticator>,
    fee_payer: SigningKey,
    verifier_mode: VerifierMode,
    retry: RetryPolicy,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl AuthorizationOrchestrator {
    pub fn new(
        registry: GuardianRegistry,
        ledger: Arc<dyn LedgerClient>,
        authenticator: Arc<dyn Authenticator>,
        fee_payer: SigningKey,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            builder: TransactionBuilder::new(*registry.program_id()),
            registry,
            ledger,
            authenticator,
            fee_payer,
            verifier_mode: VerifierMode::default(),
            retry: RetryPolicy::exponential(),
            confirmation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            shutdown_tx,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn StagingStore>,
        authenticator: Arc<dyn Authenticator>,
        fee_payer: SigningKey,
    ) -> WalletResult<Self> {
        let registry = GuardianRegistry::from_settings(settings, ledger.clone(), store)?;
        Ok(Self::new(registry, ledger, authenticator, fee_payer)
            .with_verifier_mode(settings.verifier_mode())
            .with_retry_policy(settings.retry_policy())
            .with_confirmation(
                settings.confirmation_timeout(),
                settings.confirmation_poll_interval(),
            ))
    }

    #[must_use]
    pub fn with_verifier_mode(mut self, mode: VerifierMode) -> Self {
        self.verifier_mode = mode;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn registry(&self) -> &GuardianRegistry {
        &self.registry
    }

    pub fn fee_payer(&self) -> Pubkey {
        Pubkey::new_from_array(self.fee_payer.verifying_key().to_bytes())
    }

    /// Abort every in-flight and future confirmation wait, and refuse new
    /// submissions until [`Self::resume`].
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Allow submissions and confirmation waits again after [`Self::shutdown`].
    pub fn resume(&self) {
        self.shutdown_tx.send_replace(false);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    // =========================================================================
    // Wallet creation and onboarding
    // =========================================================================

    /// Create a passkey, initialize its wallet and install it as guardian 1.
    pub async fn create_wallet(
        &self,
        user_name: &str,
        threshold: u8,
        recovery_phrase: &str,
    ) -> WalletResult<CreatedWallet> {
        builder::validate_guardian_name(user_name)?;
        let recovery_hash = codec::hash_recovery_phrase(recovery_phrase)?;

        let credential = self.authenticator.create_credential(user_name).await?;
        let public_key = codec::compress_point(&credential.public_key)?;
        let seed = address::seed_from_credential(&credential.credential_id);
        let (wallet, _) = address::wallet_address_from_seed(self.builder.program_id(), &seed)?;
        let fee_payer = self.fee_payer();

        let initialize =
            self.builder
                .build_initialize_wallet_request(threshold, recovery_hash, &seed, &fee_payer)?;
        let initialize_transaction = self
            .submit_and_confirm(
                &initialize,
                &RejectionContext {
                    instruction: initialize.operation,
                    wallet: &wallet,
                    nonce: None,
                    guardian_id: None,
                },
            )
            .await?;
        tracing::info!(wallet = %wallet, threshold, "Wallet initialized");

        let (owner_address, _) =
            address::guardian_address(self.builder.program_id(), &wallet, OWNER_GUARDIAN_ID)?;
        let add_owner = self.builder.build_add_guardian_request(
            &wallet,
            &owner_address,
            OWNER_GUARDIAN_ID,
            user_name,
            recovery_hash,
            true,
            Some(public_key),
            &fee_payer,
        )?;
        let owner_transaction = self
            .submit_and_confirm(
                &add_owner,
                &RejectionContext {
                    instruction: add_owner.operation,
                    wallet: &wallet,
                    nonce: None,
                    guardian_id: Some(OWNER_GUARDIAN_ID),
                },
            )
            .await?;

        self.registry
            .bind_credential(&CredentialBinding::new(
                &credential.credential_id,
                wallet,
                OWNER_GUARDIAN_ID,
                &public_key,
            ))
            .await?;

        tracing::info!(wallet = %wallet, guardian_id = OWNER_GUARDIAN_ID, "Owner guardian installed");
        Ok(CreatedWallet {
            wallet,
            credential_id: credential.credential_id,
            guardian_id: OWNER_GUARDIAN_ID,
            initialize_transaction,
            owner_transaction,
        })
    }

    pub async fn invite_guardian(
        &self,
        wallet: &Pubkey,
        owner_id: &str,
        invite_code: Option<&str>,
    ) -> WalletResult<InviteRecord> {
        self.registry.create_invite(wallet, owner_id, invite_code).await
    }

    /// Second-device side: create a passkey and stage it under the invite.
    pub async fn accept_invite(
        &self,
        invite_code: &str,
        name: &str,
        recovery_phrase: &str,
    ) -> WalletResult<StagedRegistration> {
        // Fail before the ceremony if nothing can be staged.
        self.registry
            .get_invite(invite_code)
            .await?
            .ensure_status(InviteStatus::Pending)?;
        builder::validate_guardian_name(name)?;
        codec::hash_recovery_phrase(recovery_phrase)?;

        let credential = self.authenticator.create_credential(name).await?;
        self.registry
            .submit_registration(invite_code, &credential, name, recovery_phrase)
            .await
    }

    /// Owner side: install every `ready` invite of `wallet`.
    pub async fn install_ready_guardians(
        &self,
        owner_id: &str,
        wallet: &Pubkey,
    ) -> WalletResult<Vec<InstalledGuardian>> {
        let codes = self.registry.list_ready_invites(owner_id, wallet).await?;
        let mut installed = Vec::with_capacity(codes.len());
        for code in codes {
            installed.push(self.install_guardian(&code).await?);
        }
        Ok(installed)
    }

    /// Submit the `add_guardian` request for one `ready` invite.
    ///
    /// An allocation conflict reassigns the guardian id and retries. A
    /// `completed` invite, or a guardian already on-chain with the staged
    /// key, is finished without submitting again.
    pub async fn install_guardian(&self, invite_code: &str) -> WalletResult<InstalledGuardian> {
        let invite = self.registry.get_invite(invite_code).await?;
        if invite.status == InviteStatus::Completed {
            let invite = self.registry.finish_completed(invite_code).await?;
            tracing::info!(invite_code, guardian_id = invite.guardian_id, "Resumed completed guardian installation");
            return Ok(InstalledGuardian {
                invite_code: invite_code.to_string(),
                guardian_id: invite.guardian_id,
                transaction_id: invite.transaction_id,
            });
        }

        let fee_payer = self.fee_payer();
        let mut attempt = 0;

        loop {
            let install = self.registry.finalize(invite_code, &fee_payer).await?;
            if self.registry.is_installed(&install).await? {
                tracing::warn!(
                    invite_code,
                    guardian_id = install.guardian_id,
                    "Guardian already on-chain, completing without resubmitting"
                );
                self.registry.mark_completed(&install, None).await?;
                return Ok(InstalledGuardian {
                    invite_code: invite_code.to_string(),
                    guardian_id: install.guardian_id,
                    transaction_id: None,
                });
            }

            let context = RejectionContext {
                instruction: install.request.operation,
                wallet: &install.wallet,
                nonce: None,
                guardian_id: Some(install.guardian_id),
            };

            match self.submit_and_confirm(&install.request, &context).await {
                Ok(transaction_id) => {
                    self.registry
                        .mark_completed(&install, Some(&transaction_id))
                        .await?;
                    return Ok(InstalledGuardian {
                        invite_code: invite_code.to_string(),
                        guardian_id: install.guardian_id,
                        transaction_id: Some(transaction_id),
                    });
                }
                Err(WalletError::AllocationConflict { .. }) if attempt + 1 < MAX_ALLOCATION_ATTEMPTS => {
                    attempt += 1;
                    self.registry.reassign_guardian_id(invite_code).await?;
                }
                Err(err) => {
                    tracing::error!(invite_code, guardian_id = install.guardian_id, error = %err, "Guardian installation failed");
                    return Err(err);
                }
            }
        }
    }

    // =========================================================================
    // Login and transfers
    // =========================================================================

    /// Resolve a discoverable credential to its wallet and guardian.
    pub async fn login(&self) -> WalletResult<Session> {
        let challenge = codec::digest_message(&format!(
            "login:{}:{}",
            uuid::Uuid::new_v4(),
            Utc::now().timestamp()
        ));
        let assertion = self.authenticator.get_assertion(&challenge, None).await?;

        let binding = self
            .registry
            .resolve_credential(&assertion.credential_id)
            .await?;
        let public_key = binding.public_key_bytes()?;

        // Shape and challenge binding only; the ledger verifies signatures.
        PasskeyProof::from_assertion(
            public_key,
            &assertion.signature,
            &assertion.authenticator_data,
            &assertion.client_data_json,
            &challenge,
            self.verifier_mode,
        )?;

        let guardian = self.fetch_guardian(&binding.wallet, binding.guardian_id).await?;
        if !guardian.is_active || guardian.public_key.is_some_and(|key| key != public_key) {
            return Err(WalletError::Unauthorized);
        }

        tracing::info!(wallet = %binding.wallet, guardian_id = binding.guardian_id, "Logged in");
        Ok(Session {
            wallet: binding.wallet,
            guardian_id: binding.guardian_id,
            credential_id: assertion.credential_id,
            public_key,
        })
    }

    /// Passkey-authorized transfer of `amount` lamports from the session's
    /// wallet.
    ///
    /// A stale nonce or timestamp re-reads the wallet and asks for a fresh
    /// assertion.
    pub async fn transfer(
        &self,
        session: &Session,
        destination: &Pubkey,
        amount: u64,
    ) -> WalletResult<TransferReceipt> {
        let (guardian, _) = address::guardian_address(
            self.builder.program_id(),
            &session.wallet,
            session.guardian_id,
        )?;
        let mut attempt = 0;

        loop {
            let wallet_account = self.fetch_wallet(&session.wallet).await?;
            let next_nonce = wallet_account.next_nonce();
            let timestamp = Utc::now().timestamp();
            let message = builder::transfer_message(amount, destination, next_nonce, timestamp);
            let message_hash = codec::digest_message(&message);

            let assertion = self
                .authenticator
                .get_assertion(&message_hash, Some(&session.credential_id))
                .await?;
            let proof = PasskeyProof::from_assertion(
                session.public_key,
                &assertion.signature,
                &assertion.authenticator_data,
                &assertion.client_data_json,
                &message_hash,
                self.verifier_mode,
            )?;

            let params = TransferParams {
                wallet: session.wallet,
                guardian,
                destination: *destination,
                amount,
                next_nonce,
                timestamp,
                message_hash,
                fee_payer: self.fee_payer(),
            };
            let request = self.builder.build_transfer_request(
                &params,
                wallet_account.transaction_nonce,
                &proof,
            )?;

            let context = RejectionContext {
                instruction: request.operation,
                wallet: &session.wallet,
                nonce: Some(next_nonce),
                guardian_id: None,
            };
            match self.submit_and_confirm(&request, &context).await {
                Ok(transaction_id) => {
                    tracing::info!(
                        wallet = %session.wallet,
                        nonce = next_nonce,
                        amount,
                        destination = %destination,
                        transaction_id = %transaction_id,
                        "Transfer confirmed"
                    );
                    return Ok(TransferReceipt {
                        transaction_id,
                        nonce: next_nonce,
                        amount,
                        destination: *destination,
                    });
                }
                Err(err @ WalletError::StaleAuthorization { .. }) if attempt < MAX_STALE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(wallet = %session.wallet, nonce = next_nonce, error = %err, "Stale authorization, rebuilding");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn wallet_balance(&self, wallet: &Pubkey) -> WalletResult<u64> {
        let ledger = &self.ledger;
        self.retry
            .execute("get_balance", move || ledger.get_balance(wallet))
            .await
    }

    pub async fn fetch_wallet(&self, wallet: &Pubkey) -> WalletResult<WalletAccount> {
        let data = self.fetch_program_account(wallet).await?;
        WalletAccount::decode(&data)
    }

    pub async fn fetch_guardian(&self, wallet: &Pubkey, guardian_id: u64) -> WalletResult<GuardianAccount> {
        let (address, _) = address::guardian_address(self.builder.program_id(), wallet, guardian_id)?;
        let data = self.fetch_program_account(&address).await?;
        GuardianAccount::decode(&data)
    }

    async fn fetch_program_account(&self, address: &Pubkey) -> WalletResult<Vec<u8>> {
        let ledger = &self.ledger;
        let account = self
            .retry
            .execute("get_account", move || ledger.get_account(address))
            .await?
            .filter(|account| account.owner == *self.builder.program_id())
            .ok_or_else(|| WalletError::AccountNotFound {
                address: address.to_string(),
            })?;
        Ok(account.data)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Sign, send and wait for confirmation; rejections are classified with
    /// `context`.
    async fn submit_and_confirm(&self, request: &Request, context: &RejectionContext<'_>) -> WalletResult<String> {
        if !request.authorization_precedes_operation(self.builder.program_id()) {
            return Err(WalletError::Internal(format!(
                "{} request verifies after its operation",
                request.operation
            )));
        }
        // Nothing is signed once shut down; a sent transaction could not be confirmed.
        if self.is_shut_down() {
            return Err(WalletError::ConfirmationCancelled(format!(
                "{} (not submitted)",
                request.operation
            )));
        }

        let ledger = &self.ledger;
        let blockhash = self
            .retry
            .execute("get_latest_blockhash", move || ledger.get_latest_blockhash())
            .await?;
        let transaction = request.sign(blockhash, &self.fee_payer)?;
        let transaction = &transaction;

        let signature = self
            .retry
            .execute("send_transaction", move || ledger.send_transaction(transaction))
            .await
            .map_err(|err| classify_rejection(err, context))?;
        tracing::debug!(operation = request.operation, signature = %signature, "Transaction sent");

        self.confirm(&signature)
            .await
            .map_err(|err| classify_rejection(err, context))?;
        Ok(signature)
    }

    /// Poll until `signature` is confirmed, fails, times out or is cancelled.
    async fn confirm(&self, signature: &str) -> WalletResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;
        let ledger = &self.ledger;

        loop {
            if *shutdown_rx.borrow() {
                return Err(WalletError::ConfirmationCancelled(signature.to_string()));
            }

            let status = self
                .retry
                .execute("get_signature_status", move || {
                    ledger.get_signature_status(signature)
                })
                .await?;

            match status {
                SignatureStatus::Confirmed | SignatureStatus::Finalized => return Ok(()),
                SignatureStatus::Failed(reason) => {
                    return Err(WalletError::TransactionFailed {
                        signature: signature.to_string(),
                        reason,
                    });
                }
                SignatureStatus::Pending => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(WalletError::Timeout(format!(
                    "transaction {signature} not confirmed within {}ms",
                    self.confirmation_timeout.as_millis()
                )));
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
