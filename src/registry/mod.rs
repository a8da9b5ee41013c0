//! Guardian lifecycle: id scanning and allocation, invitations, staged
//! registrations and on-chain installation.
//!
//! ```text
//! pending --submit_registration--> ready --finalize + mark_completed--> completed --finish_completed--> (erased)
//!    \______________________ purge_expired / cancel_invite ______________________/
//! ```
//!
//! Staging records are always written before their invitation, so a reader
//! that sees a `ready` invitation can rely on its registration being present.
//! A `completed` invitation still holding records is a partially finished
//! installation; [`GuardianRegistry::finish_completed`] picks it up again.

pub mod http;
pub mod store;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;

pub use self::http::HttpStagingStore;
pub use self::store::{RedbStagingStore, RetryingStore, StagingStore};
pub use self::types::{
    CredentialBinding, CredentialRegistration, InviteQuery, InviteRecord, InviteStatus,
    StagedRegistration, encode_credential_id,
};
use crate::address::{self, Pubkey};
use crate::builder::{Request, TransactionBuilder, validate_guardian_name};
use crate::codec::{self, COMPRESSED_KEY_LEN};
use crate::config::Settings;
use crate::error::{WalletError, WalletResult};
use crate::ledger::{GuardianAccount, LedgerClient};
use crate::retry::RetryPolicy;

/// Guardian id reserved for the wallet owner.
pub const OWNER_GUARDIAN_ID: u64 = 1;

/// Default number of guardian ids scanned per wallet.
pub const DEFAULT_SCAN_LIMIT: u64 = 8;

const GENERATED_CODE_LEN: usize = 8;
const MAX_INVITE_CODE_LEN: usize = 64;

/// An `add_guardian` request waiting for submission, plus what
/// [`GuardianRegistry::mark_completed`] needs once it confirms.
#[derive(Debug, Clone)]
pub struct PendingInstall {
    pub invite_code: String,
    pub wallet: Pubkey,
    pub guardian_id: u64,
    pub guardian_address: Pubkey,
    pub credential_id: Vec<u8>,
    pub public_key: [u8; COMPRESSED_KEY_LEN],
    pub request: Request,
}

pub struct GuardianRegistry {
    program_id: Pubkey,
    builder: TransactionBuilder,
    ledger: Arc<dyn LedgerClient>,
    store: RetryingStore,
    retry: RetryPolicy,
    scan_limit: u64,
    invite_ttl: chrono::Duration,
}

impl GuardianRegistry {
    pub fn new(program_id: Pubkey, ledger: Arc<dyn LedgerClient>, store: Arc<dyn StagingStore>) -> Self {
        Self {
            program_id,
            builder: TransactionBuilder::new(program_id),
            ledger,
            store: RetryingStore::new(store, RetryPolicy::exponential()),
            retry: RetryPolicy::exponential(),
            scan_limit: DEFAULT_SCAN_LIMIT,
            invite_ttl: chrono::Duration::hours(24),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn StagingStore>,
    ) -> WalletResult<Self> {
        let program_id = settings
            .program_id()
            .ok_or_else(|| WalletError::Validation("WALLET_PROGRAM_ID is not set".to_string()))?;
        let invite_ttl = chrono::Duration::from_std(settings.invite_ttl())
            .map_err(|e| WalletError::Validation(format!("invite TTL out of range: {e}")))?;

        Ok(Self::new(program_id, ledger, store)
            .with_scan_limit(settings.guardian_scan_limit())
            .with_invite_ttl(invite_ttl)
            .with_retry_policy(settings.retry_policy()))
    }

    #[must_use]
    pub fn with_scan_limit(mut self, scan_limit: u64) -> Self {
        self.scan_limit = scan_limit.max(1);
        self
    }

    #[must_use]
    pub fn with_invite_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.invite_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.store = RetryingStore::new(self.store.inner().clone(), retry.clone());
        self.retry = retry;
        self
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn invite_ttl(&self) -> chrono::Duration {
        self.invite_ttl
    }

    pub fn store(&self) -> &RetryingStore {
        &self.store
    }

    // =========================================================================
    // Guardian ids
    // =========================================================================

    /// Ids in `1..=scan_limit` whose guardian account exists and is owned
    /// by the wallet program.
    pub async fn list_existing_guardian_ids(&self, wallet: &Pubkey) -> WalletResult<BTreeSet<u64>> {
        let lookups = (1..=self.scan_limit).map(|guardian_id| async move {
            let (guardian, _) = address::guardian_address(&self.program_id, wallet, guardian_id)?;
            let account = self
                .retry
                .execute("get_account", || self.ledger.get_account(&guardian))
                .await?;
            Ok::<_, WalletError>(
                account
                    .filter(|account| account.owner == self.program_id)
                    .map(|_| guardian_id),
            )
        });

        let existing: BTreeSet<u64> = try_join_all(lookups).await?.into_iter().flatten().collect();
        tracing::debug!(wallet = %wallet, ?existing, "Scanned guardian ids");
        Ok(existing)
    }

    /// Smallest id not in `existing`, never below 2.
    ///
    /// Advisory only: two callers may pick the same id, and the second
    /// installation fails on-chain with an allocation conflict.
    pub fn allocate_new_guardian_id(existing: &BTreeSet<u64>) -> u64 {
        let mut candidate = OWNER_GUARDIAN_ID + 1;
        while existing.contains(&candidate) {
            candidate += 1;
        }
        candidate
    }

    /// On-chain ids plus ids proposed by other open invites of `wallet`.
    async fn taken_guardian_ids(&self, wallet: &Pubkey, skip_invite: Option<&str>) -> WalletResult<BTreeSet<u64>> {
        let mut taken = self.list_existing_guardian_ids(wallet).await?;
        let open = self
            .store
            .list_invites(&InviteQuery {
                wallet: Some(*wallet),
                ..InviteQuery::default()
            })
            .await?;
        taken.extend(
            open.iter()
                .filter(|invite| invite.status != InviteStatus::Completed)
                .filter(|invite| Some(invite.invite_code.as_str()) != skip_invite)
                .map(|invite| invite.guardian_id),
        );
        Ok(taken)
    }

    // =========================================================================
    // Invitations
    // =========================================================================

    /// Create a `pending` invitation proposing a fresh guardian id.
    ///
    /// `invite_code` is generated when not supplied.
    pub async fn create_invite(
        &self,
        wallet: &Pubkey,
        owner_id: &str,
        invite_code: Option<&str>,
    ) -> WalletResult<InviteRecord> {
        if owner_id.trim().is_empty() {
            return Err(WalletError::Validation("owner id must not be empty".to_string()));
        }

        let ledger = &self.ledger;
        let wallet_account = self
            .retry
            .execute("get_account", move || ledger.get_account(wallet))
            .await?;
        if !wallet_account.is_some_and(|account| account.owner == self.program_id) {
            return Err(WalletError::AccountNotFound {
                address: wallet.to_string(),
            });
        }

        let invite_code = match invite_code {
            Some(code) => {
                validate_invite_code(code)?;
                code.to_string()
            }
            None => generate_invite_code(),
        };
        if self.store.get_invite(&invite_code).await?.is_some() {
            return Err(WalletError::Validation(format!(
                "invite code {invite_code} is already in use"
            )));
        }

        let taken = self.taken_guardian_ids(wallet, None).await?;
        let guardian_id = Self::allocate_new_guardian_id(&taken);

        let invite = InviteRecord::new(invite_code, *wallet, guardian_id, owner_id.to_string());
        self.store.put_invite(&invite).await?;

        tracing::info!(
            invite_code = %invite.invite_code,
            wallet = %wallet,
            guardian_id,
            "Created guardian invite"
        );
        Ok(invite)
    }

    pub async fn get_invite(&self, invite_code: &str) -> WalletResult<InviteRecord> {
        self.store
            .get_invite(invite_code)
            .await?
            .ok_or_else(|| WalletError::InviteNotFound(invite_code.to_string()))
    }

    /// Stage an invited device's credential and move the invite to `ready`.
    ///
    /// Only the phrase hash and compressed key are staged.
    pub async fn submit_registration(
        &self,
        invite_code: &str,
        registration: &CredentialRegistration,
        name: &str,
        recovery_phrase: &str,
    ) -> WalletResult<StagedRegistration> {
        let mut invite = self.get_invite(invite_code).await?;
        invite.ensure_status(InviteStatus::Pending)?;

        validate_guardian_name(name)?;
        if registration.credential_id.is_empty() {
            return Err(WalletError::Validation("credential id must not be empty".to_string()));
        }
        let recovery_hash = codec::hash_recovery_phrase(recovery_phrase)?;
        let public_key = codec::compress_point(&registration.public_key)?;

        let staged = StagedRegistration {
            invite_code: invite_code.to_string(),
            status: InviteStatus::Ready,
            credential_id: encode_credential_id(&registration.credential_id),
            public_key: hex::encode(public_key),
            name: name.to_string(),
            recovery_hash: hex::encode(recovery_hash),
            submitted_at: Utc::now(),
        };
        self.store.put_registration(&staged).await?;

        invite.status = InviteStatus::Ready;
        self.store.put_invite(&invite).await?;

        tracing::info!(
            invite_code,
            wallet = %invite.wallet,
            guardian_id = invite.guardian_id,
            public_key = %codec::short_hex(&public_key),
            "Guardian registration staged"
        );
        Ok(staged)
    }

    /// Codes of `ready` invites for `owner_id` on `wallet`, sorted.
    pub async fn list_ready_invites(&self, owner_id: &str, wallet: &Pubkey) -> WalletResult<Vec<String>> {
        let invites = self
            .store
            .list_invites(&InviteQuery {
                owner_id: Some(owner_id.to_string()),
                wallet: Some(*wallet),
                status: Some(InviteStatus::Ready),
            })
            .await?;

        let mut codes: Vec<String> = invites.into_iter().map(|invite| invite.invite_code).collect();
        codes.sort();
        Ok(codes)
    }

    // =========================================================================
    // Installation
    // =========================================================================

    /// Build the `add_guardian` request for a `ready` invite.
    ///
    /// Nothing is written; call [`Self::mark_completed`] once the request
    /// has confirmed on-chain.
    pub async fn finalize(&self, invite_code: &str, fee_payer: &Pubkey) -> WalletResult<PendingInstall> {
        let invite = self.get_invite(invite_code).await?;
        invite.ensure_status(InviteStatus::Ready)?;

        let staged = self
            .store
            .get_registration(invite_code)
            .await?
            .ok_or_else(|| WalletError::InvalidInviteState {
                invite_code: invite_code.to_string(),
                expected: "ready with staged registration".to_string(),
                actual: "ready without staged registration".to_string(),
            })?;

        let public_key = staged.public_key_bytes()?;
        let recovery_hash = staged.recovery_hash_bytes()?;
        let (guardian_address, _) =
            address::guardian_address(&self.program_id, &invite.wallet, invite.guardian_id)?;

        let request = self.builder.build_add_guardian_request(
            &invite.wallet,
            &guardian_address,
            invite.guardian_id,
            &staged.name,
            recovery_hash,
            false,
            Some(public_key),
            fee_payer,
        )?;

        Ok(PendingInstall {
            invite_code: invite_code.to_string(),
            wallet: invite.wallet,
            guardian_id: invite.guardian_id,
            guardian_address,
            credential_id: staged.credential_id_bytes()?,
            public_key,
            request,
        })
    }

    /// Pick a new id for an invite whose proposed id was taken on-chain.
    pub async fn reassign_guardian_id(&self, invite_code: &str) -> WalletResult<u64> {
        let mut invite = self.get_invite(invite_code).await?;
        invite.ensure_status(InviteStatus::Ready)?;

        let mut taken = self
            .taken_guardian_ids(&invite.wallet, Some(invite_code))
            .await?;
        taken.insert(invite.guardian_id);
        let guardian_id = Self::allocate_new_guardian_id(&taken);

        tracing::warn!(
            invite_code,
            wallet = %invite.wallet,
            conflicting_id = invite.guardian_id,
            guardian_id,
            "Reassigning guardian id after allocation conflict"
        );
        invite.guardian_id = guardian_id;
        self.store.put_invite(&invite).await?;
        Ok(guardian_id)
    }

    /// Whether the guardian `install` would create already exists on-chain
    /// with the same wallet and key.
    ///
    /// True after a confirmed submission whose staging bookkeeping never
    /// landed; resubmitting would fail with an allocation conflict.
    pub async fn is_installed(&self, install: &PendingInstall) -> WalletResult<bool> {
        let ledger = &self.ledger;
        let address = &install.guardian_address;
        let account = self
            .retry
            .execute("get_account", move || ledger.get_account(address))
            .await?;

        let Some(account) = account.filter(|account| account.owner == self.program_id) else {
            return Ok(false);
        };
        Ok(GuardianAccount::decode(&account.data).is_ok_and(|guardian| {
            guardian.wallet == install.wallet
                && guardian.guardian_id == install.guardian_id
                && guardian.public_key == Some(install.public_key)
        }))
    }

    /// Record a confirmed installation, then bind the credential and erase
    /// the staged material through [`Self::finish_completed`].
    ///
    /// `transaction_id` is `None` when the guardian was found on-chain
    /// without a submission of ours to point at.
    pub async fn mark_completed(&self, install: &PendingInstall, transaction_id: Option<&str>) -> WalletResult<()> {
        let mut invite = self.get_invite(&install.invite_code).await?;

        if invite.status != InviteStatus::Completed {
            if let Some(mut staged) = self.store.get_registration(&install.invite_code).await? {
                staged.status = InviteStatus::Completed;
                self.store.put_registration(&staged).await?;
            }

            invite.status = InviteStatus::Completed;
            invite.guardian_id = install.guardian_id;
            invite.completed_at = Some(Utc::now());
            invite.transaction_id = transaction_id.map(str::to_string);
            self.store.put_invite(&invite).await?;
        }

        self.finish_completed(&install.invite_code).await?;
        tracing::info!(
            invite_code = %install.invite_code,
            wallet = %install.wallet,
            guardian_id = install.guardian_id,
            transaction_id,
            "Guardian installed"
        );
        Ok(())
    }

    /// Bind the credential of a `completed` invite and erase its staging
    /// records. Repeating it after a partial failure is harmless.
    ///
    /// Returns the completed invite as it was before erasure.
    pub async fn finish_completed(&self, invite_code: &str) -> WalletResult<InviteRecord> {
        let invite = self.get_invite(invite_code).await?;
        invite.ensure_status(InviteStatus::Completed)?;

        // The registration is erased only after the binding is written.
        if let Some(staged) = self.store.get_registration(invite_code).await? {
            self.bind_credential(&CredentialBinding::new(
                &staged.credential_id_bytes()?,
                invite.wallet,
                invite.guardian_id,
                &staged.public_key_bytes()?,
            ))
            .await?;
            self.store.delete_registration(invite_code).await?;
        }
        self.store.delete_invite(invite_code).await?;

        Ok(invite)
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Delete invites older than the TTL that are still `pending`, and
    /// finish any `completed` invite left behind by an interrupted
    /// installation.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> WalletResult<Vec<String>> {
        let invites = self.store.list_invites(&InviteQuery::default()).await?;

        for invite in invites
            .iter()
            .filter(|invite| invite.status == InviteStatus::Completed)
        {
            self.finish_completed(&invite.invite_code).await?;
            tracing::info!(invite_code = %invite.invite_code, "Finished interrupted installation");
        }

        let mut purged = Vec::new();
        for invite in invites
            .into_iter()
            .filter(|invite| invite.is_expired_pending(self.invite_ttl, now))
        {
            self.store.delete_registration(&invite.invite_code).await?;
            self.store.delete_invite(&invite.invite_code).await?;
            purged.push(invite.invite_code);
        }

        if !purged.is_empty() {
            tracing::info!(count = purged.len(), "Purged expired invites");
        }
        Ok(purged)
    }

    /// Withdraw an invite; only its owner may do so.
    pub async fn cancel_invite(&self, invite_code: &str, owner_id: &str) -> WalletResult<()> {
        let invite = self.get_invite(invite_code).await?;
        if invite.owner_id != owner_id {
            return Err(WalletError::Unauthorized);
        }

        self.store.delete_registration(invite_code).await?;
        self.store.delete_invite(invite_code).await?;
        tracing::info!(invite_code, wallet = %invite.wallet, "Cancelled guardian invite");
        Ok(())
    }

    // =========================================================================
    // Credential bindings
    // =========================================================================

    pub async fn bind_credential(&self, binding: &CredentialBinding) -> WalletResult<()> {
        self.store.put_credential(binding).await?;
        tracing::debug!(
            wallet = %binding.wallet,
            guardian_id = binding.guardian_id,
            "Bound credential"
        );
        Ok(())
    }

    /// The wallet and guardian a credential signs for.
    pub async fn resolve_credential(&self, credential_id: &[u8]) -> WalletResult<CredentialBinding> {
        let key = encode_credential_id(credential_id);
        let binding = self.store.get_credential(&key).await?;
        binding.ok_or(WalletError::CredentialNotFound(key))
    }
}

/// Eight uppercase alphanumerics drawn from a random UUID.
pub fn generate_invite_code() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(GENERATED_CODE_LEN)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Caller-chosen codes are path segments: ASCII alphanumerics, `-` and `_`.
pub fn validate_invite_code(code: &str) -> WalletResult<()> {
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if code.is_empty() || code.len() > MAX_INVITE_CODE_LEN || !valid_chars {
        return Err(WalletError::Validation(format!(
            "invite code must be 1..={MAX_INVITE_CODE_LEN} characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}
