//! The staging store contract and its embedded implementation.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{CredentialBinding, InviteQuery, InviteRecord, StagedRegistration};
use crate::error::WalletResult;
use crate::retry::RetryPolicy;
use crate::storage::{Collection, Storage};

/// Key-value staging shared between the owner device and invited devices.
///
/// Three collections: invitations and staged registrations keyed by invite
/// code, credential bindings keyed by base64url credential id.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn put_invite(&self, invite: &InviteRecord) -> WalletResult<()>;

    async fn get_invite(&self, invite_code: &str) -> WalletResult<Option<InviteRecord>>;

    /// Returns whether the invite existed.
    async fn delete_invite(&self, invite_code: &str) -> WalletResult<bool>;

    async fn list_invites(&self, query: &InviteQuery) -> WalletResult<Vec<InviteRecord>>;

    async fn put_registration(&self, registration: &StagedRegistration) -> WalletResult<()>;

    async fn get_registration(&self, invite_code: &str) -> WalletResult<Option<StagedRegistration>>;

    async fn delete_registration(&self, invite_code: &str) -> WalletResult<bool>;

    async fn put_credential(&self, binding: &CredentialBinding) -> WalletResult<()>;

    async fn get_credential(&self, credential_id: &str) -> WalletResult<Option<CredentialBinding>>;
}

/// [`StagingStore`] over the embedded redb database.
#[derive(Clone)]
pub struct RedbStagingStore {
    storage: Storage,
}

impl RedbStagingStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl StagingStore for RedbStagingStore {
    async fn put_invite(&self, invite: &InviteRecord) -> WalletResult<()> {
        self.storage
            .put(Collection::Invites, &invite.invite_code, invite)
    }

    async fn get_invite(&self, invite_code: &str) -> WalletResult<Option<InviteRecord>> {
        self.storage.get(Collection::Invites, invite_code)
    }

    async fn delete_invite(&self, invite_code: &str) -> WalletResult<bool> {
        self.storage.delete(Collection::Invites, invite_code)
    }

    async fn list_invites(&self, query: &InviteQuery) -> WalletResult<Vec<InviteRecord>> {
        let invites = self
            .storage
            .list::<InviteRecord>(Collection::Invites)?
            .into_iter()
            .map(|(_, invite)| invite)
            .filter(|invite| query.matches(invite))
            .collect();
        Ok(invites)
    }

    async fn put_registration(&self, registration: &StagedRegistration) -> WalletResult<()> {
        self.storage.put(
            Collection::Registrations,
            &registration.invite_code,
            registration,
        )
    }

    async fn get_registration(&self, invite_code: &str) -> WalletResult<Option<StagedRegistration>> {
        self.storage.get(Collection::Registrations, invite_code)
    }

    async fn delete_registration(&self, invite_code: &str) -> WalletResult<bool> {
        self.storage.delete(Collection::Registrations, invite_code)
    }

    async fn put_credential(&self, binding: &CredentialBinding) -> WalletResult<()> {
        self.storage
            .put(Collection::Credentials, &binding.credential_id, binding)
    }

    async fn get_credential(&self, credential_id: &str) -> WalletResult<Option<CredentialBinding>> {
        self.storage.get(Collection::Credentials, credential_id)
    }
}

/// Runs every call of another store through a [`RetryPolicy`], so an
/// unreachable staging service is retried with backoff before it surfaces.
#[derive(Clone)]
pub struct RetryingStore {
    inner: Arc<dyn StagingStore>,
    retry: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn StagingStore>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &Arc<dyn StagingStore> {
        &self.inner
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[async_trait]
impl StagingStore for RetryingStore {
    async fn put_invite(&self, invite: &InviteRecord) -> WalletResult<()> {
        let inner = &self.inner;
        self.retry
            .execute("put_invite", move || inner.put_invite(invite))
            .await
    }

    async fn get_invite(&self, invite_code: &str) -> WalletResult<Option<InviteRecord>> {
        let inner = &self.inner;
        self.retry
            .execute("get_invite", move || inner.get_invite(invite_code))
            .await
    }

    async fn delete_invite(&self, invite_code: &str) -> WalletResult<bool> {
        let inner = &self.inner;
        self.retry
            .execute("delete_invite", move || inner.delete_invite(invite_code))
            .await
    }

    async fn list_invites(&self, query: &InviteQuery) -> WalletResult<Vec<InviteRecord>> {
        let inner = &self.inner;
        self.retry
            .execute("list_invites", move || inner.list_invites(query))
            .await
    }

    async fn put_registration(&self, registration: &StagedRegistration) -> WalletResult<()> {
        let inner = &self.inner;
        self.retry
            .execute("put_registration", move || inner.put_registration(registration))
            .await
    }

    async fn get_registration(&self, invite_code: &str) -> WalletResult<Option<StagedRegistration>> {
        let inner = &self.inner;
        self.retry
            .execute("get_registration", move || inner.get_registration(invite_code))
            .await
    }

    async fn delete_registration(&self, invite_code: &str) -> WalletResult<bool> {
        let inner = &self.inner;
        self.retry
            .execute("delete_registration", move || {
                inner.delete_registration(invite_code)
            })
            .await
    }

    async fn put_credential(&self, binding: &CredentialBinding) -> WalletResult<()> {
        let inner = &self.inner;
        self.retry
            .execute("put_credential", move || inner.put_credential(binding))
            .await
    }

    async fn get_credential(&self, credential_id: &str) -> WalletResult<Option<CredentialBinding>> {
        let inner = &self.inner;
        self.retry
            .execute("get_credential", move || inner.get_credential(credential_id))
            .await
    }
}
