//! [`StagingStore`] client for the remote staging service.
//!
//! The owner device and the invited device never talk to each other; both
//! read and write the same staging service through this client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::store::StagingStore;
use super::types::{CredentialBinding, InviteQuery, InviteRecord, StagedRegistration};
use crate::config::Settings;
use crate::error::{WalletError, WalletResult};

pub struct HttpStagingStore {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStagingStore {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> WalletResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Client for `STAGING_URL`, presenting the internal token when one is set.
    pub fn from_settings(settings: &Settings) -> WalletResult<Self> {
        Self::new(
            settings.staging_url(),
            settings.internal_token().map(ToString::to_string),
            settings.rpc_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> WalletResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(WalletError::from)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(what, %status, "Staging service request failed");
        Err(match status {
            StatusCode::UNAUTHORIZED => WalletError::Unauthorized,
            StatusCode::CONFLICT => WalletError::Validation(format!("{what}: {error_text}")),
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                WalletError::Network(format!("{what} returned HTTP {s}"))
            }
            s => WalletError::Internal(format!("{what} returned HTTP {s}: {error_text}")),
        })
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str, what: &str) -> WalletResult<Option<T>> {
        let response = self.send(self.http_client.get(self.url(path)), what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response.json().await.map(Some).map_err(|e| {
            WalletError::Deserialization(format!("Failed to parse {what} response: {e}"))
        })
    }

    async fn put_json<T: serde::Serialize + Sync>(&self, path: &str, body: &T, what: &str) -> WalletResult<()> {
        let response = self
            .send(self.http_client.put(self.url(path)).json(body), what)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WalletError::Internal(format!("{what}: route not found")));
        }
        Ok(())
    }

    async fn delete(&self, path: &str, what: &str) -> WalletResult<bool> {
        let response = self
            .send(self.http_client.delete(self.url(path)), what)
            .await?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }
}

#[async_trait]
impl StagingStore for HttpStagingStore {
    async fn put_invite(&self, invite: &InviteRecord) -> WalletResult<()> {
        self.put_json(&format!("/invites/{}", invite.invite_code), invite, "put_invite")
            .await
    }

    async fn get_invite(&self, invite_code: &str) -> WalletResult<Option<InviteRecord>> {
        self.get_optional(&format!("/invites/{invite_code}"), "get_invite")
            .await
    }

    async fn delete_invite(&self, invite_code: &str) -> WalletResult<bool> {
        self.delete(&format!("/invites/{invite_code}"), "delete_invite")
            .await
    }

    async fn list_invites(&self, query: &InviteQuery) -> WalletResult<Vec<InviteRecord>> {
        let request = self.http_client.get(self.url("/invites")).query(query);
        let response = self.send(request, "list_invites").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        response.json().await.map_err(|e| {
            WalletError::Deserialization(format!("Failed to parse list_invites response: {e}"))
        })
    }

    async fn put_registration(&self, registration: &StagedRegistration) -> WalletResult<()> {
        self.put_json(
            &format!("/registrations/{}", registration.invite_code),
            registration,
            "put_registration",
        )
        .await
    }

    async fn get_registration(&self, invite_code: &str) -> WalletResult<Option<StagedRegistration>> {
        self.get_optional(&format!("/registrations/{invite_code}"), "get_registration")
            .await
    }

    async fn delete_registration(&self, invite_code: &str) -> WalletResult<bool> {
        self.delete(&format!("/registrations/{invite_code}"), "delete_registration")
            .await
    }

    async fn put_credential(&self, binding: &CredentialBinding) -> WalletResult<()> {
        self.put_json(
            &format!("/credentials/{}", binding.credential_id),
            binding,
            "put_credential",
        )
        .await
    }

    async fn get_credential(&self, credential_id: &str) -> WalletResult<Option<CredentialBinding>> {
        self.get_optional(&format!("/credentials/{credential_id}"), "get_credential")
            .await
    }
}
