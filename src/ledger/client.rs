//! Ledger access: the [`LedgerClient`] seam and its JSON-RPC implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::message::{Hash, Transaction, TransactionExt};
use crate::address::{self, Pubkey};
use crate::config::Settings;
use crate::error::{WalletError, WalletResult};

/// Account state as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
    pub executable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Unknown to the cluster or not yet at the requested commitment.
    Pending,
    Confirmed,
    Finalized,
    Failed(String),
}

/// Network operations the wallet core needs from the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// `None` when no account exists at `address`.
    async fn get_account(&self, address: &Pubkey) -> WalletResult<Option<AccountInfo>>;

    async fn get_balance(&self, address: &Pubkey) -> WalletResult<u64>;

    async fn get_latest_blockhash(&self) -> WalletResult<Hash>;

    /// Submit a signed transaction and return its id (base58 signature).
    ///
    /// Preflight rejections surface as [`WalletError::LedgerRejected`].
    async fn send_transaction(&self, transaction: &Transaction) -> WalletResult<String>;

    async fn get_signature_status(&self, signature: &str) -> WalletResult<SignatureStatus>;
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct RpcAccount {
    lamports: u64,
    owner: String,
    data: (String, String),
    executable: bool,
}

#[derive(Deserialize)]
struct RpcBlockhash {
    blockhash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSignatureStatus {
    confirmation_status: Option<String>,
    err: Option<Value>,
}

/// [`LedgerClient`] over the ledger's JSON-RPC API.
pub struct RpcLedgerClient {
    http_client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("Failed to build RPC client: {e}")))?;

        Ok(Self {
            http_client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_settings(settings: &Settings) -> WalletResult<Self> {
        Self::new(settings.rpc_url(), settings.rpc_timeout())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> WalletResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(WalletError::from)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(WalletError::Network(format!(
                "{method} returned HTTP {status}"
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(WalletError::Internal(format!(
                "{method} returned HTTP {status}: {error_text}"
            )));
        }

        let parsed: RpcResponse<T> = response.json().await.map_err(|e| {
            WalletError::Deserialization(format!("Failed to parse {method} response: {e}"))
        })?;

        if let Some(error) = parsed.error {
            let logs = error
                .data
                .as_ref()
                .and_then(|data| data.get("logs"))
                .map(Value::to_string)
                .unwrap_or_default();
            tracing::debug!(method, code = error.code, logs = %logs, "RPC error");
            return Err(WalletError::LedgerRejected {
                instruction: method.to_string(),
                reason: format!("{} (code {}) {logs}", error.message, error.code)
                    .trim_end()
                    .to_string(),
            });
        }

        Ok(parsed.result)
    }

    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> WalletResult<T> {
        self.call(method, params).await?.ok_or_else(|| {
            WalletError::Deserialization(format!("{method} response has no result"))
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_account(&self, address: &Pubkey) -> WalletResult<Option<AccountInfo>> {
        let response: WithContext<Option<RpcAccount>> = self
            .call_required(
                "getAccountInfo",
                json!([address.to_string(), {"encoding": "base64", "commitment": "confirmed"}]),
            )
            .await?;

        let Some(account) = response.value else {
            return Ok(None);
        };

        let data = BASE64.decode(&account.data.0).map_err(|e| {
            WalletError::Deserialization(format!("account {address} data is not base64: {e}"))
        })?;

        Ok(Some(AccountInfo {
            lamports: account.lamports,
            owner: address::parse_pubkey(&account.owner)?,
            data,
            executable: account.executable,
        }))
    }

    async fn get_balance(&self, address: &Pubkey) -> WalletResult<u64> {
        let response: WithContext<u64> = self
            .call_required(
                "getBalance",
                json!([address.to_string(), {"commitment": "confirmed"}]),
            )
            .await?;
        Ok(response.value)
    }

    async fn get_latest_blockhash(&self) -> WalletResult<Hash> {
        let response: WithContext<RpcBlockhash> = self
            .call_required("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
            .await?;
        response.value.blockhash.parse().map_err(|e| {
            WalletError::Deserialization(format!(
                "invalid blockhash {}: {e}",
                response.value.blockhash
            ))
        })
    }

    async fn send_transaction(&self, transaction: &Transaction) -> WalletResult<String> {
        let encoded = transaction.to_base64()?;
        self.call_required(
            "sendTransaction",
            json!([encoded, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
        )
        .await
    }

    async fn get_signature_status(&self, signature: &str) -> WalletResult<SignatureStatus> {
        let response: WithContext<Vec<Option<RpcSignatureStatus>>> = self
            .call_required(
                "getSignatureStatuses",
                json!([[signature], {"searchTransactionHistory": true}]),
            )
            .await?;

        let Some(Some(status)) = response.value.into_iter().next() else {
            return Ok(SignatureStatus::Pending);
        };

        if let Some(err) = status.err {
            return Ok(SignatureStatus::Failed(err.to_string()));
        }

        Ok(match status.confirmation_status.as_deref() {
            Some("finalized") => SignatureStatus::Finalized,
            Some("confirmed") => SignatureStatus::Confirmed,
            _ => SignatureStatus::Pending,
        })
    }
}
