//! Configuration derived from environment variables.
//!
//! Configuration is loaded once at startup and validated before use. The
//! same settings drive both the staging service binary and the in-process
//! orchestrator.
//!
//! ## Environment Variables
//!
//! ### Ledger
//! - `WALLET_PROGRAM_ID`: base58 id of the multisig wallet program (required)
//! - `LEDGER_RPC_URL`: JSON-RPC endpoint (default: http://127.0.0.1:8899)
//! - `RPC_REQUEST_TIMEOUT_MS`: per-request timeout (default: 30000)
//! - `VERIFIER_MODE`: "webauthn" or "raw" (default: webauthn)
//! - `CONFIRMATION_TIMEOUT_SECS`: confirmation polling budget (default: 60)
//! - `CONFIRMATION_POLL_MS`: interval between status polls (default: 500)
//!
//! ### Guardians
//! - `GUARDIAN_SCAN_LIMIT`: highest guardian id scanned (default: 8)
//! - `INVITE_TTL_SECS`: age after which pending invites are purged (default: 86400)
//!
//! ### Retries
//! - `RETRY_MAX_ATTEMPTS`: retries after the first attempt (default: 4)
//! - `RETRY_BASE_DELAY_MS` / `RETRY_MAX_DELAY_MS`: backoff bounds
//!
//! ### Staging service
//! - `STAGING_HOST`: bind address (default: :: for dual-stack IPv4/IPv6)
//! - `STAGING_PORT`: HTTP port (default: 5301)
//! - `STAGING_DB_PATH`: path to the ReDB database file
//! - `STAGING_URL`: base URL used by `HttpStagingStore` clients
//! - `INTERNAL_SERVICE_TOKEN`: shared secret for staging API callers
//! - `RUST_LOG`: log level filter

use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::{self, Pubkey};
use crate::retry::RetryPolicy;

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";
const DEFAULT_STAGING_PORT: u16 = 5301;
const DEFAULT_STAGING_URL: &str = "http://127.0.0.1:5301";
const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SCAN_LIMIT: u64 = 8;
const DEFAULT_INVITE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONFIRMATION_POLL_MS: u64 = 500;

/// Hard ceiling for `GUARDIAN_SCAN_LIMIT`; every lookup is one RPC round trip.
pub const MAX_SCAN_LIMIT: u64 = 64;

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get lowercase env var.
fn env_lower(name: &str) -> String {
    env_trim(name).to_lowercase()
}

/// Check if a string value is truthy.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

fn env_non_empty(name: &str) -> Option<String> {
    let value = env_trim(name);
    if value.is_empty() { None } else { Some(value) }
}

/// Which bytes the on-chain P-256 verifier checks the signature against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifierMode {
    /// `authenticatorData ‖ SHA256(clientDataJSON)`, as produced by WebAuthn assertions.
    #[default]
    Webauthn,
    /// The 32-byte canonical message hash.
    Raw,
}

impl FromStr for VerifierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webauthn" => Ok(Self::Webauthn),
            "raw" => Ok(Self::Raw),
            other => Err(format!(
                "Invalid verifier mode '{other}'. Must be 'webauthn' or 'raw'."
            )),
        }
    }
}

impl std::fmt::Display for VerifierMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webauthn => write!(f, "webauthn"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Wallet configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    // Ledger
    program_id: Option<Pubkey>,
    program_id_error: Option<String>,
    rpc_url: String,
    rpc_timeout_ms: u64,
    verifier_mode: VerifierMode,
    confirmation_timeout_secs: u64,
    confirmation_poll_ms: u64,

    // Guardians
    guardian_scan_limit: u64,
    invite_ttl_secs: u64,

    // Retries
    retry_max_attempts: u32,
    retry_base_delay_ms: u64,
    retry_max_delay_ms: u64,

    // Staging service
    host: IpAddr,
    port: u16,
    db_path: PathBuf,
    staging_url: String,
    internal_token: Option<String>,
    internal_token_required: bool,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Invalid values fall back to defaults, except the program id whose parse
    /// error is reported by [`Settings::validate`].
    pub fn from_env() -> Self {
        let (program_id, program_id_error) = match env_non_empty("WALLET_PROGRAM_ID") {
            Some(raw) => match address::parse_pubkey(&raw) {
                Ok(id) => (Some(id), None),
                Err(e) => (None, Some(format!("WALLET_PROGRAM_ID is invalid: {e}"))),
            },
            None => (None, None),
        };

        let rpc_url = env_non_empty("LEDGER_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let rpc_timeout_ms = env_trim("RPC_REQUEST_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MS);

        let verifier_mode = env_trim("VERIFIER_MODE")
            .parse::<VerifierMode>()
            .unwrap_or_default();

        let confirmation_timeout_secs = env_trim("CONFIRMATION_TIMEOUT_SECS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT_SECS);

        let confirmation_poll_ms = env_trim("CONFIRMATION_POLL_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_CONFIRMATION_POLL_MS);

        let guardian_scan_limit = env_trim("GUARDIAN_SCAN_LIMIT")
            .parse::<u64>()
            .unwrap_or(DEFAULT_SCAN_LIMIT);

        let invite_ttl_secs = env_trim("INVITE_TTL_SECS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_INVITE_TTL_SECS);

        let retry_max_attempts = env_trim("RETRY_MAX_ATTEMPTS")
            .parse::<u32>()
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS);
        let retry_base_delay_ms = env_trim("RETRY_BASE_DELAY_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS);
        let retry_max_delay_ms = env_trim("RETRY_MAX_DELAY_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS);

        // Default to IPv6 unspecified (::) for dual-stack support.
        let host = env_trim("STAGING_HOST")
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        let port = env_trim("STAGING_PORT")
            .parse::<u16>()
            .unwrap_or(DEFAULT_STAGING_PORT);

        let db_path = env_non_empty("STAGING_DB_PATH")
            .map_or_else(|| PathBuf::from("./.data/staging.redb"), PathBuf::from);

        let staging_url =
            env_non_empty("STAGING_URL").unwrap_or_else(|| DEFAULT_STAGING_URL.to_string());

        let internal_token = env_non_empty("INTERNAL_SERVICE_TOKEN");

        // Determine if token is required based on environment
        let is_production = ["NODE_ENV", "APP_ENV", "RUST_ENV"]
            .iter()
            .any(|name| env_lower(name) == "production");
        let internal_token_required =
            is_production || is_truthy(&env_lower("INTERNAL_SERVICE_TOKEN_REQUIRED"));

        Self {
            program_id,
            program_id_error,
            rpc_url,
            rpc_timeout_ms,
            verifier_mode,
            confirmation_timeout_secs,
            confirmation_poll_ms,
            guardian_scan_limit,
            invite_ttl_secs,
            retry_max_attempts,
            retry_base_delay_ms,
            retry_max_delay_ms,
            host,
            port,
            db_path,
            staging_url,
            internal_token,
            internal_token_required,
        }
    }

    /// Create settings for tests: fast retries, tiny confirmation interval.
    pub fn for_tests(program_id: Pubkey) -> Self {
        Self {
            program_id: Some(program_id),
            program_id_error: None,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            rpc_timeout_ms: 5_000,
            verifier_mode: VerifierMode::Webauthn,
            confirmation_timeout_secs: 5,
            confirmation_poll_ms: 1,
            guardian_scan_limit: DEFAULT_SCAN_LIMIT,
            invite_ttl_secs: DEFAULT_INVITE_TTL_SECS,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_STAGING_PORT,
            db_path: PathBuf::from("./.data/test-staging.redb"),
            staging_url: DEFAULT_STAGING_URL.to_string(),
            internal_token: None,
            internal_token_required: false,
        }
    }

    /// Override the verifier mode.
    #[must_use]
    pub fn with_verifier_mode(mut self, mode: VerifierMode) -> Self {
        self.verifier_mode = mode;
        self
    }

    /// Override the internal service token.
    #[must_use]
    pub fn with_internal_token(mut self, token: Option<String>, required: bool) -> Self {
        self.internal_token = token;
        self.internal_token_required = required;
        self
    }

    /// Override the guardian scan bound.
    #[must_use]
    pub fn with_guardian_scan_limit(mut self, limit: u64) -> Self {
        self.guardian_scan_limit = limit;
        self
    }

    /// Validate settings.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref message) = self.program_id_error {
            return Err(message.clone());
        }
        if self.program_id.is_none() {
            return Err("WALLET_PROGRAM_ID is required. \
                 Provide the base58 id of the deployed multisig wallet program."
                .to_string());
        }

        if self.guardian_scan_limit == 0 || self.guardian_scan_limit > MAX_SCAN_LIMIT {
            return Err(format!(
                "GUARDIAN_SCAN_LIMIT must be between 1 and {MAX_SCAN_LIMIT}, got {}",
                self.guardian_scan_limit
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err("RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS".to_string());
        }

        self.validate_staging()
    }

    /// Validate only what the staging service needs.
    ///
    /// The service stores opaque staging records and never talks to the
    /// ledger, so no program id is required.
    pub fn validate_staging(&self) -> Result<(), String> {
        if self.internal_token_required && self.internal_token.is_none() {
            return Err("INTERNAL_SERVICE_TOKEN is required in production. \
                 Set INTERNAL_SERVICE_TOKEN or INTERNAL_SERVICE_TOKEN_REQUIRED=0."
                .to_string());
        }

        Ok(())
    }

    // Getters

    pub fn program_id(&self) -> Option<Pubkey> {
        self.program_id
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn verifier_mode(&self) -> VerifierMode {
        self.verifier_mode
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }

    pub fn guardian_scan_limit(&self) -> u64 {
        self.guardian_scan_limit
    }

    pub fn invite_ttl(&self) -> Duration {
        Duration::from_secs(self.invite_ttl_secs)
    }

    /// Backoff policy for transient network failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential()
            .with_max_attempts(self.retry_max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_timeout(self.rpc_timeout())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn staging_url(&self) -> &str {
        &self.staging_url
    }

    pub fn internal_token(&self) -> Option<&str> {
        self.internal_token.as_deref()
    }

    pub fn internal_token_required(&self) -> bool {
        self.internal_token_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_mode_parsing() {
        assert_eq!(
            "webauthn".parse::<VerifierMode>().unwrap(),
            VerifierMode::Webauthn
        );
        assert_eq!("RAW".parse::<VerifierMode>().unwrap(), VerifierMode::Raw);
        assert!("both".parse::<VerifierMode>().is_err());
    }

    #[test]
    fn test_settings_validation() {
        let settings = Settings::for_tests(Pubkey::new_from_array([9; 32]));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_scan_limit_bounds() {
        let program_id = Pubkey::new_from_array([9; 32]);
        let settings = Settings::for_tests(program_id).with_guardian_scan_limit(0);
        assert!(settings.validate().is_err());

        let settings =
            Settings::for_tests(program_id).with_guardian_scan_limit(MAX_SCAN_LIMIT + 1);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_required_token_must_be_configured() {
        let program_id = Pubkey::new_from_array([9; 32]);
        let settings = Settings::for_tests(program_id).with_internal_token(None, true);
        assert!(settings.validate_staging().is_err());
        assert!(settings.validate().is_err());

        let settings =
            Settings::for_tests(program_id).with_internal_token(Some("secret".to_string()), true);
        assert!(settings.validate_staging().is_ok());
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let settings = Settings::for_tests(Pubkey::new_from_array([9; 32]));
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(1));
    }
}
