//! Error types for the guardian wallet core and staging service.
//!
//! Every error is classified as fatal, retryable, or not-found so that the
//! orchestrator can decide between surfacing, retrying, and driving UI state.
//! All errors implement `ResponseError` for the staging service.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Wallet error type with structured context.
#[derive(Error, Debug)]
pub enum WalletError {
    // Rejected before anything is signed
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Recovery phrase too short: need at least {min} characters, got {actual}")]
    RecoveryPhraseTooShort { min: usize, actual: usize },

    #[error("Guardian name must be 1..={max} bytes, got {len}")]
    InvalidGuardianName { len: usize, max: usize },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid threshold {threshold}: must be between 1 and {max}")]
    InvalidThreshold { threshold: u8, max: u8 },

    // Codec
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    // Addressing
    #[error("No valid program address found for program {program_id}")]
    AddressDerivationExhausted { program_id: String },

    // Retryable conflicts
    #[error("Guardian id {guardian_id} already allocated on wallet {wallet}")]
    AllocationConflict { wallet: String, guardian_id: u64 },

    #[error("Stale authorization for wallet {wallet} at nonce {supplied_nonce}: {reason}")]
    StaleAuthorization {
        wallet: String,
        supplied_nonce: u64,
        reason: String,
    },

    // Lookup errors
    #[error("Account not found: {address}")]
    AccountNotFound { address: String },

    #[error("Invite not found: {0}")]
    InviteNotFound(String),

    #[error("Credential not bound to any wallet: {0}")]
    CredentialNotFound(String),

    #[error("Invalid invite state for {invite_code}: expected {expected}, got {actual}")]
    InvalidInviteState {
        invite_code: String,
        expected: String,
        actual: String,
    },

    // Ledger errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Confirmation cancelled for transaction {0}")]
    ConfirmationCancelled(String),

    #[error("Transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("Ledger rejected request in {instruction}: {reason}")]
    LedgerRejected { instruction: String, reason: String },

    #[error("Authenticator error: {0}")]
    Authenticator(String),

    // Staging store
    #[error("Storage error: {0}")]
    Storage(String),

    // Wire formats
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unauthorized")]
    Unauthorized,

    // Bugs and misconfiguration
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Report immediately, never retry.
    Fatal,
    /// Retry after refreshing state or backing off.
    Retryable,
    /// The thing does not exist yet; drive UI state instead of retrying.
    NotFound,
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl WalletError {
    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AllocationConflict { .. }
            | Self::StaleAuthorization { .. }
            | Self::Network(_)
            | Self::Timeout(_) => ErrorClass::Retryable,

            Self::AccountNotFound { .. }
            | Self::InviteNotFound(_)
            | Self::CredentialNotFound(_) => ErrorClass::NotFound,

            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Transient transport failures, retried by the backoff policy.
    ///
    /// Conflicts and stale authorizations are retryable too, but only after
    /// the caller refreshes state, so resubmitting verbatim is wrong.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Get the error code for structured error responses.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Validation(_) => Some("VALIDATION_ERROR"),
            Self::RecoveryPhraseTooShort { .. } => Some("RECOVERY_PHRASE_TOO_SHORT"),
            Self::InvalidGuardianName { .. } => Some("INVALID_GUARDIAN_NAME"),
            Self::InvalidAmount(_) => Some("INVALID_AMOUNT"),
            Self::InvalidThreshold { .. } => Some("INVALID_THRESHOLD"),
            Self::MalformedSignature(_) => Some("MALFORMED_SIGNATURE"),
            Self::InvalidKeyFormat(_) => Some("INVALID_KEY_FORMAT"),
            Self::AddressDerivationExhausted { .. } => Some("ADDRESS_DERIVATION_EXHAUSTED"),
            Self::AllocationConflict { .. } => Some("ALLOCATION_CONFLICT"),
            Self::StaleAuthorization { .. } => Some("STALE_AUTHORIZATION"),
            Self::AccountNotFound { .. } => Some("ACCOUNT_NOT_FOUND"),
            Self::InviteNotFound(_) => Some("INVITE_NOT_FOUND"),
            Self::CredentialNotFound(_) => Some("CREDENTIAL_NOT_FOUND"),
            Self::InvalidInviteState { .. } => Some("INVALID_INVITE_STATE"),
            Self::Network(_) => Some("NETWORK_ERROR"),
            Self::Timeout(_) => Some("TIMEOUT"),
            Self::ConfirmationCancelled(_) => Some("CONFIRMATION_CANCELLED"),
            Self::TransactionFailed { .. } => Some("TRANSACTION_FAILED"),
            Self::LedgerRejected { .. } => Some("LEDGER_REJECTED"),
            Self::Authenticator(_) => Some("AUTHENTICATOR_ERROR"),
            Self::Storage(_) => Some("STORAGE_ERROR"),
            Self::Serialization(_) => Some("SERIALIZATION_ERROR"),
            Self::Deserialization(_) => Some("DESERIALIZATION_ERROR"),
            Self::Unauthorized => Some("UNAUTHORIZED"),
            Self::Internal(_) => None,
        }
    }
}

impl ResponseError for WalletError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::RecoveryPhraseTooShort { .. }
            | Self::InvalidGuardianName { .. }
            | Self::InvalidAmount(_)
            | Self::InvalidThreshold { .. }
            | Self::MalformedSignature(_)
            | Self::InvalidKeyFormat(_)
            | Self::Serialization(_)
            | Self::Deserialization(_) => StatusCode::BAD_REQUEST,

            Self::Unauthorized => StatusCode::UNAUTHORIZED,

            Self::AccountNotFound { .. }
            | Self::InviteNotFound(_)
            | Self::CredentialNotFound(_) => StatusCode::NOT_FOUND,

            // 409: retry against fresh ledger state
            Self::AllocationConflict { .. }
            | Self::StaleAuthorization { .. }
            | Self::InvalidInviteState { .. } => StatusCode::CONFLICT,

            Self::TransactionFailed { .. } | Self::LedgerRejected { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Self::Network(_) | Self::Authenticator(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) | Self::ConfirmationCancelled(_) => StatusCode::GATEWAY_TIMEOUT,

            Self::AddressDerivationExhausted { .. } | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().map(String::from),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

// Library error conversions

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for WalletError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for WalletError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for WalletError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for WalletError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for WalletError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for WalletError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("Request timed out: {err}"))
        } else if err.is_connect() || err.is_request() {
            Self::Network(format!("Connection failed: {err}"))
        } else if err.is_decode() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            WalletError::Validation("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WalletError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WalletError::InviteNotFound("ABC".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            WalletError::AllocationConflict {
                wallet: "w".to_string(),
                guardian_id: 2
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            WalletError::MalformedSignature("bad tag".to_string()).error_code(),
            Some("MALFORMED_SIGNATURE")
        );
        assert_eq!(WalletError::Internal("test".to_string()).error_code(), None);
    }

    #[test]
    fn test_error_classes() {
        let stale = WalletError::StaleAuthorization {
            wallet: "w".to_string(),
            supplied_nonce: 3,
            reason: "nonce already used".to_string(),
        };
        assert_eq!(stale.class(), ErrorClass::Retryable);
        assert!(!stale.is_transient());

        assert!(WalletError::Network("reset".to_string()).is_transient());
        assert_eq!(
            WalletError::AccountNotFound {
                address: "x".to_string()
            }
            .class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            WalletError::InvalidKeyFormat("prefix".to_string()).class(),
            ErrorClass::Fatal
        );
    }
}
