// Crate-level lint configuration
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Every fallible API returns WalletResult
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)] // e.g. WalletError in error mod
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]

//! Guardian Wallet Core
//!
//! Authorization core for a shared wallet whose guardians hold passkeys
//! (ECDSA P-256) instead of private keys.
//!
//! ## Pieces
//!
//! - **Addresses** ([`address`]): wallet and guardian accounts live at
//!   program-derived addresses computed from credential ids and guardian ids.
//! - **Codec** ([`codec`]): DER to low-S raw signatures, SEC1 key compression,
//!   recovery-phrase and message digests.
//! - **Builder** ([`builder`]): replay-protected requests with the secp256r1
//!   verification instruction ahead of the guarded operation.
//! - **Registry** ([`registry`]): guardian id probing and allocation, and the
//!   two-device invitation protocol staged through [`registry::StagingStore`].
//! - **Orchestrator** ([`orchestrator`]): wallet creation, onboarding, login
//!   and transfers with retry, refresh and cancellable confirmation.
//!
//! ## Staging service
//!
//! The `staging-service` binary serves the [`registry::StagingStore`]
//! contract over HTTP, backed by redb, so that an owner device and an invited
//! device can exchange registration material without talking to each other.

pub mod address;
pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod ledger;
pub mod middleware;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod routes;
pub mod storage;

/// `EnvFilter` directives used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "guardian_wallet=info,staging_service=info,actix_web=info";

/// `LOG_FORMAT=json` switches console output to JSON lines.
pub fn json_logs_requested() -> bool {
    std::env::var("LOG_FORMAT").is_ok_and(|format| format.trim().eq_ignore_ascii_case("json"))
}

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Console-only telemetry when OpenTelemetry is disabled.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    pub fn init_tracing() {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| crate::DEFAULT_LOG_FILTER.into());
        let registry = tracing_subscriber::registry().with(env_filter);

        if crate::json_logs_requested() {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    pub fn shutdown_tracing() {}
}

pub use address::Pubkey;
pub use builder::{PasskeyProof, Request, TransactionBuilder, TransferParams};
pub use config::{Settings, VerifierMode};
pub use error::{WalletError, WalletResult};
pub use orchestrator::{Assertion, AuthorizationOrchestrator, Authenticator, Session};
pub use registry::{GuardianRegistry, StagingStore};
