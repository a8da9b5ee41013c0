//! Public health and build-info endpoints.

use actix_web::{HttpResponse, ResponseError, web};
use serde::{Deserialize, Serialize};

use crate::registry::RedbStagingStore;
use crate::storage::Collection;

const SERVICE_NAME: &str = "guardian-staging";

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    /// Open invitations, including ones awaiting installation.
    pub open_invites: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfoResponse {
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub build_time: String,
}

/// GET /health
///
/// Fails with 500 when the database cannot be read.
#[tracing::instrument(skip(store))]
pub async fn health(store: web::Data<RedbStagingStore>) -> HttpResponse {
    match store.storage().count(Collection::Invites) {
        Ok(open_invites) => HttpResponse::Ok().json(HealthResponse {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            open_invites,
        }),
        Err(e) => {
            tracing::error!(error = %e, "Health check could not read staging database");
            e.error_response()
        }
    }
}

/// GET /build-info
#[tracing::instrument]
pub async fn build_info() -> HttpResponse {
    HttpResponse::Ok().json(BuildInfoResponse {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_time: env!("BUILD_TIME").to_string(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/build-info", web::get().to(build_info));
}
