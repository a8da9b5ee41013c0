//! Staging store endpoints.
//!
//! The HTTP face of [`StagingStore`]: `PUT` replaces, `GET` returns 404 when
//! absent, `DELETE` answers 204 or 404.

use actix_web::{HttpResponse, ResponseError, web};

use crate::error::WalletError;
use crate::registry::store::StagingStore;
use crate::registry::types::decode_credential_id;
use crate::registry::{
    CredentialBinding, InviteQuery, InviteRecord, RedbStagingStore, StagedRegistration,
    validate_invite_code,
};

fn failure(e: &WalletError, what: &str) -> HttpResponse {
    if e.status_code().is_server_error() {
        tracing::error!(error = %e, what, "Staging request failed");
    } else {
        tracing::debug!(error = %e, what, "Staging request rejected");
    }
    e.error_response()
}

fn key_mismatch(path_key: &str, body_key: &str) -> HttpResponse {
    WalletError::Validation(format!(
        "path key {path_key} does not match body key {body_key}"
    ))
    .error_response()
}

// =============================================================================
// Invitations
// =============================================================================

/// PUT /invites/{code}
#[tracing::instrument(skip(store, invite), fields(status = %invite.status))]
pub async fn put_invite(
    store: web::Data<RedbStagingStore>,
    code: web::Path<String>,
    invite: web::Json<InviteRecord>,
) -> HttpResponse {
    let invite = invite.into_inner();
    if let Err(e) = validate_invite_code(&code) {
        return e.error_response();
    }
    if invite.invite_code != *code {
        return key_mismatch(&code, &invite.invite_code);
    }

    match store.put_invite(&invite).await {
        Ok(()) => HttpResponse::Ok().json(invite),
        Err(e) => failure(&e, "put_invite"),
    }
}

/// GET /invites/{code}
#[tracing::instrument(skip(store))]
pub async fn get_invite(store: web::Data<RedbStagingStore>, code: web::Path<String>) -> HttpResponse {
    match store.get_invite(&code).await {
        Ok(Some(invite)) => HttpResponse::Ok().json(invite),
        Ok(None) => WalletError::InviteNotFound(code.into_inner()).error_response(),
        Err(e) => failure(&e, "get_invite"),
    }
}

/// DELETE /invites/{code}
#[tracing::instrument(skip(store))]
pub async fn delete_invite(store: web::Data<RedbStagingStore>, code: web::Path<String>) -> HttpResponse {
    match store.delete_invite(&code).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => WalletError::InviteNotFound(code.into_inner()).error_response(),
        Err(e) => failure(&e, "delete_invite"),
    }
}

/// GET /invites?owner_id=&wallet=&status=
#[tracing::instrument(skip(store))]
pub async fn list_invites(
    store: web::Data<RedbStagingStore>,
    query: web::Query<InviteQuery>,
) -> HttpResponse {
    match store.list_invites(&query).await {
        Ok(invites) => HttpResponse::Ok().json(invites),
        Err(e) => failure(&e, "list_invites"),
    }
}

// =============================================================================
// Staged registrations
// =============================================================================

/// PUT /registrations/{code}
#[tracing::instrument(skip(store, registration), fields(status = %registration.status))]
pub async fn put_registration(
    store: web::Data<RedbStagingStore>,
    code: web::Path<String>,
    registration: web::Json<StagedRegistration>,
) -> HttpResponse {
    let registration = registration.into_inner();
    if registration.invite_code != *code {
        return key_mismatch(&code, &registration.invite_code);
    }
    // Reject material the installing device could not use.
    if let Err(e) = registration
        .public_key_bytes()
        .and_then(|_| registration.recovery_hash_bytes())
        .and_then(|_| registration.credential_id_bytes())
    {
        return e.error_response();
    }

    match store.put_registration(&registration).await {
        Ok(()) => HttpResponse::Ok().json(registration),
        Err(e) => failure(&e, "put_registration"),
    }
}

/// GET /registrations/{code}
#[tracing::instrument(skip(store))]
pub async fn get_registration(store: web::Data<RedbStagingStore>, code: web::Path<String>) -> HttpResponse {
    match store.get_registration(&code).await {
        Ok(Some(registration)) => HttpResponse::Ok().json(registration),
        Ok(None) => WalletError::InviteNotFound(code.into_inner()).error_response(),
        Err(e) => failure(&e, "get_registration"),
    }
}

/// DELETE /registrations/{code}
#[tracing::instrument(skip(store))]
pub async fn delete_registration(store: web::Data<RedbStagingStore>, code: web::Path<String>) -> HttpResponse {
    match store.delete_registration(&code).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => WalletError::InviteNotFound(code.into_inner()).error_response(),
        Err(e) => failure(&e, "delete_registration"),
    }
}

// =============================================================================
// Credential bindings
// =============================================================================

/// PUT /credentials/{credential_id}
#[tracing::instrument(skip(store, binding), fields(wallet = %binding.wallet, guardian_id = binding.guardian_id))]
pub async fn put_credential(
    store: web::Data<RedbStagingStore>,
    credential_id: web::Path<String>,
    binding: web::Json<CredentialBinding>,
) -> HttpResponse {
    let binding = binding.into_inner();
    if binding.credential_id != *credential_id {
        return key_mismatch(&credential_id, &binding.credential_id);
    }
    if let Err(e) = decode_credential_id(&binding.credential_id).and_then(|_| binding.public_key_bytes()) {
        return e.error_response();
    }

    match store.put_credential(&binding).await {
        Ok(()) => HttpResponse::Ok().json(binding),
        Err(e) => failure(&e, "put_credential"),
    }
}

/// GET /credentials/{credential_id}
#[tracing::instrument(skip(store))]
pub async fn get_credential(
    store: web::Data<RedbStagingStore>,
    credential_id: web::Path<String>,
) -> HttpResponse {
    match store.get_credential(&credential_id).await {
        Ok(Some(binding)) => HttpResponse::Ok().json(binding),
        Ok(None) => WalletError::CredentialNotFound(credential_id.into_inner()).error_response(),
        Err(e) => failure(&e, "get_credential"),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/invites", web::get().to(list_invites))
        .service(
            web::resource("/invites/{code}")
                .route(web::put().to(put_invite))
                .route(web::get().to(get_invite))
                .route(web::delete().to(delete_invite)),
        )
        .service(
            web::resource("/registrations/{code}")
                .route(web::put().to(put_registration))
                .route(web::get().to(get_registration))
                .route(web::delete().to(delete_registration)),
        )
        .service(
            web::resource("/credentials/{credential_id}")
                .route(web::put().to(put_credential))
                .route(web::get().to(get_credential)),
        );
}
