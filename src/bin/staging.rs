//! Guardian Staging Service
//!
//! Relays guardian registration material between an owner device and an
//! invited device. Holds invitations, staged registrations and credential
//! bindings in redb; never sees recovery phrases or private keys.

use actix_web::{App, HttpServer, middleware, web};
use guardian_wallet::{
    config::Settings, middleware::InternalAuth, registry::RedbStagingStore, routes,
    storage::Storage, telemetry,
};
use tracing_actix_web::TracingLogger;

/// Request bodies are small JSON records.
const MAX_JSON_BYTES: usize = 16 * 1024;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::from_env();
    if let Err(message) = settings.validate_staging() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    let storage = match Storage::open(settings.db_path()) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open staging database");
            std::process::exit(1);
        }
    };

    let addr = settings.socket_addr();
    if settings.internal_token().is_none() {
        tracing::warn!(
            "Staging service running WITHOUT an internal token - development mode only! \
             Set INTERNAL_SERVICE_TOKEN for production."
        );
    }
    tracing::info!(
        addr = %addr,
        db_path = %settings.db_path().display(),
        token_required = settings.internal_token_required(),
        "Starting guardian staging service"
    );

    let store_data = web::Data::new(RedbStagingStore::new(storage));
    let settings_data = web::Data::new(settings);

    HttpServer::new(move || {
        App::new()
            .wrap(InternalAuth::new(&settings_data))
            .wrap(TracingLogger::default())
            .wrap(middleware::DefaultHeaders::new().add(("X-Service", "guardian-staging")))
            .app_data(web::JsonConfig::default().limit(MAX_JSON_BYTES))
            .app_data(store_data.clone())
            .configure(routes::health::configure)
            .configure(routes::staging::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    telemetry::shutdown_tracing();

    Ok(())
}
