//! `shiblink` server entry point.
//!
//! Loads configuration, builds the record store, cipher, HTTP client and
//! every core component up front, then starts the Axum HTTP server with
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use shiblink_core::attributes::AttributeStore;
use shiblink_core::cipher::Cipher;
use shiblink_core::linking::Linker;
use shiblink_core::resolver::{ApiKeySecret, Resolver};
use shiblink_core::verifier::{AssertionVerifier, HttpPublicKeySource, HttpTokenIntrospector};
use shiblink_storage::{MemoryRecordStore, RecordStore};

use shiblink_server::config::{ServerConfig, StorageBackendType};
use shiblink_server::routes;
use shiblink_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        environment = %config.environment,
        dev_mode = config.dev_mode,
        "shiblink starting"
    );

    let state = build_app_state(&config).await?;
    let app = routes::build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "shiblink server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shiblink server stopped");
    Ok(())
}

/// Build the shared application state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let cipher = Cipher::from_base64_key(&config.encryption_key)
        .context("SHIBLINK_ENCRYPTION_KEY is not a base64 32-byte key")?;

    let records = open_record_store(&config.storage_backend).await?;
    let attributes = Arc::new(AttributeStore::new(records, Arc::new(cipher)));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let introspector = Arc::new(HttpTokenIntrospector::new(
        http.clone(),
        config.tokeninfo_url.clone(),
    ));
    let key_source = Arc::new(HttpPublicKeySource::new(
        http,
        &config.trust_host,
        config.public_key_path.clone(),
    ));
    info!(url = %key_source.key_url(&config.environment), "trust authority key location");

    let resolver = Resolver::new(
        config.api_key.as_deref().map(ApiKeySecret::new),
        introspector,
    );
    let linker = Linker::new(
        AssertionVerifier::new(key_source),
        Arc::clone(&attributes),
        config.environment.clone(),
    );

    Ok(Arc::new(AppState::new(
        resolver,
        attributes,
        linker,
        config.dev_mode,
    )))
}

async fn open_record_store(backend: &StorageBackendType) -> anyhow::Result<Arc<dyn RecordStore>> {
    match backend {
        StorageBackendType::Memory => {
            tracing::warn!("using in-memory record store, attributes are lost on restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            let store = shiblink_storage::PostgresRecordStore::connect(url, 10)
                .await
                .context("failed to open PostgreSQL record store")?;
            info!("connected to PostgreSQL record store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => anyhow::bail!(
            "SHIBLINK_STORAGE=postgres requires building with the postgres-backend feature"
        ),
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
