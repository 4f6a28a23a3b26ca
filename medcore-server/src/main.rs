//! medcore-server - Users service entry point

use medcore_store::SqliteStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medcore_server::{
    build_router,
    config::ServerConfig,
    forwarder::{HttpPatientForwarder, PatientForwarder},
    mailer::{LogMailer, SmtpMailer, VerificationMailer},
    seed_catalogs, AppState,
};

#[tokio::main]
async fn main() {
    // Load configuration first so the log settings apply
    let config_path = std::path::Path::new("config.yaml")
        .exists()
        .then_some("config.yaml");
    let (config, config_error) = match ServerConfig::load(config_path) {
        Ok(config) => (config, None),
        Err(e) => (ServerConfig::default(), Some(e.to_string())),
    };

    // Initialize logging
    let json = config.log.format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .init();

    tracing::info!("Starting medcore users service...");
    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    // Create data directory
    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    // Initialize store
    let store = SqliteStore::open(config.users_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open users store: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = seed_catalogs(&store, &config.seed) {
        tracing::error!("Failed to seed catalogs: {}", e);
        std::process::exit(1);
    }

    let mailer: Arc<dyn VerificationMailer> = match &config.smtp {
        Some(smtp) => match SmtpMailer::new(smtp) {
            Ok(mailer) => Arc::new(mailer),
            Err(e) => {
                tracing::error!("Failed to configure SMTP: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("SMTP not configured, verification codes will only be logged");
            Arc::new(LogMailer)
        }
    };

    let http = reqwest::Client::new();
    let forwarder: Arc<dyn PatientForwarder> = Arc::new(HttpPatientForwarder::new(
        http.clone(),
        &config.patients_service.url,
        Duration::from_secs(config.patients_service.timeout_secs),
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    tracing::info!(
        "Auth: {}",
        if config.auth.enabled {
            config.auth.service_url.as_str()
        } else {
            "disabled"
        }
    );
    tracing::info!("Patients service: {}", config.patients_service.url);

    let state = Arc::new(AppState {
        store,
        config,
        mailer,
        forwarder,
        http,
    });

    // Build router
    let app = build_router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Server error: {}", e);
    });

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
