use auth_service::{
    build_auth_service, build_router,
    config::AuthConfig,
    db,
    services::{
        spawn_sweeper, Database, EmailService, GoogleIdentityProvider, InMemoryBlacklist,
        RedisBlacklist, TokenBlacklist,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_tracing, shutdown_tracing};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
    let store = Arc::new(Database::new(pool.clone()));

    let blacklist: Arc<dyn TokenBlacklist> = match &config.redis {
        Some(redis_config) => {
            tracing::info!("Using Redis token blacklist");
            Arc::new(RedisBlacklist::new(redis_config).await?)
        }
        None => {
            tracing::info!("Using in-memory token blacklist");
            Arc::new(InMemoryBlacklist::new())
        }
    };

    let email = Arc::new(EmailService::new(&config.smtp)?);
    let identity = Arc::new(GoogleIdentityProvider::new(config.google.client_id.clone())?);

    let auth_service = build_auth_service(
        &config,
        store.clone(),
        store,
        blacklist.clone(),
        email,
        identity,
    )?;

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        blacklist,
        Duration::from_secs(config.blacklist.sweep_interval_seconds),
        cancel.clone(),
    );

    let state = AppState::new(config.clone(), auth_service);
    let app = build_router(state);

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = CancellationToken::new();
    let server = service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            tracing::error!("Server exited before a shutdown signal");
            result.map_err(|e| anyhow::anyhow!("Server task failed: {}", e))??;
        }
        _ = shutdown_signal() => {
            shutdown.cancel();
            let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(Ok(Ok(()))) => tracing::info!("In-flight requests drained"),
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "Server error during shutdown"),
                Ok(Err(e)) => tracing::error!(error = %e, "Server task failed during shutdown"),
                Err(_) => {
                    tracing::warn!(
                        grace_seconds = config.common.shutdown_grace_seconds,
                        "Grace period elapsed, dropping remaining connections"
                    );
                    server.abort();
                }
            }
        }
    }

    // The sweeper must stop before the stores it touches are torn down.
    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Blacklist sweeper task failed");
    }
    pool.close().await;

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
