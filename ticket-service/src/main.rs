use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::create_ip_rate_limiter;
use service_core::observability::{init_metrics, init_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticket_service::{
    build_router,
    config::TicketConfig,
    middleware::RequestGate,
    models::Role,
    services::{
        spawn_expiry_scheduler, spawn_purchase_listener, AuthService, CredentialStore, Database,
        InMemoryCredentialStore, InMemoryTicketRepository, PgCredentialStore, PgTicketRepository,
        PurchaseEvents, TicketRepository, TicketService, TokenCodec,
    },
    utils::{Clock, Password, SystemClock},
    AppState,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = TicketConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics_handle = init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting ticket service"
    );

    let (credentials, tickets): (Arc<dyn CredentialStore>, Arc<dyn TicketRepository>) =
        if config.database.url.is_some() {
            let db = Database::connect(&config.database).await?;
            (
                Arc::new(PgCredentialStore::new(db.clone())),
                Arc::new(PgTicketRepository::new(db)),
            )
        } else {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            (
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(InMemoryTicketRepository::new()),
            )
        };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let codec = TokenCodec::new(&config.jwt, clock.clone())
        .map_err(|e| AppError::ConfigError(e.context("Failed to load JWT signing keys")))?;
    let codec = Arc::new(codec);
    tracing::info!("Token codec initialized");

    let shutdown = CancellationToken::new();

    let (purchase_events, purchase_rx) =
        PurchaseEvents::channel(config.scheduler.purchase_event_queue_size);
    let purchase_listener = spawn_purchase_listener(purchase_rx, shutdown.clone());

    let auth_service = AuthService::new(credentials, codec.clone(), clock.clone(), &config.jwt);
    let ticket_service = TicketService::new(tickets, clock).with_events(purchase_events);

    if let Some(admin) = &config.bootstrap_admin {
        let identity = auth_service
            .ensure_identity(
                &admin.username,
                Password::new(admin.password.expose_secret().clone()),
                vec![Role::Admin],
            )
            .await?;
        tracing::info!(user_id = %identity.id, "Bootstrap administrator present");
    }

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let register_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.register_attempts,
        config.rate_limit.register_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login, Register and Global IP");

    let scheduler = spawn_expiry_scheduler(
        ticket_service.clone(),
        Duration::from_secs(config.scheduler.expiry_interval_seconds),
        shutdown.clone(),
    );

    let state = AppState {
        config: config.clone(),
        auth_service,
        ticket_service,
        gate: RequestGate::new(codec),
        metrics_handle: Some(metrics_handle),
        login_rate_limiter,
        register_rate_limiter,
        ip_rate_limiter,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Expiry scheduler terminated abnormally");
    }
    match purchase_listener.await {
        Ok(handled) => tracing::info!(handled, "Purchase listener stopped"),
        Err(e) => tracing::error!(error = %e, "Purchase listener terminated abnormally"),
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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

    shutdown.cancel();
}
