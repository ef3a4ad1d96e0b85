//! Mailsched server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use fred::prelude::*;
use mailsched_api::{AppState, app_router};
use mailsched_common::Config;
use mailsched_common::config::{RateLimitSettings, RedisConfig};
use mailsched_core::{
    EmailJobService, JobStore, LogMailSender, MailSender, MemoryJobStore, SmtpMailSender,
};
use mailsched_db::repositories::EmailJobRepository;
use mailsched_queue::{
    CounterStore, Dispatcher, JobProcessor, MemoryCounterStore, RedisCounterStore,
    SenderRateLimiter,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Connect the job store, falling back to process memory when the database
/// is unreachable.
async fn init_job_store(config: &Config) -> Arc<dyn JobStore> {
    let db = match mailsched_db::init(config).await {
        Ok(db) => db,
        Err(e) => {
            warn!(error = %e, "Database unavailable, keeping email jobs in memory");
            return Arc::new(MemoryJobStore::new());
        }
    };
    info!("Connected to database");

    info!("Running database migrations...");
    if let Err(e) = mailsched_db::migrate(&db).await {
        warn!(error = %e, "Migrations failed, keeping email jobs in memory");
        return Arc::new(MemoryJobStore::new());
    }
    info!("Migrations completed");

    Arc::new(EmailJobRepository::new(Arc::new(db)))
}

/// Pick the mail transport.
fn init_mailer(config: &Config) -> Arc<dyn MailSender> {
    let Some(smtp) = &config.smtp else {
        info!("SMTP not configured, outgoing mail will only be logged");
        return Arc::new(LogMailSender);
    };

    match SmtpMailSender::new(smtp) {
        Ok(sender) => Arc::new(sender),
        Err(e) => {
            warn!(error = %e, "Invalid SMTP configuration, outgoing mail will only be logged");
            Arc::new(LogMailSender)
        }
    }
}

/// Connect fred to Redis for shared rate-limit counters.
async fn connect_counter_redis(redis: &RedisConfig) -> Result<Client, Error> {
    let config = fred::types::config::Config::from_url(&redis.url)?;
    let client = fred::clients::Client::new(config, None, None, None);
    client.connect();
    match tokio::time::timeout(redis.connect_timeout(), client.wait_for_connect()).await {
        Ok(result) => result?,
        Err(_) => {
            if let Err(e) = client.quit().await {
                debug!(error = %e, "Failed to close Redis client");
            }
            return Err(Error::new(ErrorKind::Timeout, "Redis connection timed out"));
        }
    }
    Ok(client)
}

/// Pick the rate-limit counter store.
async fn init_counter_store(
    redis: &RedisConfig,
    settings: &RateLimitSettings,
) -> Option<Arc<dyn CounterStore>> {
    match connect_counter_redis(redis).await {
        Ok(client) => {
            info!("Connected to Redis for rate limiting");
            Some(Arc::new(RedisCounterStore::new(Arc::new(client))))
        }
        Err(e) if settings.local_counters => {
            warn!(error = %e, "Redis unavailable, counting sends in process memory");
            Some(Arc::new(MemoryCounterStore::new()))
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, sending without rate limit");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsched=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting mailsched server...");

    // Load configuration
    let config = Config::load()?;

    let store = init_job_store(&config).await;
    let mailer = init_mailer(&config);
    let counters = init_counter_store(&config.redis, &config.rate_limit).await;

    let limiter = SenderRateLimiter::new(
        counters,
        config.rate_limit.max_emails_per_hour,
        &config.redis.prefix,
    );
    let processor = JobProcessor::new(
        Arc::clone(&store),
        mailer,
        limiter,
        config.rate_limit.min_delay_between_sends(),
    );

    let dispatcher = Dispatcher::start(&config, processor).await;
    if config.queue.recover_pending {
        if let Err(e) = dispatcher.recover_pending(store.as_ref()).await {
            error!(error = %e, "Failed to recover pending email jobs");
        }
    }

    let state = AppState::new(EmailJobService::new(store), dispatcher.clone());

    let app = app_router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
