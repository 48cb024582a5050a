use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use visitslot::cache::SlotCache;
use visitslot::config::ServerConfig;
use visitslot::http::{AppState, build_router};
use visitslot::notify::NotifyHub;
use visitslot::rate_limit::{RateLimiter, RedisWindows};
use visitslot::reaper;
use visitslot::scheduler::Scheduler;
use visitslot::store::WalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    visitslot::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("visits.wal");
    let store = Arc::new(WalStore::open(&wal_path)?);

    let limiter = match &config.redis_url {
        Some(url) => {
            let backend = RedisWindows::new(url, "visitslot")?;
            RateLimiter::with_backend(Arc::new(backend), config.rate_limit)
        }
        None => RateLimiter::local(config.rate_limit),
    };
    let limiter = Arc::new(limiter);

    let notify = Arc::new(NotifyHub::new());
    let scheduler = Arc::new(Scheduler::new(
        config.grid.clone(),
        store.clone(),
        SlotCache::new(config.cache_ttl),
        notify,
    ));

    let cancel = CancellationToken::new();
    let compactor = tokio::spawn(reaper::run_compactor(
        store.clone(),
        config.compact_threshold,
        cancel.clone(),
    ));
    let sweeper = tokio::spawn(reaper::run_rate_limit_sweeper(
        limiter.local_windows(),
        cancel.clone(),
    ));

    let app = build_router(AppState {
        scheduler,
        limiter: limiter.clone(),
    });

    let listener = TcpListener::bind(config.bind).await?;
    info!("visitslot listening on {}", config.bind);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings loaded for {} properties", store.property_count());
    info!(
        "  rate limit: {} per {:?} ({})",
        config.rate_limit.capacity,
        config.rate_limit.window,
        limiter.backend_name()
    );
    info!("  cache ttl: {:?}", config.cache_ttl);
    let metrics = config
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shutdown signal received, stopping background tasks");
    cancel.cancel();
    let _ = tokio::join!(compactor, sweeper);
    info!("visitslot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
