use anyhow::Result;
use apk_forge::{
    config::AppConfig,
    routes::routes::routes,
    services::store_service::{DEFAULT_BUILD_DELAY, UploadStore},
};
use std::{fs, io::ErrorKind, path::Path, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting apk-forge with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize core service ---
    let store = UploadStore::new(&cfg.storage_dir, cfg.max_upload_bytes, DEFAULT_BUILD_DELAY);

    // --- Start expiry sweep ---
    // A download deletes its stored file, but nothing forces a download to
    // ever happen; the sweep reclaims uploads that were left behind.
    let sweeper = store.clone();
    let sweep_interval = Duration::from_secs(cfg.sweep_interval_secs);
    let max_age = Duration::from_secs(cfg.max_age_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweeper.sweep_expired(max_age).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("expiry sweep removed {} stale upload(s)", removed),
                Err(err) => tracing::error!("expiry sweep failed: {}", err),
            }
        }
    });

    // --- Build router ---
    let app = routes(store);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
