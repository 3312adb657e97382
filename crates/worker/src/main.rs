//! Seatkeeper background worker
//!
//! Runs the periodic assigned-user refresh and the expired purchase purge
//! against Postgres and Redis.

mod config;
mod directory;
mod jobs;

use std::sync::Arc;

use anyhow::{Context, Result};
use seatkeeper_entitlements::{Backends, Collaborators, Engine, StaticCapabilityRegistry};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::directory::PgDirectory;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(
        deployment = %config.deployment,
        refresh_cron = %config.refresh_cron,
        purge_cron = %config.purge_cron,
        "Starting seatkeeper worker"
    );

    let pool = seatkeeper_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    seatkeeper_shared::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let redis = redis::Client::open(config.redis_url.as_str())?
        .get_connection_manager()
        .await
        .context("failed to connect to redis")?;

    let registry = load_registry(config.capabilities_file.as_deref()).await?;
    let directory = Arc::new(PgDirectory::new(pool.clone(), config.min_access_level));
    let collaborators = Collaborators {
        registry: Arc::new(registry),
        membership: directory.clone(),
        eligible_users: directory.clone(),
        namespaces: directory,
    };

    let engine = Engine::new(
        Backends::production(pool, redis),
        collaborators,
        config.engine_settings(),
    );
    let catalog = engine.catalog.bootstrap().await?;
    tracing::info!(add_ons = catalog.len(), "Add-on catalog ready");

    let mut scheduler = JobScheduler::new().await?;

    let refresh_engine = engine.clone();
    scheduler
        .add(Job::new_async(config.refresh_cron.as_str(), move |_id, _lock| {
            let engine = refresh_engine.clone();
            Box::pin(async move {
                jobs::run_refresh_pass(&engine).await;
            })
        })?)
        .await?;

    let purge_engine = engine.clone();
    scheduler
        .add(Job::new_async(config.purge_cron.as_str(), move |_id, _lock| {
            let engine = purge_engine.clone();
            Box::pin(async move {
                jobs::run_purge(&engine).await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started");

    shutdown_signal().await?;
    tracing::info!("Shutting down gracefully...");
    scheduler.shutdown().await?;

    Ok(())
}

/// Plain text by default, JSON lines when `LOG_FORMAT=json`
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seatkeeper_entitlements=info,sqlx=warn".into()),
        )
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

async fn load_registry(path: Option<&str>) -> Result<StaticCapabilityRegistry> {
    let Some(path) = path else {
        tracing::warn!("CAPABILITIES_FILE not set; capability resolution will match nothing");
        return Ok(StaticCapabilityRegistry::new());
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read capability registry {path}"))?;
    let registry = StaticCapabilityRegistry::from_json(&raw)?;
    tracing::info!(path, capabilities = registry.len(), "Capability registry loaded");
    Ok(registry)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => {
                tracing::info!("Received terminate signal");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
        Ok(())
    }
}
