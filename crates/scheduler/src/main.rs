//! Actionflow Scheduler binary.
//!
//! Runs scheduled actions against a seeded in-memory store.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use actionflow_engine::EngineConfig;
use actionflow_scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actionflow_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Actionflow Scheduler");

    let config = SchedulerConfig::from_env()?;
    let engine_config = EngineConfig::from_env().context("Invalid ACTIONFLOW_* engine settings")?;
    tracing::info!(
        interval_secs = config.interval.as_secs(),
        seed_path = ?config.seed_path,
        "Scheduler configuration loaded"
    );

    let scheduler = Scheduler::new(config, engine_config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        result = scheduler.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler error");
                return Err(e);
            }
        }
        _ = shutdown => {
            tracing::info!("Shutting down scheduler");
        }
    }

    tracing::info!("Scheduler stopped");
    Ok(())
}
