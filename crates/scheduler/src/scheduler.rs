//! Tick loop over the engine's due-schedule scan.

use std::path::Path;
use std::sync::Arc;

use actionflow_engine::{Engine, EngineConfig, ExecutionReport, MemoryStore, SeedData};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;

/// Runs scheduled actions every configured interval.
pub struct Scheduler {
    config: SchedulerConfig,
    engine: Engine,
}

impl Scheduler {
    /// Create a scheduler over an in-memory store, seeded from
    /// `config.seed_path` when set.
    pub fn new(config: SchedulerConfig, engine_config: EngineConfig) -> Result<Self> {
        let store = match &config.seed_path {
            Some(path) => load_store(path)?,
            None => MemoryStore::new(),
        };
        let engine = Engine::builder(Arc::new(store)).config(engine_config).build();
        Ok(Self::with_engine(config, engine))
    }

    pub fn with_engine(config: SchedulerConfig, engine: Engine) -> Self {
        Self { config, engine }
    }

    /// Run scheduled actions due in `(since, now]` and log each outcome.
    pub async fn tick(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<ExecutionReport>> {
        let reports = self
            .engine
            .run_due_schedules(since, now)
            .await
            .context("Due-schedule scan failed")?;

        for report in &reports {
            tracing::info!(
                action_id = %report.action_id,
                execution_id = %report.execution_id,
                status = %report.status,
                steps = report.step_results.len(),
                "Scheduled action finished"
            );
            if let Some(error) = &report.error {
                tracing::warn!(action_id = %report.action_id, error = %error, "Scheduled action failed");
            }
        }
        Ok(reports)
    }

    /// Tick until the task is cancelled.
    ///
    /// A failed scan keeps its window open so the next tick covers it again.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        let mut last_tick = Utc::now();
        tracing::info!(interval_secs = self.config.interval.as_secs(), "Scheduler started");

        loop {
            interval.tick().await;
            let now = Utc::now();
            match self.tick(last_tick, now).await {
                Ok(_) => last_tick = now,
                Err(e) => tracing::error!(error = %e, since = %last_tick, "Scheduler tick failed"),
            }
        }
    }
}

/// Build a store from a YAML or JSON seed file.
pub fn load_store(path: &Path) -> Result<MemoryStore> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let seed = SeedData::parse(&text)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
    Ok(MemoryStore::from_seed(seed))
}
