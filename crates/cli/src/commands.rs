//! Subcommand implementations over a seeded in-memory store.

use std::path::Path;
use std::sync::Arc;

use actionflow_engine::store::{RecordStore, Table};
use actionflow_engine::{
    validate_action, Action, Engine, EngineConfig, ExecutionReport, MemoryStore, SeedData,
    TriggerEvent, ValidationIssue,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// Arguments of a manual run.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub action_id: String,
    pub record_id: Option<String>,
    pub workspace_id: Option<String>,
    pub actor_id: Option<String>,
}

/// Run an action manually. The workspace defaults to the action's own.
pub async fn exec(seed: &Path, config: EngineConfig, request: ExecRequest) -> Result<ExecutionReport> {
    let store = Arc::new(load_store(seed)?);

    let workspace_id = match request.workspace_id {
        Some(id) => id,
        None => store
            .get(Table::Actions, &request.action_id)
            .await?
            .and_then(|doc| doc.workspace_id().map(str::to_string))
            .ok_or_else(|| anyhow!("Action not found in seed: {}", request.action_id))?,
    };

    let engine = Engine::builder(store).config(config).build();
    let report = engine
        .execute_manual(
            &workspace_id,
            &request.action_id,
            request.record_id.as_deref(),
            request.actor_id.as_deref(),
        )
        .await
        .with_context(|| format!("Failed to run action {}", request.action_id))?;
    Ok(report)
}

/// Dispatch the event in `event_path` to every action it triggers.
pub async fn emit(seed: &Path, config: EngineConfig, event_path: &Path) -> Result<Vec<ExecutionReport>> {
    let event: TriggerEvent = read_document(event_path)?;
    let engine = Engine::builder(Arc::new(load_store(seed)?)).config(config).build();
    Ok(engine.handle_event(event).await?)
}

/// Statically check the action definition in `path`.
pub fn validate(path: &Path, config: &EngineConfig) -> Result<Vec<ValidationIssue>> {
    let action: Action = read_document(path)?;
    Ok(validate_action(&action, config))
}

/// Scheduled actions due in `(since, at]`.
pub async fn due(
    seed: &Path,
    config: EngineConfig,
    since: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Result<Vec<Action>> {
    let engine = Engine::builder(Arc::new(load_store(seed)?)).config(config).build();
    Ok(engine.due_actions(since, at).await?)
}

fn load_store(path: &Path) -> Result<MemoryStore> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let seed = SeedData::parse(&text)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
    Ok(MemoryStore::from_seed(seed))
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}
