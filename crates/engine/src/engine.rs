//! Engine facade: the entry points callers use to run actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, StoreAuditLog};
use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::context::RecordSnapshot;
use crate::error::EngineError;
use crate::interpreter::StepInterpreter;
use crate::lifecycle::{ExecutionLifecycle, TriggerContext};
use crate::model::{Action, ExecutionReport, TriggerType};
use crate::schedule::CronSchedule;
use crate::security::{SsrfGuard, UrlValidator};
use crate::store::{IndexQuery, RecordStore, Table, TimedStore};
use crate::tools::ToolRegistry;
use crate::trigger::{TriggerEvaluator, TriggerEvent};
use crate::webhook::{EnvSecrets, SecretSource, WebhookClient};

/// Builds an [`Engine`] around a record store.
///
/// Anything not set explicitly gets its default: store-backed audit log,
/// [`SsrfGuard`], process-environment secrets and the built-in record tools.
pub struct EngineBuilder {
    store: Arc<dyn RecordStore>,
    config: EngineConfig,
    audit: Option<Arc<dyn AuditLog>>,
    url_validator: Option<Arc<dyn UrlValidator>>,
    secrets: Option<Arc<dyn SecretSource>>,
    tools: Option<ToolRegistry>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            audit: None,
            url_validator: None,
            secrets: None,
            tools: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn url_validator(mut self, validator: Arc<dyn UrlValidator>) -> Self {
        self.url_validator = Some(validator);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn build(self) -> Engine {
        let store: Arc<dyn RecordStore> =
            Arc::new(TimedStore::new(self.store, self.config.store_timeout()));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(StoreAuditLog::new(store.clone())));
        let tools = self
            .tools
            .unwrap_or_else(|| ToolRegistry::with_record_tools(store.clone()));
        let webhooks = WebhookClient::new(
            self.url_validator.unwrap_or_else(|| Arc::new(SsrfGuard::new())),
            self.secrets.unwrap_or_else(|| Arc::new(EnvSecrets)),
            self.config.webhook_timeout(),
            self.config.webhook_fail_on_error,
        );

        let config = Arc::new(self.config);
        let interpreter = StepInterpreter::new(
            store.clone(),
            audit.clone(),
            Arc::new(webhooks),
            Arc::new(tools),
            config.clone(),
        );

        Engine {
            lifecycle: ExecutionLifecycle::new(store.clone(), audit, interpreter),
            store,
            config,
            triggers: TriggerEvaluator::new(),
            conditions: ConditionEvaluator::new(),
        }
    }
}

/// Runs actions manually, in response to events, and on schedule.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn RecordStore>,
    config: Arc<EngineConfig>,
    lifecycle: ExecutionLifecycle,
    triggers: TriggerEvaluator,
    conditions: ConditionEvaluator,
}

impl Engine {
    pub fn builder(store: Arc<dyn RecordStore>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &ExecutionLifecycle {
        &self.lifecycle
    }

    /// Run an action on request. Action conditions are not checked.
    pub async fn execute_manual(
        &self,
        workspace_id: &str,
        action_id: &str,
        record_id: Option<&str>,
        actor_id: Option<&str>,
    ) -> Result<ExecutionReport, EngineError> {
        let action = self.load_action(action_id).await?;
        if action.workspace_id != workspace_id {
            return Err(EngineError::WrongWorkspace(action_id.to_string()));
        }
        if !action.is_active {
            return Err(EngineError::ActionInactive(action_id.to_string()));
        }

        let record = match record_id {
            Some(id) => {
                let doc = self.store.require(Table::Records, id).await?;
                doc.ensure_workspace(Table::Records, workspace_id)?;
                Some(RecordSnapshot::from_document(&doc))
            }
            None => None,
        };

        let trigger = TriggerContext::manual(record, actor_id.map(str::to_string));
        Ok(self.lifecycle.run(&action, trigger).await?)
    }

    /// Run every action the event triggers, concurrently.
    ///
    /// A run that cannot be started or finished is logged and left out of
    /// the returned reports; it never blocks the other runs.
    pub async fn handle_event(&self, event: TriggerEvent) -> Result<Vec<ExecutionReport>, EngineError> {
        let actions = self
            .load_actions(IndexQuery::new().eq("workspaceId", event.workspace_id.as_str()))
            .await?;
        let selected = self.triggers.select(&actions, &event);
        if selected.is_empty() {
            debug!(workspace_id = %event.workspace_id, event_type = %event.event_type, "No actions triggered");
            return Ok(Vec::new());
        }

        let record = self.event_record(&event).await?;
        let data = record
            .as_ref()
            .map(RecordSnapshot::to_value)
            .unwrap_or(Value::Null);

        let runnable: Vec<&Action> = selected
            .into_iter()
            .filter(|action| {
                let passes = self.conditions.evaluate(&action.conditions, &data);
                if !passes {
                    debug!(action_id = %action.id, "Action conditions not met");
                }
                passes
            })
            .collect();

        info!(
            workspace_id = %event.workspace_id,
            event_type = %event.event_type,
            actions = runnable.len(),
            "Dispatching triggered actions"
        );

        let runs = runnable.iter().map(|action| {
            let trigger = TriggerContext::automatic(record.clone(), event.actor_id.clone());
            self.lifecycle.run(action, trigger)
        });
        Ok(collect_reports(join_all(runs).await))
    }

    /// Active scheduled actions with a fire time in `(since, now]`.
    pub async fn due_actions(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Action>, EngineError> {
        let actions = self
            .load_actions(IndexQuery::new().eq("trigger.type", TriggerType::Scheduled.as_str()))
            .await?;

        Ok(actions
            .into_iter()
            .filter(|action| action.is_active)
            .filter(|action| {
                let Some(expr) = action.trigger.schedule.as_deref() else {
                    warn!(action_id = %action.id, "Scheduled action has no cron expression");
                    return false;
                };
                match CronSchedule::parse(expr) {
                    Ok(schedule) => schedule.is_due(since, now),
                    Err(e) => {
                        warn!(action_id = %action.id, error = %e, "Skipping scheduled action");
                        false
                    }
                }
            })
            .collect())
    }

    /// Run every scheduled action due in `(since, now]`.
    pub async fn run_due_schedules(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionReport>, EngineError> {
        let due = self.due_actions(since, now).await?;
        if !due.is_empty() {
            info!(count = due.len(), %since, %now, "Running scheduled actions");
        }

        let runs = due
            .iter()
            .map(|action| self.lifecycle.run(action, TriggerContext::automatic(None, None)));
        Ok(collect_reports(join_all(runs).await))
    }

    async fn load_action(&self, action_id: &str) -> Result<Action, EngineError> {
        let doc = self
            .store
            .get(Table::Actions, action_id)
            .await?
            .ok_or_else(|| EngineError::ActionNotFound(action_id.to_string()))?;
        Ok(doc.decode()?)
    }

    /// Actions matching `query`. Malformed documents are logged and skipped.
    async fn load_actions(&self, query: IndexQuery) -> Result<Vec<Action>, EngineError> {
        let docs = self.store.query(Table::Actions, &query).await?;
        Ok(docs
            .iter()
            .filter_map(|doc| match doc.decode::<Action>() {
                Ok(action) => Some(action),
                Err(e) => {
                    warn!(action_id = %doc.id, error = %e, "Skipping malformed action");
                    None
                }
            })
            .collect())
    }

    /// The event's record as stored now, or the snapshot carried by the event.
    async fn event_record(&self, event: &TriggerEvent) -> Result<Option<RecordSnapshot>, EngineError> {
        if let Some(id) = event.record_id.as_deref() {
            if let Some(doc) = self.store.get(Table::Records, id).await? {
                if doc.workspace_id() == Some(event.workspace_id.as_str()) {
                    return Ok(Some(RecordSnapshot::from_document(&doc)));
                }
            }
        }
        Ok(event.record.clone())
    }
}

fn collect_reports<E: std::fmt::Display>(results: Vec<Result<ExecutionReport, E>>) -> Vec<ExecutionReport> {
    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Action run could not be recorded");
                None
            }
        })
        .collect()
}
