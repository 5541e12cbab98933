//! Execution lifecycle: opens an ActionExecution, runs its steps and closes it.
//!
//! Status moves `pending → running → completed | failed` and never leaves a
//! terminal state. A run that ends in a fatal error or a panic is still
//! closed as `failed`, so no execution stays `running`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Map};
use tracing::{error, info, warn};

use crate::audit::{AuditEntry, AuditLog};
use crate::context::{RecordSnapshot, StepContext};
use crate::error::LifecycleError;
use crate::interpreter::{halted, StepInterpreter};
use crate::model::{Action, ActionExecution, ExecutionReport, ExecutionStatus, StepResult, TriggeredBy};
use crate::result_ext::ResultExt;
use crate::store::{encode, DocumentUpdate, RecordStore, Table};

/// What started a run.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub triggered_by: TriggeredBy,
    pub record: Option<RecordSnapshot>,
    pub actor_id: Option<String>,
}

impl TriggerContext {
    pub fn manual(record: Option<RecordSnapshot>, actor_id: Option<String>) -> Self {
        Self {
            triggered_by: TriggeredBy::Manual,
            record,
            actor_id,
        }
    }

    pub fn automatic(record: Option<RecordSnapshot>, actor_id: Option<String>) -> Self {
        Self {
            triggered_by: TriggeredBy::Automatic,
            record,
            actor_id,
        }
    }
}

fn already_terminal(execution_id: &str, status: ExecutionStatus) -> LifecycleError {
    warn!(execution_id, status = %status, "Execution already finished");
    LifecycleError::AlreadyTerminal {
        id: execution_id.to_string(),
        status: status.to_string(),
    }
}

/// Terminal status and error for a finished step sequence.
fn summarize(results: &[StepResult], internal_error: Option<&str>) -> (ExecutionStatus, Option<String>) {
    let failed_step = halted(results);
    let status = if failed_step.is_none() && internal_error.is_none() {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    };
    let error = failed_step
        .and_then(|r| r.error.clone())
        .or_else(|| internal_error.map(str::to_string));
    (status, error)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[derive(Clone)]
pub struct ExecutionLifecycle {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditLog>,
    interpreter: StepInterpreter,
}

impl ExecutionLifecycle {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditLog>,
        interpreter: StepInterpreter,
    ) -> Self {
        Self {
            store,
            audit,
            interpreter,
        }
    }

    /// Insert a `pending` execution and move it to `running`.
    pub async fn start(&self, action: &Action, trigger: &TriggerContext) -> Result<String, LifecycleError> {
        let execution = ActionExecution {
            id: String::new(),
            action_id: action.id.clone(),
            workspace_id: action.workspace_id.clone(),
            status: ExecutionStatus::Pending,
            triggered_by: trigger.triggered_by,
            trigger_record_id: trigger.record.as_ref().map(|r| r.id.clone()),
            step_results: Vec::new(),
            initiator_id: trigger.actor_id.clone(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        let execution_id = self
            .store
            .insert(Table::ActionExecutions, encode(&execution)?)
            .await?;

        let mut patch = Map::new();
        patch.insert("status".into(), json!(ExecutionStatus::Running));
        self.store
            .patch(Table::ActionExecutions, &execution_id, patch)
            .await?;

        info!(
            execution_id = %execution_id,
            action_id = %action.id,
            triggered_by = ?trigger.triggered_by,
            "Execution started"
        );
        Ok(execution_id)
    }

    pub async fn load(&self, execution_id: &str) -> Result<ActionExecution, LifecycleError> {
        let doc = self
            .store
            .get(Table::ActionExecutions, execution_id)
            .await?
            .ok_or_else(|| LifecycleError::ExecutionNotFound(execution_id.to_string()))?;
        Ok(doc.decode()?)
    }

    /// Close an execution with its top-level step results.
    ///
    /// The status change is a single conditional write on the status that
    /// was read, so of two concurrent calls only one succeeds.
    pub async fn finish(
        &self,
        execution_id: &str,
        step_results: &[StepResult],
        internal_error: Option<&str>,
    ) -> Result<ExecutionStatus, LifecycleError> {
        let execution = self.load(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(already_terminal(execution_id, execution.status));
        }

        let (status, error) = summarize(step_results, internal_error);
        let mut update = DocumentUpdate::new()
            .expect("status", execution.status.as_str())
            .set("status", json!(status))
            .set("stepResults", json!(step_results))
            .set("completedAt", json!(Utc::now()));
        if let Some(error) = error {
            update = update.set("error", error);
        }

        let applied = self
            .store
            .update(Table::ActionExecutions, execution_id, update)
            .await?;
        if !applied {
            let current = self.load(execution_id).await?;
            return Err(already_terminal(execution_id, current.status));
        }
        Ok(status)
    }

    /// Run an action end to end and report the outcome.
    pub async fn run(&self, action: &Action, trigger: TriggerContext) -> Result<ExecutionReport, LifecycleError> {
        let execution_id = self.start(action, &trigger).await?;
        let ctx = StepContext::new(
            action.workspace_id.clone(),
            trigger.actor_id.clone(),
            trigger.record.clone(),
            Some(execution_id.clone()),
        );

        let mut results = Vec::new();
        let outcome = AssertUnwindSafe(self.interpreter.run_sequence(&action.steps, ctx, &mut results))
            .catch_unwind()
            .await;
        let internal_error = match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                error!(execution_id = %execution_id, error = %e, "Execution aborted");
                Some(e.to_string())
            }
            Err(payload) => {
                let message = format!("Internal error: {}", panic_message(payload.as_ref()));
                error!(execution_id = %execution_id, error = %message, "Execution panicked");
                Some(message)
            }
        };

        let status = self
            .finish(&execution_id, &results, internal_error.as_deref())
            .await?;
        let (_, error) = summarize(&results, internal_error.as_deref());

        let entry = AuditEntry::new(&action.workspace_id, "action", &action.id, "action_executed")
            .by(trigger.actor_id.as_deref())
            .with_metadata(json!({
                "executionId": execution_id,
                "status": status,
                "triggeredBy": trigger.triggered_by,
            }));
        let _ = self
            .audit
            .record(entry)
            .await
            .log(format!("writing action_executed for {execution_id}"));

        info!(
            execution_id = %execution_id,
            action_id = %action.id,
            status = %status,
            steps = results.len(),
            "Execution finished"
        );

        Ok(ExecutionReport {
            execution_id,
            action_id: action.id.clone(),
            status,
            step_results: results,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::audit::StoreAuditLog;
    use crate::config::EngineConfig;
    use crate::error::{ActionResult, StoreError};
    use crate::interpreter::tests::{seed, YieldingStore};
    use crate::model::{Step, StepType, TriggerSpec, TriggerType};
    use crate::security::SsrfGuard;
    use crate::store::{Document, IndexQuery, MemoryStore};
    use crate::tools::{Tool, ToolContext, ToolRegistry, ToolResult};
    use crate::webhook::WebhookClient;

    /// Memory store whose `records` table is unreachable.
    struct RecordsDown(MemoryStore);

    impl RecordsDown {
        fn check(table: Table) -> Result<(), StoreError> {
            if table == Table::Records {
                Err(StoreError::Unavailable("records shard offline".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RecordStore for RecordsDown {
        async fn get(&self, table: Table, id: &str) -> Result<Option<Document>, StoreError> {
            Self::check(table)?;
            self.0.get(table, id).await
        }
        async fn query(&self, table: Table, query: &IndexQuery) -> Result<Vec<Document>, StoreError> {
            Self::check(table)?;
            self.0.query(table, query).await
        }
        async fn insert(&self, table: Table, fields: Map<String, Value>) -> Result<String, StoreError> {
            Self::check(table)?;
            self.0.insert(table, fields).await
        }
        async fn update(&self, table: Table, id: &str, update: DocumentUpdate) -> Result<bool, StoreError> {
            Self::check(table)?;
            self.0.update(table, id, update).await
        }
        async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
            Self::check(table)?;
            self.0.delete(table, id).await
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &'static str {
            "explode"
        }

        async fn call(&self, _arguments: &Value, _ctx: &ToolContext) -> ActionResult<ToolResult> {
            panic!("tool blew up");
        }
    }

    fn lifecycle(store: Arc<dyn RecordStore>) -> ExecutionLifecycle {
        let mut tools = ToolRegistry::with_record_tools(store.clone());
        tools.register(PanickingTool);
        let audit: Arc<dyn AuditLog> = Arc::new(StoreAuditLog::new(store.clone()));
        let webhooks = WebhookClient::new(
            Arc::new(SsrfGuard::new()),
            Arc::new(HashMap::<String, String>::new()),
            Duration::from_secs(30),
            true,
        );
        let interpreter = StepInterpreter::new(
            store.clone(),
            audit.clone(),
            Arc::new(webhooks),
            Arc::new(tools),
            Arc::new(EngineConfig::default()),
        );
        ExecutionLifecycle::new(store, audit, interpreter)
    }

    fn action(steps: Vec<Step>) -> Action {
        Action {
            id: "act_1".into(),
            workspace_id: "ws_1".into(),
            name: "Test".into(),
            slug: "test".into(),
            description: None,
            trigger: TriggerSpec::new(TriggerType::Manual),
            conditions: Vec::new(),
            steps,
            is_active: true,
            is_system: false,
            created_by: None,
        }
    }

    async fn snapshot(store: &MemoryStore, id: &str) -> RecordSnapshot {
        RecordSnapshot::from_document(&store.require(Table::Records, id).await.unwrap())
    }

    #[tokio::test]
    async fn test_successful_run_is_completed_and_audited() {
        let store = Arc::new(MemoryStore::from_seed(seed()));
        let lifecycle = lifecycle(store.clone());
        let action = action(vec![Step::new(
            "s1",
            StepType::UpdateField,
            json!({"field": "stage", "value": "won"}),
        )]);
        let trigger = TriggerContext::manual(Some(snapshot(&store, "rec_1").await), Some("user_1".into()));

        let report = lifecycle.run(&action, trigger).await.unwrap();
        assert!(report.succeeded());
        assert!(report.error.is_none());

        let execution = lifecycle.load(&report.execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.triggered_by, TriggeredBy::Manual);
        assert_eq!(execution.trigger_record_id.as_deref(), Some("rec_1"));
        assert_eq!(execution.initiator_id.as_deref(), Some("user_1"));
        assert_eq!(execution.step_results.len(), 1);
        assert!(execution.completed_at.is_some());

        let audits = store
            .query(Table::AuditLogs, &IndexQuery::new().eq("action", "action_executed"))
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].get_str("metadata.status"), Some("completed"));
    }

    #[tokio::test]
    async fn test_failed_step_fails_execution() {
        let store = Arc::new(MemoryStore::from_seed(seed()));
        let lifecycle = lifecycle(store.clone());
        let action = action(vec![
            Step::new("s1", StepType::UpdateField, json!({"field": "stage", "value": "won"})),
            Step::new("s2", StepType::TransformField, json!({"field": "name", "transform": "reverse"})),
            Step::new("s3", StepType::ArchiveRecord, json!({})),
        ]);
        let trigger = TriggerContext::automatic(Some(snapshot(&store, "rec_1").await), None);

        let report = lifecycle.run(&action, trigger).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.step_results.len(), 2);
        assert_eq!(report.error.as_deref(), Some("Validation error: Unsupported transform: reverse"));

        let execution = lifecycle.load(&report.execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error, report.error);
        assert!(store.require(Table::Records, "rec_1").await.unwrap().get("archived").is_none());
    }

    #[tokio::test]
    async fn test_second_finish_is_rejected() {
        let store = Arc::new(MemoryStore::from_seed(seed()));
        let lifecycle = lifecycle(store.clone());
        let id = lifecycle
            .start(&action(Vec::new()), &TriggerContext::manual(None, None))
            .await
            .unwrap();
        assert_eq!(lifecycle.load(&id).await.unwrap().status, ExecutionStatus::Running);

        let status = lifecycle.finish(&id, &[], None).await.unwrap();
        assert_eq!(status, ExecutionStatus::Completed);

        let err = lifecycle.finish(&id, &[], Some("late failure")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyTerminal { .. }));

        let execution = lifecycle.load(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.error.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_finish_closes_once() {
        let memory = Arc::new(MemoryStore::from_seed(seed()));
        let lifecycle = lifecycle(Arc::new(YieldingStore(memory)));
        let id = lifecycle
            .start(&action(Vec::new()), &TriggerContext::manual(None, None))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            lifecycle.finish(&id, &[], None),
            lifecycle.finish(&id, &[], Some("lost the race")),
        );
        assert_eq!(first.unwrap(), ExecutionStatus::Completed);
        assert!(matches!(second, Err(LifecycleError::AlreadyTerminal { ref status, .. }) if status == "completed"));

        let execution = lifecycle.load(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.error.is_none());
    }

    #[tokio::test]
    async fn test_finish_unknown_execution() {
        let store = Arc::new(MemoryStore::new());
        let err = lifecycle(store).finish("nope", &[], None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ExecutionNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_fatal_store_error_still_finishes() {
        let store: Arc<dyn RecordStore> = Arc::new(RecordsDown(MemoryStore::from_seed(seed())));
        let lifecycle = lifecycle(store);
        let action = action(vec![
            Step::new("s1", StepType::UpdateField, json!({"recordId": "rec_1", "field": "a", "value": 1})),
            Step::new("s2", StepType::UpdateField, json!({"recordId": "rec_1", "field": "b", "value": 2})),
        ]);

        let report = lifecycle
            .run(&action, TriggerContext::automatic(None, None))
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.step_results.len(), 1);
        assert_eq!(report.error.as_deref(), Some("Store unavailable: records shard offline"));
        assert_eq!(
            lifecycle.load(&report.execution_id).await.unwrap().status,
            ExecutionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let store = Arc::new(MemoryStore::from_seed(seed()));
        let lifecycle = lifecycle(store);
        let action = action(vec![Step::new("boom", StepType::CallMcpTool, json!({"tool": "explode"}))]);

        let report = lifecycle
            .run(&action, TriggerContext::manual(None, None))
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert!(report.step_results.is_empty());
        assert_eq!(report.error.as_deref(), Some("Internal error: tool blew up"));
    }
}
