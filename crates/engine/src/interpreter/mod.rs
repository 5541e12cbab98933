//! Step interpreter.
//!
//! Runs step sequences in order against a [`StepContext`]. Each step's
//! config is interpolated, parsed into a [`StepCommand`] and executed; the
//! first failed step halts its sequence. Condition branches and loop bodies
//! are sub-sequences run through the same entry point, so the halting rule
//! holds at every level.
//!
//! Step failures are recorded as failed [`StepResult`]s. Fatal errors
//! (store connectivity, internal faults) are recorded too and then returned
//! as `Err`, unwinding every enclosing sequence.

mod command;
mod external;
mod fields;
mod flow;
mod lists;
mod records;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLog};
use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::context::StepContext;
use crate::error::{ActionError, ActionResult};
use crate::model::{Step, StepResult};
use crate::result_ext::ResultExt;
use crate::store::RecordStore;
use crate::template;
use crate::tools::ToolRegistry;
use crate::webhook::WebhookClient;

use command::StepCommand;

/// A step that ran to completion.
struct StepEffect {
    output: Value,
    /// Context the next sibling builds on (a condition passes its branch's).
    context: StepContext,
}

impl StepEffect {
    fn new(output: Value, context: &StepContext) -> Self {
        Self {
            output,
            context: context.clone(),
        }
    }
}

/// A step that failed, with whatever output it produced before failing.
struct StepFailure {
    error: ActionError,
    output: Option<Value>,
}

impl From<ActionError> for StepFailure {
    fn from(error: ActionError) -> Self {
        Self {
            error,
            output: None,
        }
    }
}

impl From<crate::error::StoreError> for StepFailure {
    fn from(error: crate::error::StoreError) -> Self {
        ActionError::from(error).into()
    }
}

type StepOutcome = Result<StepEffect, StepFailure>;

/// First failed result in a sequence, if it halted.
pub fn halted(results: &[StepResult]) -> Option<&StepResult> {
    results.iter().find(|r| r.is_failed())
}

/// Interprets action steps against the store and external collaborators.
#[derive(Clone)]
pub struct StepInterpreter {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditLog>,
    webhooks: Arc<WebhookClient>,
    tools: Arc<ToolRegistry>,
    config: Arc<EngineConfig>,
    conditions: ConditionEvaluator,
}

impl StepInterpreter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditLog>,
        webhooks: Arc<WebhookClient>,
        tools: Arc<ToolRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            audit,
            webhooks,
            tools,
            config,
            conditions: ConditionEvaluator::new(),
        }
    }

    /// Run `steps` in order, appending one result per attempted step.
    ///
    /// Returns the context after the last completed step. A non-fatal
    /// failure stops the sequence and still returns `Ok`; check
    /// [`halted`] on `results`.
    pub fn run_sequence<'a>(
        &'a self,
        steps: &'a [Step],
        ctx: StepContext,
        results: &'a mut Vec<StepResult>,
    ) -> BoxFuture<'a, ActionResult<StepContext>> {
        async move {
            let mut ctx = ctx;
            for step in steps {
                let started_at = Utc::now();
                let timer = Instant::now();
                debug!(step_id = %step.id, step_type = %step.step_type, "Executing step");

                match self.execute_step(step, &ctx).await {
                    Ok(effect) => {
                        info!(
                            step_id = %step.id,
                            step_type = %step.step_type,
                            duration_ms = timer.elapsed().as_millis() as u64,
                            "Step completed"
                        );
                        results.push(StepResult::completed(step, started_at, effect.output.clone()));
                        ctx = effect.context.with_step_output(&step.id, effect.output);
                    }
                    Err(failure) => {
                        warn!(
                            step_id = %step.id,
                            step_type = %step.step_type,
                            error_kind = failure.error.kind(),
                            error = %failure.error,
                            "Step failed"
                        );
                        let mut result = StepResult::failed(step, started_at, failure.error.to_string());
                        if let Some(output) = failure.output {
                            result = result.with_output(output);
                        }
                        results.push(result);

                        if failure.error.is_fatal() {
                            return Err(failure.error);
                        }
                        break;
                    }
                }
            }
            Ok(ctx)
        }
        .boxed()
    }

    async fn execute_step(&self, step: &Step, ctx: &StepContext) -> StepOutcome {
        let config = template::resolve(&step.config, ctx);
        let command = StepCommand::parse(step, config)?;

        match command {
            StepCommand::UpdateField(cfg) => self.update_field(step, ctx, cfg).await,
            StepCommand::ClearField(cfg) => self.clear_field(step, ctx, cfg).await,
            StepCommand::CopyField(cfg) => self.copy_field(step, ctx, cfg).await,
            StepCommand::TransformField(cfg) => self.transform_field(step, ctx, cfg).await,
            StepCommand::CreateRecord(cfg) => self.create_record(step, ctx, cfg).await,
            StepCommand::DeleteRecord(cfg) => self.delete_record(step, ctx, cfg).await,
            StepCommand::ArchiveRecord(cfg) => self.archive_record(step, ctx, cfg).await,
            StepCommand::AddToList(cfg) => self.add_to_list(step, ctx, cfg).await,
            StepCommand::RemoveFromList(cfg) => self.remove_from_list(step, ctx, cfg).await,
            StepCommand::UpdateListEntry(cfg) => self.update_list_entry(step, ctx, cfg).await,
            StepCommand::SendWebhook(cfg) => self.send_webhook(step, ctx, cfg).await,
            StepCommand::Condition(cfg) => self.run_condition(step, ctx, cfg).await,
            StepCommand::Loop(cfg) => self.run_loop(step, ctx, cfg).await,
            StepCommand::CallMcpTool(cfg) => self.call_tool(step, ctx, cfg).await,
        }
    }

    /// Record a side effect. Audit failures are logged, never fatal.
    async fn audit(&self, step: &Step, ctx: &StepContext, entry: AuditEntry) {
        let entry = entry.by(ctx.actor_id.as_deref()).with_metadata(json!({
            "executionId": ctx.execution_id,
            "stepId": step.id,
        }));
        let _ = self
            .audit
            .record(entry)
            .await
            .log(format!("writing audit entry for step '{}'", step.id));
    }
}
