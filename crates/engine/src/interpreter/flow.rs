//! Control-flow steps: `condition` and `loop`.

use serde_json::{json, Value};
use tracing::debug;

use super::command::{non_blank, ConditionConfig, ConditionSubject, LoopConfig, LoopSource};
use super::{halted, StepEffect, StepFailure, StepInterpreter, StepOutcome};
use crate::context::{RecordSnapshot, StepContext};
use crate::error::{ActionError, ActionResult};
use crate::model::{Step, StepResult};
use crate::store::Table;
use crate::tools::find_records;

impl StepInterpreter {
    pub(super) async fn run_condition(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: ConditionConfig,
    ) -> StepOutcome {
        let subject = match cfg.subject {
            ConditionSubject::Record => self.current_record(ctx).await?,
            ConditionSubject::Previous => ctx.previous_step_output.clone().unwrap_or(Value::Null),
            ConditionSubject::LoopItem => ctx.loop_item.clone().unwrap_or(Value::Null),
        };

        let result = self.conditions.evaluate(&cfg.conditions, &subject);
        let (branch, steps) = if result {
            ("then", &step.then_steps)
        } else {
            ("else", &step.else_steps)
        };
        debug!(step_id = %step.id, branch, "Condition evaluated");

        let mut nested = Vec::new();
        let outcome = self.run_sequence(steps, ctx.clone(), &mut nested).await;
        let failed = first_failure(&nested);
        let output = json!({
            "result": result,
            "branch": branch,
            "stepResults": nested,
        });

        match (outcome, failed) {
            (Err(error), _) => Err(StepFailure {
                error,
                output: Some(output),
            }),
            (Ok(_), Some((step_id, message))) => Err(StepFailure {
                error: ActionError::BranchFailed { step_id, message },
                output: Some(output),
            }),
            (Ok(branch_ctx), None) => Ok(StepEffect {
                output,
                context: branch_ctx,
            }),
        }
    }

    /// Current state of the context record, falling back to its snapshot.
    async fn current_record(&self, ctx: &StepContext) -> ActionResult<Value> {
        let Some(snapshot) = &ctx.record else {
            return Ok(Value::Null);
        };
        let fresh = self.store.get(Table::Records, &snapshot.id).await?;
        Ok(match fresh {
            Some(doc) => RecordSnapshot::from_document(&doc).to_value(),
            None => snapshot.to_value(),
        })
    }

    pub(super) async fn run_loop(&self, step: &Step, ctx: &StepContext, cfg: LoopConfig) -> StepOutcome {
        let max = match cfg.max_iterations {
            Some(n) if n >= 1 => n,
            _ => {
                return Err(ActionError::validation(format!(
                    "Loop step '{}' requires maxIterations of at least 1",
                    step.id
                ))
                .into())
            }
        };
        let limit = self.config.max_loop_iterations;
        if max > limit {
            return Err(ActionError::IterationLimitExceeded {
                requested: max,
                limit,
            }
            .into());
        }

        let max_nesting = self.config.max_loop_nesting;
        ctx.check_loop_depth(max_nesting)?;
        let deepest = ctx.nesting_depth + step.loop_depth();
        if deepest > max_nesting {
            return Err(ActionError::LoopNestingExceeded {
                depth: deepest,
                max: max_nesting,
            }
            .into());
        }

        let max = usize::try_from(max).unwrap_or(usize::MAX);
        let mut items = self.loop_items(ctx, &cfg, max).await?;
        let truncated = items.len() > max;
        items.truncate(max);
        debug!(step_id = %step.id, items = items.len(), truncated, "Starting loop");

        let mut iterations = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let iteration_ctx = ctx.with_loop_item(item, index, max_nesting)?;
            let mut nested = Vec::new();
            let outcome = self.run_sequence(&step.steps, iteration_ctx, &mut nested).await;
            let failed = first_failure(&nested);
            iterations.push(json!({"index": index, "stepResults": nested}));

            let error = match (outcome, failed) {
                (Err(error), _) => Some(error),
                (Ok(_), Some((step_id, message))) => Some(ActionError::IterationFailed {
                    index,
                    step_id,
                    message,
                }),
                (Ok(_), None) => None,
            };
            if let Some(error) = error {
                return Err(StepFailure {
                    error,
                    output: Some(loop_output(iterations, truncated)),
                });
            }
        }

        Ok(StepEffect::new(loop_output(iterations, truncated), ctx))
    }

    /// Items for a loop, at most `max + 1` so truncation can be reported.
    async fn loop_items(&self, ctx: &StepContext, cfg: &LoopConfig, max: usize) -> ActionResult<Vec<Value>> {
        match cfg.source {
            LoopSource::Array => match &cfg.items {
                Some(Value::Array(items)) => Ok(items.clone()),
                _ => Err(ActionError::validation(
                    "Loop source 'array' requires an items array",
                )),
            },
            LoopSource::Field => {
                let field = non_blank(&cfg.field).ok_or_else(|| {
                    ActionError::validation("Loop source 'field' requires a field name")
                })?;
                let record = self.target_record(ctx, &cfg.record_id).await?;
                match record.get("data").and_then(|data| data.get(field)) {
                    None | Some(Value::Null) => Ok(Vec::new()),
                    Some(Value::Array(items)) => Ok(items.clone()),
                    Some(_) => Err(ActionError::validation(format!(
                        "Field '{field}' is not an array"
                    ))),
                }
            }
            LoopSource::Query => {
                let object_type_id = non_blank(&cfg.object_type_id).ok_or_else(|| {
                    ActionError::validation("Loop source 'query' requires an objectTypeId")
                })?;
                let docs = find_records(
                    self.store.as_ref(),
                    &ctx.workspace_id,
                    object_type_id,
                    &cfg.filters,
                    Some(max.saturating_add(1)),
                )
                .await?;
                Ok(docs
                    .iter()
                    .map(|doc| RecordSnapshot::from_document(doc).to_value())
                    .collect())
            }
        }
    }
}

fn first_failure(results: &[StepResult]) -> Option<(String, String)> {
    halted(results).map(|r| (r.step_id.clone(), r.error.clone().unwrap_or_default()))
}

fn loop_output(iterations: Vec<Value>, truncated: bool) -> Value {
    json!({
        "count": iterations.len(),
        "truncated": truncated,
        "iterations": iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::interpreter::tests::{harness, harness_with, step};
    use crate::model::StepType;
    use crate::store::RecordStore;

    fn body() -> Vec<Step> {
        vec![step(
            "mark",
            StepType::UpdateField,
            json!({"field": "lastIndex", "value": "{{loopIndex}}"}),
        )]
    }

    #[tokio::test]
    async fn test_loop_respects_max_iterations() {
        let h = harness();
        let steps = vec![step(
            "each",
            StepType::Loop,
            json!({"source": "array", "items": [1, 2, 3, 4], "maxIterations": 2}),
        )
        .with_body(body())];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let output = results[0].output.as_ref().unwrap();
        assert_eq!(output["count"], 2);
        assert_eq!(output["truncated"], true);
        let indices: Vec<Value> = output["iterations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|it| it["stepResults"][0]["output"]["value"].clone())
            .collect();
        assert_eq!(indices, vec![json!(0), json!(1)]);
        assert_eq!(h.record("rec_1").await.get("data.lastIndex"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_loop_requires_max_iterations() {
        let h = harness();
        for config in [
            json!({"source": "array", "items": [1]}),
            json!({"source": "array", "items": [1], "maxIterations": 0}),
        ] {
            let steps = vec![step("each", StepType::Loop, config).with_body(body())];
            let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
            assert_eq!(
                results[0].error.as_deref(),
                Some("Validation error: Loop step 'each' requires maxIterations of at least 1")
            );
        }
    }

    #[tokio::test]
    async fn test_loop_above_engine_limit() {
        let h = harness();
        let steps = vec![step(
            "each",
            StepType::Loop,
            json!({"source": "array", "items": [1], "maxIterations": 5000}),
        )];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert_eq!(
            results[0].error.as_deref(),
            Some("Iteration limit exceeded: maxIterations 5000 is above the limit of 1000")
        );
    }

    #[tokio::test]
    async fn test_nesting_too_deep_fails_before_any_body_step() {
        let config = EngineConfig {
            max_loop_nesting: 2,
            ..EngineConfig::default()
        };
        let h = harness_with(config, true);
        let cfg = json!({"source": "array", "items": [1], "maxIterations": 1});
        let innermost = step("l3", StepType::Loop, cfg.clone()).with_body(body());
        let middle = step("l2", StepType::Loop, cfg.clone()).with_body(vec![
            step("touch", StepType::UpdateField, json!({"field": "touched", "value": true})),
            innermost,
        ]);
        let outer = step("l1", StepType::Loop, cfg).with_body(vec![middle]);

        let (results, outcome) = h.run(&[outer], h.ctx("rec_1").await).await;
        assert!(outcome.is_ok());
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].error.as_deref(),
            Some("Loop nesting exceeded: depth 3 is above the maximum of 2")
        );
        assert!(results[0].output.is_none());
        assert!(h.record("rec_1").await.get("data.touched").is_none());
    }

    #[tokio::test]
    async fn test_iteration_failure_aborts_loop() {
        let h = harness();
        let steps = vec![step(
            "each",
            StepType::Loop,
            json!({"source": "array", "items": ["rec_2", "missing", "rec_1"], "maxIterations": 10}),
        )
        .with_body(vec![step(
            "archive",
            StepType::ArchiveRecord,
            json!({"recordId": "{{loopItem}}"}),
        )])];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;

        assert_eq!(
            results[0].error.as_deref(),
            Some("Loop iteration 1 failed at step 'archive': records document not found: missing")
        );
        assert_eq!(results[0].output.as_ref().unwrap()["count"], 2);
        assert_eq!(h.record("rec_2").await.get("archived"), Some(&json!(true)));
        assert_eq!(h.record("rec_1").await.get("archived"), None);
    }

    #[tokio::test]
    async fn test_loop_over_field_and_query() {
        let h = harness();
        let steps = vec![
            step(
                "tags",
                StepType::Loop,
                json!({"source": "field", "field": "tags", "maxIterations": 10}),
            )
            .with_body(vec![step(
                "tag",
                StepType::UpdateField,
                json!({"field": "tag_{{loopItem}}", "value": "{{loopIndex}}"}),
            )]),
            step(
                "won",
                StepType::Loop,
                json!({
                    "source": "query",
                    "objectTypeId": "ot_deals",
                    "filters": [{"field": "stage", "operator": "equals", "value": "won"}],
                    "maxIterations": 10
                }),
            )
            .with_body(vec![step(
                "flag",
                StepType::UpdateField,
                json!({"recordId": "{{loopItem._id}}", "field": "flagged", "value": "{{loopItem.name}}"}),
            )]),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let rec_1 = h.record("rec_1").await;
        assert_eq!(rec_1.get("data.tag_c"), Some(&json!(2)));
        assert_eq!(results[1].output.as_ref().unwrap()["count"], 1);
        assert_eq!(h.record("rec_2").await.get_str("data.flagged"), Some("Globex"));
    }

    #[tokio::test]
    async fn test_loop_context_does_not_leak() {
        let h = harness();
        let steps = vec![
            step("each", StepType::Loop, json!({"source": "array", "items": ["x"], "maxIterations": 1}))
                .with_body(body()),
            step("after", StepType::UpdateField, json!({"field": "after", "value": "{{loopItem}}|{{variables.mark.value}}"})),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");
        assert_eq!(h.record("rec_1").await.get_str("data.after"), Some("|"));
    }

    #[tokio::test]
    async fn test_condition_branches_and_propagates_context() {
        let h = harness();
        let steps = vec![
            step(
                "check",
                StepType::Condition,
                json!({"conditions": [{"field": "stage", "operator": "equals", "value": "open"}]}),
            )
            .with_then(vec![step("promote", StepType::UpdateField, json!({"field": "stage", "value": "won"}))])
            .with_else(vec![step("demote", StepType::UpdateField, json!({"field": "stage", "value": "lost"}))]),
            step("note", StepType::UpdateField, json!({"field": "note", "value": "{{variables.promote.previousValue}}"})),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let output = results[0].output.as_ref().unwrap();
        assert_eq!(output["result"], true);
        assert_eq!(output["branch"], "then");
        assert_eq!(output["stepResults"][0]["stepId"], "promote");

        let record = h.record("rec_1").await;
        assert_eq!(record.get_str("data.stage"), Some("won"));
        assert_eq!(record.get_str("data.note"), Some("open"));
    }

    #[tokio::test]
    async fn test_condition_reads_fresh_record() {
        let h = harness();
        let steps = vec![
            step("set", StepType::UpdateField, json!({"field": "stage", "value": "won"})),
            step(
                "check",
                StepType::Condition,
                json!({"conditions": [{"field": "stage", "operator": "equals", "value": "won"}]}),
            ),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert_eq!(results[1].output.as_ref().unwrap()["branch"], "then");
    }

    #[tokio::test]
    async fn test_condition_on_previous_output_and_branch_failure() {
        let h = harness();
        let steps = vec![
            step("set", StepType::UpdateField, json!({"field": "stage", "value": "won"})),
            step(
                "check",
                StepType::Condition,
                json!({
                    "subject": "previous",
                    "conditions": [{"field": "previousValue", "operator": "equals", "value": "won"}]
                }),
            )
            .with_else(vec![step("bad", StepType::CopyField, json!({"sourceField": "a"}))]),
            step("never", StepType::ArchiveRecord, json!({})),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;

        assert_eq!(results.len(), 2);
        let failed = &results[1];
        assert!(failed.error.as_deref().unwrap().starts_with("Branch step 'bad' failed:"));
        assert_eq!(failed.output.as_ref().unwrap()["branch"], "else");
        assert!(h.store.get(Table::Records, "rec_1").await.unwrap().unwrap().get("archived").is_none());
    }
}
