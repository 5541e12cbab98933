//! Static checks on an action definition, run before it is saved or executed.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::model::{Action, Step, StepType, TriggerType};
use crate::schedule::CronSchedule;

/// A problem found in an action definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Offending step, or `None` for action-level problems.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn action(message: impl Into<String>) -> Self {
        Self {
            step_id: None,
            message: message.into(),
        }
    }

    fn step(step: &Step, message: impl Into<String>) -> Self {
        Self {
            step_id: Some(step.id.clone()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(id) => write!(f, "step '{}': {}", id, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Validate an action. An empty result means the action is well formed.
pub fn validate_action(action: &Action, config: &EngineConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_trigger(action, &mut issues);

    let mut seen = HashSet::new();
    for step in &action.steps {
        check_step(step, 0, config, &mut seen, &mut issues);
    }
    issues
}

fn check_trigger(action: &Action, issues: &mut Vec<ValidationIssue>) {
    let trigger = &action.trigger;
    match trigger.trigger_type {
        TriggerType::Scheduled => match trigger.schedule.as_deref() {
            None => issues.push(ValidationIssue::action(
                "Scheduled trigger requires a cron schedule",
            )),
            Some(expr) => {
                if let Err(e) = CronSchedule::parse(expr) {
                    issues.push(ValidationIssue::action(e.to_string()));
                }
            }
        },
        TriggerType::OnFieldChange => {
            if trigger.watched_fields.as_deref().unwrap_or_default().is_empty() {
                issues.push(ValidationIssue::action(
                    "onFieldChange trigger without watchedFields never fires",
                ));
            }
        }
        _ => {}
    }
}

fn check_step(
    step: &Step,
    loop_depth: usize,
    config: &EngineConfig,
    seen: &mut HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    if !seen.insert(step.id.clone()) {
        issues.push(ValidationIssue::step(step, "Duplicate step id"));
    }

    let mut depth = loop_depth;
    match &step.step_type {
        StepType::Unknown(name) => {
            issues.push(ValidationIssue::step(step, format!("Unknown step type: {name}")));
        }
        StepType::Condition => {
            let has_conditions = step
                .config
                .get("conditions")
                .and_then(Value::as_array)
                .is_some_and(|c| !c.is_empty());
            if !has_conditions {
                issues.push(ValidationIssue::step(step, "Condition step has no conditions"));
            }
        }
        StepType::Loop => {
            depth += 1;
            if depth > config.max_loop_nesting {
                issues.push(ValidationIssue::step(
                    step,
                    format!(
                        "Loop nesting depth {depth} is above the maximum of {}",
                        config.max_loop_nesting
                    ),
                ));
            }
            match step.config.get("maxIterations").and_then(Value::as_u64) {
                None | Some(0) => issues.push(ValidationIssue::step(
                    step,
                    "Loop requires maxIterations of at least 1",
                )),
                Some(n) if n > config.max_loop_iterations => issues.push(ValidationIssue::step(
                    step,
                    format!(
                        "maxIterations {n} is above the limit of {}",
                        config.max_loop_iterations
                    ),
                )),
                Some(_) => {}
            }
        }
        _ => {}
    }

    if step.step_type != StepType::Condition
        && (!step.then_steps.is_empty() || !step.else_steps.is_empty())
    {
        issues.push(ValidationIssue::step(
            step,
            "Only condition steps may have thenSteps or elseSteps",
        ));
    }
    if step.step_type != StepType::Loop && !step.steps.is_empty() {
        issues.push(ValidationIssue::step(step, "Only loop steps may have nested steps"));
    }

    for child in step.children() {
        check_step(child, depth, config, seen, issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(value: Value) -> Action {
        let mut base = json!({
            "_id": "act_1",
            "workspaceId": "ws_1",
            "name": "Test",
            "slug": "test",
            "trigger": {"type": "manual"},
            "steps": []
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), value.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    fn messages(issues: &[ValidationIssue]) -> Vec<String> {
        issues.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_valid_action_has_no_issues() {
        let action = action(json!({
            "steps": [
                {"id": "check", "type": "condition",
                 "config": {"conditions": [{"field": "stage", "operator": "equals", "value": "won"}]},
                 "thenSteps": [{"id": "tag", "type": "updateField", "config": {"field": "tag", "value": "hot"}}]},
                {"id": "each", "type": "loop", "config": {"source": "array", "items": [1], "maxIterations": 5},
                 "steps": [{"id": "inc", "type": "transformField", "config": {"field": "n", "transform": "increment"}}]}
            ]
        }));
        assert!(validate_action(&action, &EngineConfig::default()).is_empty());
    }

    #[test]
    fn test_step_problems() {
        let action = action(json!({
            "steps": [
                {"id": "a", "type": "sendFax"},
                {"id": "a", "type": "condition", "config": {}},
                {"id": "l", "type": "loop", "config": {"source": "array", "items": []}},
                {"id": "big", "type": "loop", "config": {"source": "array", "maxIterations": 100000}},
                {"id": "odd", "type": "updateField", "thenSteps": [{"id": "x", "type": "clearField"}]}
            ]
        }));
        assert_eq!(
            messages(&validate_action(&action, &EngineConfig::default())),
            vec![
                "step 'a': Unknown step type: sendFax",
                "step 'a': Duplicate step id",
                "step 'a': Condition step has no conditions",
                "step 'l': Loop requires maxIterations of at least 1",
                "step 'big': maxIterations 100000 is above the limit of 1000",
                "step 'odd': Only condition steps may have thenSteps or elseSteps",
            ]
        );
    }

    #[test]
    fn test_static_loop_nesting() {
        let inner = json!({"id": "l3", "type": "loop", "config": {"maxIterations": 1}});
        let middle = json!({"id": "l2", "type": "loop", "config": {"maxIterations": 1}, "steps": [inner]});
        let outer = json!({"id": "l1", "type": "loop", "config": {"maxIterations": 1}, "steps": [middle]});
        let action = action(json!({"steps": [outer]}));

        let config = EngineConfig {
            max_loop_nesting: 2,
            ..EngineConfig::default()
        };
        assert_eq!(
            messages(&validate_action(&action, &config)),
            vec!["step 'l3': Loop nesting depth 3 is above the maximum of 2"]
        );
    }

    #[test]
    fn test_trigger_problems() {
        let missing = action(json!({"trigger": {"type": "scheduled"}}));
        assert_eq!(
            messages(&validate_action(&missing, &EngineConfig::default())),
            vec!["Scheduled trigger requires a cron schedule"]
        );

        let invalid = action(json!({"trigger": {"type": "scheduled", "schedule": "soon"}}));
        let issues = validate_action(&invalid, &EngineConfig::default());
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("Invalid cron expression"));

        let unwatched = action(json!({"trigger": {"type": "onFieldChange"}}));
        assert_eq!(
            messages(&validate_action(&unwatched, &EngineConfig::default())),
            vec!["onFieldChange trigger without watchedFields never fires"]
        );
    }
}
