//! Step context passed between steps of one execution.
//!
//! A [`StepContext`] is a value. Deriving a new context (after a step, or
//! for a loop iteration) clones and extends it, so a nested sequence can
//! never leak state into its siblings or into earlier iterations.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ActionError, ActionResult};
use crate::store::{Document, ID_FIELD, CREATION_TIME_FIELD};

/// Snapshot of the record that triggered the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub id: String,
    pub creation_time: i64,
    pub object_type_id: Option<String>,
    pub data: Map<String, Value>,
}

impl RecordSnapshot {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            creation_time: doc.creation_time,
            object_type_id: doc.get_str("objectTypeId").map(str::to_string),
            data: doc
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Record data with `_id` and `_creationTime` merged in.
    pub fn to_value(&self) -> Value {
        let mut map = self.data.clone();
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        map.insert(
            CREATION_TIME_FIELD.to_string(),
            Value::from(self.creation_time),
        );
        Value::Object(map)
    }
}

/// Context available to a step while it runs.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    pub workspace_id: String,
    pub actor_id: Option<String>,
    pub execution_id: Option<String>,
    pub record: Option<RecordSnapshot>,
    pub previous_step_output: Option<Value>,
    pub variables: HashMap<String, Value>,
    pub loop_item: Option<Value>,
    pub loop_index: Option<usize>,
    pub nesting_depth: usize,
}

impl StepContext {
    /// Initial context for a run: no variables, no loop, depth 0.
    pub fn new(
        workspace_id: impl Into<String>,
        actor_id: Option<String>,
        record: Option<RecordSnapshot>,
        execution_id: Option<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            actor_id,
            execution_id,
            record,
            ..Default::default()
        }
    }

    /// Context seen by the step after `step_id` produced `output`.
    pub fn with_step_output(&self, step_id: &str, output: Value) -> Self {
        let mut next = self.clone();
        next.variables.insert(step_id.to_string(), output.clone());
        next.previous_step_output = Some(output);
        next
    }

    /// Depth a loop body would run at, or an error if that is too deep.
    pub fn check_loop_depth(&self, max_depth: usize) -> ActionResult<usize> {
        let depth = self.nesting_depth + 1;
        if depth > max_depth {
            return Err(ActionError::LoopNestingExceeded {
                depth,
                max: max_depth,
            });
        }
        Ok(depth)
    }

    /// Context for one loop iteration.
    pub fn with_loop_item(&self, item: Value, index: usize, max_depth: usize) -> ActionResult<Self> {
        let depth = self.check_loop_depth(max_depth)?;
        let mut next = self.clone();
        next.loop_item = Some(item);
        next.loop_index = Some(index);
        next.nesting_depth = depth;
        Ok(next)
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.id.as_str())
    }
}
