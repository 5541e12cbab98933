//! Step definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Step type tag. Unrecognised names are kept so they can fail at run time
/// with a clear message instead of rejecting the whole action on load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    UpdateField,
    ClearField,
    CopyField,
    TransformField,
    CreateRecord,
    DeleteRecord,
    ArchiveRecord,
    AddToList,
    RemoveFromList,
    UpdateListEntry,
    SendWebhook,
    Condition,
    Loop,
    CallMcpTool,
    Unknown(String),
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UpdateField => "updateField",
            Self::ClearField => "clearField",
            Self::CopyField => "copyField",
            Self::TransformField => "transformField",
            Self::CreateRecord => "createRecord",
            Self::DeleteRecord => "deleteRecord",
            Self::ArchiveRecord => "archiveRecord",
            Self::AddToList => "addToList",
            Self::RemoveFromList => "removeFromList",
            Self::UpdateListEntry => "updateListEntry",
            Self::SendWebhook => "sendWebhook",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::CallMcpTool => "callMcpTool",
            Self::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for StepType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "updateField" => Self::UpdateField,
            "clearField" => Self::ClearField,
            "copyField" => Self::CopyField,
            "transformField" => Self::TransformField,
            "createRecord" => Self::CreateRecord,
            "deleteRecord" => Self::DeleteRecord,
            "archiveRecord" => Self::ArchiveRecord,
            "addToList" => Self::AddToList,
            "removeFromList" => Self::RemoveFromList,
            "updateListEntry" => Self::UpdateListEntry,
            "sendWebhook" => Self::SendWebhook,
            "condition" => Self::Condition,
            "loop" => Self::Loop,
            "callMcpTool" => Self::CallMcpTool,
            _ => Self::Unknown(s),
        }
    }
}

impl From<StepType> for String {
    fn from(t: StepType) -> Self {
        match t {
            StepType::Unknown(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work inside an action.
///
/// `config` is interpolated against the current context just before the
/// step runs. Nested step lists belong to `condition` (`thenSteps`,
/// `elseSteps`) and `loop` (`steps`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub then_steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub else_steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: StepType, config: Value) -> Self {
        Self {
            id: id.into(),
            step_type,
            name: None,
            config,
            then_steps: Vec::new(),
            else_steps: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_then(mut self, steps: Vec<Step>) -> Self {
        self.then_steps = steps;
        self
    }

    pub fn with_else(mut self, steps: Vec<Step>) -> Self {
        self.else_steps = steps;
        self
    }

    pub fn with_body(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    /// All directly nested steps, in declaration order.
    pub fn children(&self) -> impl Iterator<Item = &Step> {
        self.then_steps
            .iter()
            .chain(self.else_steps.iter())
            .chain(self.steps.iter())
    }

    /// Deepest chain of loops rooted at this step, counting itself if it is one.
    pub fn loop_depth(&self) -> usize {
        let inner = self.children().map(Step::loop_depth).max().unwrap_or(0);
        if self.step_type == StepType::Loop {
            inner + 1
        } else {
            inner
        }
    }
}
