//! Typed step configurations.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::condition::Condition;
use crate::error::{ActionError, ActionResult};
use crate::model::{Step, StepType};
use crate::webhook::WebhookConfig;

/// A step with its interpolated config parsed into the shape its type expects.
#[derive(Debug)]
pub(crate) enum StepCommand {
    UpdateField(UpdateFieldConfig),
    ClearField(ClearFieldConfig),
    CopyField(CopyFieldConfig),
    TransformField(TransformFieldConfig),
    CreateRecord(CreateRecordConfig),
    DeleteRecord(RecordRef),
    ArchiveRecord(RecordRef),
    AddToList(ListEntryConfig),
    RemoveFromList(ListEntryConfig),
    UpdateListEntry(ListEntryConfig),
    SendWebhook(WebhookConfig),
    Condition(ConditionConfig),
    Loop(LoopConfig),
    CallMcpTool(ToolCallConfig),
}

impl StepCommand {
    pub(crate) fn parse(step: &Step, config: Value) -> ActionResult<Self> {
        let command = match &step.step_type {
            StepType::UpdateField => Self::UpdateField(decode(step, config)?),
            StepType::ClearField => Self::ClearField(decode(step, config)?),
            StepType::CopyField => Self::CopyField(decode(step, config)?),
            StepType::TransformField => Self::TransformField(decode(step, config)?),
            StepType::CreateRecord => Self::CreateRecord(decode(step, config)?),
            StepType::DeleteRecord => Self::DeleteRecord(decode(step, config)?),
            StepType::ArchiveRecord => Self::ArchiveRecord(decode(step, config)?),
            StepType::AddToList => Self::AddToList(decode(step, config)?),
            StepType::RemoveFromList => Self::RemoveFromList(decode(step, config)?),
            StepType::UpdateListEntry => Self::UpdateListEntry(decode(step, config)?),
            StepType::SendWebhook => Self::SendWebhook(decode(step, config)?),
            StepType::Condition => Self::Condition(decode(step, config)?),
            StepType::Loop => Self::Loop(decode(step, config)?),
            StepType::CallMcpTool => Self::CallMcpTool(decode(step, config)?),
            StepType::Unknown(name) => {
                return Err(ActionError::validation(format!("Unknown step type: {name}")))
            }
        };
        Ok(command)
    }
}

fn decode<T: DeserializeOwned>(step: &Step, config: Value) -> ActionResult<T> {
    let config = match config {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(config).map_err(|e| {
        ActionError::validation(format!(
            "Invalid {} config for step '{}': {}",
            step.step_type, step.id, e
        ))
    })
}

/// Blank ids (e.g. an unresolved embedded placeholder) count as absent.
pub(crate) fn non_blank(id: &Option<String>) -> Option<&str> {
    id.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateFieldConfig {
    pub field: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClearFieldConfig {
    pub field: String,
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CopyFieldConfig {
    pub source_field: String,
    pub target_field: String,
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransformFieldConfig {
    pub field: String,
    pub transform: String,
    #[serde(default)]
    pub target_field: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateRecordConfig {
    pub object_type_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordRef {
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListEntryConfig {
    pub list_id: String,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

/// What a `condition` step evaluates against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ConditionSubject {
    #[default]
    Record,
    Previous,
    LoopItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConditionConfig {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub subject: ConditionSubject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum LoopSource {
    Query,
    Array,
    Field,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoopConfig {
    pub source: LoopSource,
    #[serde(default)]
    pub items: Option<Value>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub object_type_id: Option<String>,
    #[serde(default)]
    pub filters: Vec<Condition>,
    #[serde(default)]
    pub max_iterations: Option<u64>,
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolCallConfig {
    #[serde(alias = "toolName")]
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}
