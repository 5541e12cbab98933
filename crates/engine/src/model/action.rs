//! Action definitions and their triggers.

use serde::{Deserialize, Serialize};

use super::Step;
use crate::condition::Condition;

/// Event kind an action reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerType {
    Manual,
    OnCreate,
    OnUpdate,
    OnDelete,
    OnFieldChange,
    OnListAdd,
    OnListRemove,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::OnCreate => "onCreate",
            Self::OnUpdate => "onUpdate",
            Self::OnDelete => "onDelete",
            Self::OnFieldChange => "onFieldChange",
            Self::OnListAdd => "onListAdd",
            Self::OnListRemove => "onListRemove",
            Self::Scheduled => "scheduled",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When an action fires and what it is scoped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,

    /// Restrict to records of one object type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type_id: Option<String>,

    /// Restrict list triggers to one list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,

    /// Fields watched by `onFieldChange`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watched_fields: Option<Vec<String>>,

    /// Cron expression for `scheduled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl TriggerSpec {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            object_type_id: None,
            list_id: None,
            watched_fields: None,
            schedule: None,
        }
    }
}

/// A user-defined automation: a trigger, optional conditions and an ordered step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "_id", default)]
    pub id: String,

    pub workspace_id: String,

    pub name: String,

    /// Unique per workspace.
    pub slug: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub trigger: TriggerSpec,

    /// Checked against the triggering record before automatic runs.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub is_system: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

fn default_true() -> bool {
    true
}
