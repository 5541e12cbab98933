//! Trigger matching for data-change events.

use serde::{Deserialize, Serialize};

use crate::context::RecordSnapshot;
use crate::model::{Action, TriggerType};

/// A data-change (or manual/scheduled) event that may fire actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub workspace_id: String,

    pub event_type: TriggerType,

    #[serde(default)]
    pub object_type_id: Option<String>,

    #[serde(default)]
    pub list_id: Option<String>,

    /// Fields modified by the mutation, for `onFieldChange`.
    #[serde(default)]
    pub changed_fields: Vec<String>,

    #[serde(default)]
    pub record_id: Option<String>,

    /// Record as it was at event time. Required for `onDelete`, where the
    /// record can no longer be loaded.
    #[serde(skip)]
    pub record: Option<RecordSnapshot>,

    #[serde(default)]
    pub actor_id: Option<String>,
}

impl TriggerEvent {
    pub fn new(workspace_id: impl Into<String>, event_type: TriggerType) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            event_type,
            object_type_id: None,
            list_id: None,
            changed_fields: Vec::new(),
            record_id: None,
            record: None,
            actor_id: None,
        }
    }

    pub fn with_record(mut self, record: RecordSnapshot) -> Self {
        self.record_id = Some(record.id.clone());
        if self.object_type_id.is_none() {
            self.object_type_id = record.object_type_id.clone();
        }
        self.record = Some(record);
        self
    }

    pub fn with_object_type(mut self, object_type_id: impl Into<String>) -> Self {
        self.object_type_id = Some(object_type_id.into());
        self
    }

    pub fn with_list(mut self, list_id: impl Into<String>) -> Self {
        self.list_id = Some(list_id.into());
        self
    }

    pub fn with_changed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

/// Selects the actions an event should fire.
#[derive(Debug, Default, Clone, Copy)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Active actions in the event's workspace whose trigger matches.
    pub fn select<'a>(&self, actions: &'a [Action], event: &TriggerEvent) -> Vec<&'a Action> {
        actions
            .iter()
            .filter(|action| self.matches(action, event))
            .collect()
    }

    pub fn matches(&self, action: &Action, event: &TriggerEvent) -> bool {
        let trigger = &action.trigger;

        if !action.is_active
            || action.workspace_id != event.workspace_id
            || trigger.trigger_type != event.event_type
        {
            return false;
        }

        if let Some(object_type_id) = &trigger.object_type_id {
            if event.object_type_id.as_ref() != Some(object_type_id) {
                return false;
            }
        }

        if let Some(list_id) = &trigger.list_id {
            if event.list_id.as_ref() != Some(list_id) {
                return false;
            }
        }

        if trigger.trigger_type == TriggerType::OnFieldChange {
            let watched = trigger.watched_fields.as_deref().unwrap_or_default();
            return watched
                .iter()
                .any(|field| event.changed_fields.contains(field));
        }

        true
    }
}
