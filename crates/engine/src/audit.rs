//! Audit log entries for step side effects and completed runs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{encode, RecordStore, Table};

/// Who performed an audited change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    System,
}

/// A single field change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub workspace_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    pub actor_id: Option<String>,
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AuditEntry {
    pub fn new(
        workspace_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            changes: Vec::new(),
            actor_id: None,
            actor_type: ActorType::System,
            metadata: None,
        }
    }

    /// Attribute the change to a user, or to the system when absent.
    pub fn by(mut self, actor_id: Option<&str>) -> Self {
        self.actor_id = actor_id.map(str::to_string);
        self.actor_type = if actor_id.is_some() {
            ActorType::User
        } else {
            ActorType::System
        };
        self
    }

    pub fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

/// Writes audit entries into the `auditLogs` table.
pub struct StoreAuditLog {
    store: Arc<dyn RecordStore>,
}

impl StoreAuditLog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditLog for StoreAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        tracing::debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            action = %entry.action,
            "Writing audit entry"
        );
        self.store.insert(Table::AuditLogs, encode(&entry)?).await?;
        Ok(())
    }
}
