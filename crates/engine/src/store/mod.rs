//! Record store abstraction.
//!
//! The engine never talks to a database directly. Every read and write
//! goes through [`RecordStore`], an async document interface with
//! get/query/insert/update/delete over named tables. [`MemoryStore`] is
//! the bundled implementation; [`TimedStore`] bounds any store with a
//! per-operation deadline.

mod memory;

pub use memory::{MemoryStore, SeedData};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::json;

/// Document id field managed by the store.
pub const ID_FIELD: &str = "_id";

/// Creation timestamp field managed by the store (epoch milliseconds).
pub const CREATION_TIME_FIELD: &str = "_creationTime";

/// Tables the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Table {
    ObjectTypes,
    Records,
    Lists,
    ListEntries,
    Actions,
    ActionExecutions,
    AuditLogs,
    WebhookLogs,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::ObjectTypes => "objectTypes",
            Table::Records => "records",
            Table::Lists => "lists",
            Table::ListEntries => "listEntries",
            Table::Actions => "actions",
            Table::ActionExecutions => "actionExecutions",
            Table::AuditLogs => "auditLogs",
            Table::WebhookLogs => "webhookLogs",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: system fields plus user fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_creationTime")]
    pub creation_time: i64,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Get a field by dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.fields.get(head)?;
        match rest {
            Some(rest) => json::lookup(value, rest),
            None => Some(value),
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.get_str("workspaceId")
    }

    /// Fail with `WrongWorkspace` unless the document lives in `workspace_id`.
    pub fn ensure_workspace(&self, table: Table, workspace_id: &str) -> Result<(), StoreError> {
        if self.workspace_id() == Some(workspace_id) {
            Ok(())
        } else {
            Err(StoreError::wrong_workspace(table, &self.id))
        }
    }

    /// Full JSON view including `_id` and `_creationTime`.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        map.insert(
            CREATION_TIME_FIELD.to_string(),
            Value::from(self.creation_time),
        );
        Value::Object(map)
    }

    /// Deserialize the document into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.to_value())?)
    }
}

/// Serialize an entity into insertable fields, dropping system fields.
pub fn encode<T: Serialize>(entity: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(entity)? {
        Value::Object(mut map) => {
            map.remove(ID_FIELD);
            map.remove(CREATION_TIME_FIELD);
            Ok(map)
        }
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Equality-filtered lookup, the shape of an index range scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexQuery {
    pub filters: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl IndexQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter on a (dotted) field path.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|(field, expected)| {
            doc.get(field)
                .is_some_and(|actual| json::values_equal(actual, expected))
        })
    }
}

/// Field changes applied to one document as a single write.
///
/// Paths are either a top-level field (`status`) or `parent.child`, which
/// addresses the key `child` inside the object field `parent` and leaves
/// the other keys of `parent` untouched. Everything after the first `.` is
/// the child key, so `data.a.b` names the key `a.b`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub set: Map<String, Value>,
    pub unset: Vec<String>,
    /// Equality preconditions on dotted paths. The update is skipped unless
    /// every one holds when the write happens.
    pub expect: Vec<(String, Value)>,
}

impl DocumentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(path.into(), value.into());
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn expect(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.expect.push((path.into(), value.into()));
        self
    }

    /// Check the preconditions and apply the changes to `doc`.
    ///
    /// Returns `false`, leaving `doc` unchanged, when a precondition fails.
    /// System fields are never written.
    pub fn apply(self, doc: &mut Document) -> bool {
        let holds = self.expect.iter().all(|(path, expected)| {
            doc.get(path)
                .is_some_and(|actual| json::values_equal(actual, expected))
        });
        if !holds {
            return false;
        }

        for path in self.unset {
            match path.split_once('.') {
                Some((parent, child)) => {
                    if let Some(Value::Object(map)) = doc.fields.get_mut(parent) {
                        map.remove(child);
                    }
                }
                None => {
                    doc.fields.remove(&path);
                }
            }
        }
        for (path, value) in self.set {
            match path.split_once('.') {
                Some((parent, child)) => {
                    let slot = doc
                        .fields
                        .entry(parent.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    if let Value::Object(map) = slot {
                        map.insert(child.to_string(), value);
                    }
                }
                None if path == ID_FIELD || path == CREATION_TIME_FIELD => {}
                None => {
                    doc.fields.insert(path, value);
                }
            }
        }
        true
    }
}

impl From<Map<String, Value>> for DocumentUpdate {
    fn from(set: Map<String, Value>) -> Self {
        Self {
            set,
            ..Self::default()
        }
    }
}

/// Async document store used for every persistent read and write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a document by id.
    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>, StoreError>;

    /// Documents matching every filter, in insertion order.
    async fn query(&self, table: Table, query: &IndexQuery) -> Result<Vec<Document>, StoreError>;

    /// Insert a document, returning its id.
    async fn insert(&self, table: Table, fields: Map<String, Value>) -> Result<String, StoreError>;

    /// Apply `update` to an existing document as one atomic write.
    ///
    /// Returns `false` when a precondition failed and nothing was written.
    async fn update(&self, table: Table, id: &str, update: DocumentUpdate)
        -> Result<bool, StoreError>;

    /// Merge `fields` into an existing document (see [`DocumentUpdate`] for
    /// the `parent.child` path form).
    async fn patch(&self, table: Table, id: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.update(table, id, DocumentUpdate::from(fields)).await.map(|_| ())
    }

    /// Delete a document.
    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError>;

    /// First document matching the query.
    async fn first(&self, table: Table, query: &IndexQuery) -> Result<Option<Document>, StoreError> {
        let query = query.clone().limit(1);
        Ok(self.query(table, &query).await?.into_iter().next())
    }

    /// Get a document or fail with `NotFound`.
    async fn require(&self, table: Table, id: &str) -> Result<Document, StoreError> {
        self.get(table, id)
            .await?
            .ok_or_else(|| StoreError::not_found(table, id))
    }
}

/// Wraps a store so every operation is cancelled after `timeout`.
#[derive(Clone)]
pub struct TimedStore {
    inner: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl RecordStore for TimedStore {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>, StoreError> {
        self.bounded(self.inner.get(table, id)).await
    }

    async fn query(&self, table: Table, query: &IndexQuery) -> Result<Vec<Document>, StoreError> {
        self.bounded(self.inner.query(table, query)).await
    }

    async fn insert(&self, table: Table, fields: Map<String, Value>) -> Result<String, StoreError> {
        self.bounded(self.inner.insert(table, fields)).await
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.update(table, id, update)).await
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
        self.bounded(self.inner.delete(table, id)).await
    }
}
