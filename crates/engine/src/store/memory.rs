//! In-memory record store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{
    Document, DocumentUpdate, IndexQuery, RecordStore, Table, CREATION_TIME_FIELD, ID_FIELD,
};
use crate::error::StoreError;

type Tables = HashMap<Table, IndexMap<String, Document>>;

/// Initial contents for a [`MemoryStore`], usually read from a YAML or JSON file.
///
/// Documents may carry their own `_id`; missing ids are generated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedData {
    #[serde(default)]
    pub object_types: Vec<Map<String, Value>>,
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
    #[serde(default)]
    pub lists: Vec<Map<String, Value>>,
    #[serde(default)]
    pub list_entries: Vec<Map<String, Value>>,
    #[serde(default)]
    pub actions: Vec<Map<String, Value>>,
}

impl SeedData {
    /// Parse seed data from YAML (JSON is accepted as a YAML subset).
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(text).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn into_tables(self) -> Vec<(Table, Vec<Map<String, Value>>)> {
        vec![
            (Table::ObjectTypes, self.object_types),
            (Table::Records, self.records),
            (Table::Lists, self.lists),
            (Table::ListEntries, self.list_entries),
            (Table::Actions, self.actions),
        ]
    }
}

/// Process-local store backed by ordered maps behind an async lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from seed data.
    pub fn from_seed(seed: SeedData) -> Self {
        let mut tables = Tables::new();
        for (table, docs) in seed.into_tables() {
            let entries = tables.entry(table).or_default();
            for fields in docs {
                let doc = new_document(fields);
                entries.insert(doc.id.clone(), doc);
            }
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Number of documents in a table.
    pub async fn count(&self, table: Table) -> usize {
        self.tables
            .read()
            .await
            .get(&table)
            .map_or(0, IndexMap::len)
    }
}

fn new_document(mut fields: Map<String, Value>) -> Document {
    let id = match fields.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        _ => uuid::Uuid::new_v4().to_string(),
    };
    let creation_time = fields
        .remove(CREATION_TIME_FIELD)
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    Document {
        id,
        creation_time,
        fields,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|docs| docs.get(id)).cloned())
    }

    async fn query(&self, table: Table, query: &IndexQuery) -> Result<Vec<Document>, StoreError> {
        let tables = self.tables.read().await;
        let Some(docs) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        let matching = docs.values().filter(|doc| query.matches(doc)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn insert(&self, table: Table, mut fields: Map<String, Value>) -> Result<String, StoreError> {
        fields.remove(ID_FIELD);
        fields.remove(CREATION_TIME_FIELD);
        let doc = new_document(fields);
        let id = doc.id.clone();
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .insert(id.clone(), doc);
        Ok(id)
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let doc = tables
            .get_mut(&table)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(table, id))?;
        Ok(update.apply(doc))
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .get_mut(&table)
            .and_then(|docs| docs.shift_remove(id))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(table, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_patch_delete() {
        let store = MemoryStore::new();
        let id = store
            .insert(Table::Records, fields(json!({"workspaceId": "ws_1", "data": {"a": 1}})))
            .await
            .unwrap();

        let doc = store.get(Table::Records, &id).await.unwrap().unwrap();
        assert_eq!(doc.get("data.a"), Some(&json!(1)));
        assert!(doc.creation_time > 0);

        store
            .patch(Table::Records, &id, fields(json!({"data": {"a": 2}})))
            .await
            .unwrap();
        let doc = store.require(Table::Records, &id).await.unwrap();
        assert_eq!(doc.get("data.a"), Some(&json!(2)));
        assert_eq!(doc.workspace_id(), Some("ws_1"));

        store.delete(Table::Records, &id).await.unwrap();
        assert!(store.get(Table::Records, &id).await.unwrap().is_none());
        assert_eq!(
            store.delete(Table::Records, &id).await,
            Err(StoreError::not_found(Table::Records, id.clone()))
        );
    }

    #[tokio::test]
    async fn test_concurrent_nested_updates_keep_both_keys() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let id = store
            .insert(Table::Records, fields(json!({"data": {"name": "Acme"}})))
            .await
            .unwrap();

        let writes = (0..10).map(|i| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .update(Table::Records, &id, DocumentUpdate::new().set(format!("data.k{i}"), i))
                    .await
            })
        });
        for write in futures::future::join_all(writes).await {
            assert!(write.unwrap().unwrap());
        }

        let doc = store.require(Table::Records, &id).await.unwrap();
        let data = doc.get("data").and_then(Value::as_object).unwrap();
        assert_eq!(data.len(), 11);
        assert_eq!(data["k7"], json!(7));
    }

    #[tokio::test]
    async fn test_update_precondition() {
        let store = MemoryStore::new();
        let id = store
            .insert(Table::ActionExecutions, fields(json!({"status": "running"})))
            .await
            .unwrap();

        let finish = || DocumentUpdate::new().expect("status", "running").set("status", "completed");
        assert!(store.update(Table::ActionExecutions, &id, finish()).await.unwrap());
        assert!(!store.update(Table::ActionExecutions, &id, finish()).await.unwrap());
    }

    #[tokio::test]
    async fn test_patch_missing_document() {
        let store = MemoryStore::new();
        let err = store
            .patch(Table::Lists, "nope", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::not_found(Table::Lists, "nope"));
    }

    #[tokio::test]
    async fn test_query_filters_and_limit_in_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let ws = if i % 2 == 0 { "ws_1" } else { "ws_2" };
            store
                .insert(Table::Records, fields(json!({"workspaceId": ws, "n": i})))
                .await
                .unwrap();
        }

        let all = store
            .query(Table::Records, &IndexQuery::new().eq("workspaceId", "ws_1"))
            .await
            .unwrap();
        let ns: Vec<_> = all.iter().map(|d| d.fields["n"].clone()).collect();
        assert_eq!(ns, vec![json!(0), json!(2), json!(4)]);

        let first = store
            .first(Table::Records, &IndexQuery::new().eq("workspaceId", "ws_2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.fields["n"], json!(1));

        let limited = store
            .query(Table::Records, &IndexQuery::new().limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_seed_keeps_ids() {
        let seed = SeedData::parse(
            r#"
objectTypes:
  - _id: ot_deals
    workspaceId: ws_1
    name: Deals
records:
  - _id: rec_1
    workspaceId: ws_1
    objectTypeId: ot_deals
    data:
      stage: won
  - workspaceId: ws_1
    objectTypeId: ot_deals
    data: {}
"#,
        )
        .unwrap();
        let store = MemoryStore::from_seed(seed);

        let rec = store.require(Table::Records, "rec_1").await.unwrap();
        assert_eq!(rec.get_str("data.stage"), Some("won"));
        assert_eq!(store.count(Table::Records).await, 2);
        assert_eq!(store.count(Table::ObjectTypes).await, 1);
        assert_eq!(store.count(Table::Actions).await, 0);
    }

    #[test]
    fn test_seed_rejects_unknown_tables() {
        assert!(SeedData::parse("widgets: []").is_err());
    }
}
