//! Built-in tools that read records from the store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolResult};
use crate::condition::{Condition, ConditionEvaluator};
use crate::error::{ActionError, ActionResult, StoreError};
use crate::store::{Document, IndexQuery, RecordStore, Table};

const DEFAULT_SEARCH_LIMIT: usize = 25;
const MAX_SEARCH_LIMIT: usize = 100;

/// Non-archived records of an object type whose `data` passes `filters`.
pub(crate) async fn find_records(
    store: &dyn RecordStore,
    workspace_id: &str,
    object_type_id: &str,
    filters: &[Condition],
    limit: Option<usize>,
) -> Result<Vec<Document>, StoreError> {
    let query = IndexQuery::new()
        .eq("workspaceId", workspace_id)
        .eq("objectTypeId", object_type_id);
    let evaluator = ConditionEvaluator::new();

    let matching = store
        .query(Table::Records, &query)
        .await?
        .into_iter()
        .filter(|doc| doc.get("archived").and_then(Value::as_bool) != Some(true))
        .filter(|doc| {
            let data = doc.get("data").cloned().unwrap_or(Value::Null);
            evaluator.evaluate(filters, &data)
        });

    Ok(match limit {
        Some(limit) => matching.take(limit).collect(),
        None => matching.collect(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRecordArgs {
    record_id: String,
}

/// `get_record {recordId}`: one record of the caller's workspace.
pub struct GetRecordTool {
    store: Arc<dyn RecordStore>,
}

impl GetRecordTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetRecordTool {
    fn name(&self) -> &'static str {
        "get_record"
    }

    async fn call(&self, arguments: &Value, ctx: &ToolContext) -> ActionResult<ToolResult> {
        let args: GetRecordArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ActionError::validation(format!("get_record: {e}")))?;

        match self.store.get(Table::Records, &args.record_id).await? {
            Some(doc) if doc.workspace_id() == Some(ctx.workspace_id.as_str()) => {
                Ok(ToolResult::success(doc.to_value()))
            }
            _ => Ok(ToolResult::error(format!(
                "Record not found: {}",
                args.record_id
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRecordsArgs {
    object_type_id: String,
    #[serde(default)]
    filters: Vec<Condition>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `search_records {objectTypeId, filters?, limit?}`.
pub struct SearchRecordsTool {
    store: Arc<dyn RecordStore>,
}

impl SearchRecordsTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchRecordsTool {
    fn name(&self) -> &'static str {
        "search_records"
    }

    async fn call(&self, arguments: &Value, ctx: &ToolContext) -> ActionResult<ToolResult> {
        let args: SearchRecordsArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ActionError::validation(format!("search_records: {e}")))?;
        let limit = args
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_LIMIT);

        let records: Vec<Value> = find_records(
            self.store.as_ref(),
            &ctx.workspace_id,
            &args.object_type_id,
            &args.filters,
            Some(limit),
        )
        .await?
        .iter()
        .map(Document::to_value)
        .collect();

        Ok(ToolResult::success(json!({
            "count": records.len(),
            "records": records,
        })))
    }
}
