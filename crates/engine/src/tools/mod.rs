//! Tool registry for `callMcpTool` steps.

mod records;

pub(crate) use records::find_records;
pub use records::{GetRecordTool, SearchRecordsTool};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ActionError, ActionResult};
use crate::store::RecordStore;

/// Status of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub status: ToolStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Tool-level error, reported by the tool rather than raised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Caller identity handed to tools.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub workspace_id: String,
    pub actor_id: Option<String>,
    pub execution_id: Option<String>,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's unique name.
    fn name(&self) -> &'static str;

    /// Call the tool with already-interpolated arguments.
    async fn call(&self, arguments: &Value, ctx: &ToolContext) -> ActionResult<ToolResult>;
}

/// Registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in record tools bound to `store`.
    pub fn with_record_tools(store: Arc<dyn RecordStore>) -> Self {
        let mut registry = Self::new();
        registry.register(GetRecordTool::new(store.clone()));
        registry.register(SearchRecordsTool::new(store));
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Call a tool by name.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &ToolContext,
    ) -> ActionResult<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| ActionError::validation(format!("Unknown tool: {name}")))?;
        tool.call(arguments, ctx).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list())
            .finish()
    }
}
