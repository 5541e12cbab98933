//! Steps that leave the process: webhooks and tool calls.

use serde_json::{json, Map, Value};

use super::command::ToolCallConfig;
use super::{StepEffect, StepInterpreter, StepOutcome};
use crate::context::StepContext;
use crate::error::ActionError;
use crate::model::Step;
use crate::result_ext::ResultExt;
use crate::store::{encode, Table};
use crate::tools::ToolContext;
use crate::webhook::{WebhookConfig, WebhookLog};

impl StepInterpreter {
    pub(super) async fn send_webhook(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: WebhookConfig,
    ) -> StepOutcome {
        let delivery = self.webhooks.send(&cfg).await;
        self.write_webhook_log(step, ctx, &delivery.log).await;

        let response = delivery.outcome?;
        let output = serde_json::to_value(response).map_err(ActionError::from)?;
        Ok(StepEffect::new(output, ctx))
    }

    async fn write_webhook_log(&self, step: &Step, ctx: &StepContext, log: &WebhookLog) {
        let mut fields = Map::new();
        fields.insert("workspaceId".into(), json!(ctx.workspace_id));
        fields.insert("executionId".into(), json!(ctx.execution_id));
        fields.insert("stepId".into(), json!(step.id));

        let encoded = match encode(log) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(step_id = %step.id, error = %e, "Failed to encode webhook log");
                return;
            }
        };
        fields.extend(encoded);

        let _ = self
            .store
            .insert(Table::WebhookLogs, fields)
            .await
            .log(format!("writing webhook log for step '{}'", step.id));
    }

    pub(super) async fn call_tool(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: ToolCallConfig,
    ) -> StepOutcome {
        let tool_ctx = ToolContext {
            workspace_id: ctx.workspace_id.clone(),
            actor_id: ctx.actor_id.clone(),
            execution_id: ctx.execution_id.clone(),
        };
        let arguments = match cfg.arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let timeout = self.config.tool_timeout();
        let result = tokio::time::timeout(timeout, self.tools.call(&cfg.tool, &arguments, &tool_ctx))
            .await
            .map_err(|_| {
                ActionError::external(format!(
                    "Tool '{}' timed out after {}s",
                    cfg.tool,
                    timeout.as_secs()
                ))
            })??;

        if !result.is_success() {
            let message = result.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(ActionError::external(format!("Tool '{}' failed: {message}", cfg.tool)).into());
        }

        tracing::debug!(step_id = %step.id, tool = %cfg.tool, "Tool call succeeded");
        Ok(StepEffect::new(
            json!({"tool": cfg.tool, "data": result.data}),
            ctx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::config::EngineConfig;
    use crate::error::ActionResult;
    use crate::interpreter::halted;
    use crate::interpreter::tests::{harness, harness_with, step, Harness};
    use crate::model::StepType;
    use crate::store::{IndexQuery, RecordStore, Table};
    use crate::tools::{Tool, ToolContext, ToolResult};

    async fn webhook_logs(h: &Harness) -> Vec<crate::store::Document> {
        h.store.query(Table::WebhookLogs, &IndexQuery::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_webhook_delivers_interpolated_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/deal")
            .match_body(mockito::Matcher::Json(json!({"deal": "Acme", "amount": 41.6})))
            .with_status(200)
            .with_body(r#"{"received": true}"#)
            .create_async()
            .await;

        let h = harness_with(EngineConfig::default(), false);
        let steps = vec![step(
            "notify",
            StepType::SendWebhook,
            json!({
                "url": format!("{}/hooks/deal", server.url()),
                "body": {"deal": "{{record.name}}", "amount": "{{record.amount}}"}
            }),
        )];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");
        mock.assert_async().await;

        let output = results[0].output.as_ref().unwrap();
        assert_eq!(output["statusCode"], 200);
        assert_eq!(output["body"], json!({"received": true}));

        let logs = webhook_logs(&h).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].get_str("stepId"), Some("notify"));
        assert_eq!(logs[0].get_str("executionId"), Some("ex_test"));
        assert_eq!(logs[0].get("success"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_private_address_blocked_and_logged() {
        let h = harness();
        let steps = vec![
            step("notify", StepType::SendWebhook, json!({"url": "http://10.0.0.5/hook"})),
            step("after", StepType::UpdateField, json!({"field": "x", "value": 1})),
        ];
        let (results, outcome) = h.run(&steps, h.ctx("rec_1").await).await;

        assert!(outcome.is_ok());
        assert_eq!(results.len(), 1);
        let error = results[0].error.as_deref().unwrap();
        assert!(error.contains("SSRF protection"), "{error}");

        let logs = webhook_logs(&h).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].get("success"), Some(&json!(false)));
        assert!(logs[0].get_str("error").unwrap().contains("SSRF protection"));
    }

    #[tokio::test]
    async fn test_record_tool_call() {
        let h = harness();
        let steps = vec![step(
            "lookup",
            StepType::CallMcpTool,
            json!({"tool": "get_record", "arguments": {"recordId": "rec_2"}}),
        )];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let output = results[0].output.as_ref().unwrap();
        assert_eq!(output["tool"], "get_record");
        assert_eq!(output["data"]["data"]["name"], "Globex");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_tool_error() {
        let h = harness();
        let steps = vec![step("t", StepType::CallMcpTool, json!({"tool": "send_email"}))];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert_eq!(results[0].error.as_deref(), Some("Validation error: Unknown tool: send_email"));

        let steps = vec![step(
            "t",
            StepType::CallMcpTool,
            json!({"tool": "get_record", "arguments": {"recordId": "rec_x"}}),
        )];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        let error = results[0].error.as_deref().unwrap();
        assert!(error.starts_with("External call failed: Tool 'get_record' failed:"), "{error}");
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn call(&self, _arguments: &Value, _ctx: &ToolContext) -> ActionResult<ToolResult> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult::success(Value::Null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout() {
        let h = harness();
        let mut tools = crate::tools::ToolRegistry::new();
        tools.register(SlowTool);
        let interpreter = crate::interpreter::StepInterpreter {
            tools: std::sync::Arc::new(tools),
            ..h.interpreter.clone()
        };

        let steps = vec![step("t", StepType::CallMcpTool, json!({"tool": "slow"}))];
        let mut results = Vec::new();
        interpreter
            .run_sequence(&steps, h.ctx("rec_1").await, &mut results)
            .await
            .unwrap();
        assert_eq!(
            results[0].error.as_deref(),
            Some("External call failed: Tool 'slow' timed out after 30s")
        );
    }
}
