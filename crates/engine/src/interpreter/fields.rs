//! Field steps: update, clear, copy and transform a value in a record's `data`.

use chrono::Utc;
use serde_json::{json, Value};

use super::command::{
    non_blank, ClearFieldConfig, CopyFieldConfig, TransformFieldConfig, UpdateFieldConfig,
};
use super::{StepEffect, StepInterpreter, StepOutcome};
use crate::audit::{AuditEntry, FieldChange};
use crate::context::StepContext;
use crate::error::{ActionError, ActionResult};
use crate::json;
use crate::model::Step;
use crate::store::{Document, DocumentUpdate, Table};

impl StepInterpreter {
    /// Load the step's target record: explicit `recordId`, else the context record.
    pub(super) async fn target_record(
        &self,
        ctx: &StepContext,
        record_id: &Option<String>,
    ) -> ActionResult<Document> {
        let id = non_blank(record_id)
            .or_else(|| ctx.record_id())
            .ok_or_else(|| ActionError::validation("No record to operate on"))?;
        let doc = self.store.require(Table::Records, id).await?;
        doc.ensure_workspace(Table::Records, &ctx.workspace_id)?;
        Ok(doc)
    }

    /// Write one key of the record's `data` and audit the change.
    ///
    /// Only the changed key is sent, so concurrent writes to other keys of
    /// the same record are kept.
    async fn write_field(
        &self,
        step: &Step,
        ctx: &StepContext,
        record: &Document,
        change: FieldChange,
        value: Option<Value>,
    ) -> ActionResult<()> {
        let path = format!("data.{}", change.field);
        let update = match value {
            Some(value) => DocumentUpdate::new().set(path, value),
            None => DocumentUpdate::new().unset(path),
        }
        .set("updatedAt", Utc::now().timestamp_millis());
        self.store.update(Table::Records, &record.id, update).await?;

        let entry = AuditEntry::new(&ctx.workspace_id, "record", &record.id, "record_updated")
            .with_changes(vec![change]);
        self.audit(step, ctx, entry).await;
        Ok(())
    }

    pub(super) async fn update_field(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: UpdateFieldConfig,
    ) -> StepOutcome {
        let record = self.target_record(ctx, &cfg.record_id).await?;
        let previous = field_value(&record, &cfg.field);

        let change = FieldChange {
            field: cfg.field.clone(),
            before: previous.clone(),
            after: cfg.value.clone(),
        };
        self.write_field(step, ctx, &record, change, Some(cfg.value.clone()))
            .await?;

        Ok(StepEffect::new(
            json!({
                "recordId": record.id,
                "field": cfg.field,
                "value": cfg.value,
                "previousValue": previous,
            }),
            ctx,
        ))
    }

    pub(super) async fn clear_field(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: ClearFieldConfig,
    ) -> StepOutcome {
        let record = self.target_record(ctx, &cfg.record_id).await?;
        let previous = field_value(&record, &cfg.field);

        let change = FieldChange {
            field: cfg.field.clone(),
            before: previous.clone(),
            after: Value::Null,
        };
        self.write_field(step, ctx, &record, change, None).await?;

        Ok(StepEffect::new(
            json!({
                "recordId": record.id,
                "field": cfg.field,
                "previousValue": previous,
            }),
            ctx,
        ))
    }

    pub(super) async fn copy_field(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: CopyFieldConfig,
    ) -> StepOutcome {
        let record = self.target_record(ctx, &cfg.record_id).await?;
        let value = field_value(&record, &cfg.source_field);

        let change = FieldChange {
            field: cfg.target_field.clone(),
            before: field_value(&record, &cfg.target_field),
            after: value.clone(),
        };
        self.write_field(step, ctx, &record, change, Some(value.clone()))
            .await?;

        Ok(StepEffect::new(
            json!({
                "recordId": record.id,
                "sourceField": cfg.source_field,
                "targetField": cfg.target_field,
                "value": value,
            }),
            ctx,
        ))
    }

    pub(super) async fn transform_field(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: TransformFieldConfig,
    ) -> StepOutcome {
        let record = self.target_record(ctx, &cfg.record_id).await?;
        let source = field_value(&record, &cfg.field);
        let value = apply_transform(&cfg.transform, &source, cfg.amount, cfg.decimals)?;

        let target = non_blank(&cfg.target_field)
            .unwrap_or(cfg.field.as_str())
            .to_string();
        let previous = field_value(&record, &target);

        let change = FieldChange {
            field: target.clone(),
            before: previous.clone(),
            after: value.clone(),
        };
        self.write_field(step, ctx, &record, change, Some(value.clone()))
            .await?;

        Ok(StepEffect::new(
            json!({
                "recordId": record.id,
                "field": cfg.field,
                "targetField": target,
                "transform": cfg.transform,
                "previousValue": previous,
                "value": value,
            }),
            ctx,
        ))
    }
}

/// Value of `data[field]`, or null when absent.
fn field_value(record: &Document, field: &str) -> Value {
    record
        .get("data")
        .and_then(|data| data.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

const MAX_DECIMALS: u32 = 15;

/// Apply a named transform to a field value.
///
/// String transforms accept strings, numbers and booleans; numeric
/// transforms accept numbers and numeric strings. `increment` and
/// `decrement` treat a null field as zero.
fn apply_transform(
    transform: &str,
    value: &Value,
    amount: Option<f64>,
    decimals: Option<u32>,
) -> ActionResult<Value> {
    match transform {
        "uppercase" => Ok(Value::String(text(transform, value)?.to_uppercase())),
        "lowercase" => Ok(Value::String(text(transform, value)?.to_lowercase())),
        "trim" => Ok(Value::String(text(transform, value)?.trim().to_string())),
        "round" => {
            let n = numeric(transform, value)?;
            let decimals = decimals.unwrap_or(0);
            if decimals > MAX_DECIMALS {
                return Err(ActionError::validation(format!(
                    "round supports at most {MAX_DECIMALS} decimals, got {decimals}"
                )));
            }
            let factor = 10f64.powi(decimals as i32);
            let scaled = n * factor;
            // Values this large carry no fractional digits.
            if !scaled.is_finite() {
                return finite(transform, n);
            }
            finite(transform, scaled.round() / factor)
        }
        "increment" | "decrement" => {
            let n = if value.is_null() {
                0.0
            } else {
                numeric(transform, value)?
            };
            let step = amount.unwrap_or(1.0);
            let result = if transform == "increment" {
                n + step
            } else {
                n - step
            };
            finite(transform, result)
        }
        other => Err(ActionError::validation(format!("Unsupported transform: {other}"))),
    }
}

fn finite(transform: &str, result: f64) -> ActionResult<Value> {
    if result.is_finite() {
        Ok(json::number(result))
    } else {
        Err(ActionError::validation(format!(
            "{transform} produces a non-finite number"
        )))
    }
}

fn text(transform: &str, value: &Value) -> ActionResult<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(json::stringify(value)),
        _ => Err(ActionError::validation(format!(
            "Cannot apply {transform} to {}",
            describe(value)
        ))),
    }
}

fn numeric(transform: &str, value: &Value) -> ActionResult<f64> {
    json::as_f64(value).ok_or_else(|| {
        ActionError::validation(format!("Cannot apply {transform} to {}", describe(value)))
    })
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "an empty value",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a non-numeric string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
