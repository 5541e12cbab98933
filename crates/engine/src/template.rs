//! `{{path}}` interpolation against a [`StepContext`].
//!
//! Supported roots:
//!
//! - `record`, `record.<field>`, `record._id`, `record._creationTime`
//! - `previous[.<path>]` - output of the previous step
//! - `variables.<stepId>[.<path>]` - output of any earlier step
//! - `loopItem[.<path>]`, `loopIndex`
//!
//! A string that is exactly one placeholder resolves to the typed value.
//! Placeholders embedded in text are stringified; undefined paths become
//! the empty string. Unknown roots are undefined, never an error.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::context::StepContext;
use crate::json;
use crate::store::{CREATION_TIME_FIELD, ID_FIELD};

static WHOLE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*([^{}]+?)\s*\}\}$").expect("valid placeholder regex"));

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder regex"));

/// Check if a string contains placeholder syntax.
pub fn is_template(s: &str) -> bool {
    s.contains("{{")
}

/// Resolve every placeholder inside `value`, walking arrays and objects.
pub fn resolve(value: &Value, ctx: &StepContext) -> Value {
    match value {
        Value::String(s) if is_template(s) => resolve_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect::<Map<String, Value>>(),
        ),
        _ => value.clone(),
    }
}

fn resolve_str(s: &str, ctx: &StepContext) -> Value {
    if let Some(caps) = WHOLE_PLACEHOLDER.captures(s) {
        return resolve_path(&caps[1], ctx).unwrap_or(Value::Null);
    }

    let rendered = PLACEHOLDER.replace_all(s, |caps: &Captures<'_>| {
        resolve_path(&caps[1], ctx)
            .map(|v| json::stringify(&v))
            .unwrap_or_default()
    });
    Value::String(rendered.into_owned())
}

/// Resolve a single dotted path. `None` means undefined.
pub fn resolve_path(path: &str, ctx: &StepContext) -> Option<Value> {
    let path = path.trim();
    let (root, rest) = match path.split_once('.') {
        Some((root, rest)) => (root, rest),
        None => (path, ""),
    };

    match root {
        "record" => {
            let record = ctx.record.as_ref()?;
            let (field, nested) = match rest.split_once('.') {
                Some((field, nested)) => (field, nested),
                None => (rest, ""),
            };
            match field {
                "" => Some(record.to_value()),
                ID_FIELD => Some(Value::String(record.id.clone())),
                CREATION_TIME_FIELD => Some(Value::from(record.creation_time)),
                _ => json::lookup(record.data.get(field)?, nested).cloned(),
            }
        }
        "previous" => json::lookup(ctx.previous_step_output.as_ref()?, rest).cloned(),
        "variables" => {
            let (step_id, nested) = match rest.split_once('.') {
                Some((step_id, nested)) => (step_id, nested),
                None => (rest, ""),
            };
            if step_id.is_empty() {
                return None;
            }
            json::lookup(ctx.variables.get(step_id)?, nested).cloned()
        }
        "loopItem" => json::lookup(ctx.loop_item.as_ref()?, rest).cloned(),
        "loopIndex" if rest.is_empty() => ctx.loop_index.map(Value::from),
        _ => None,
    }
}
