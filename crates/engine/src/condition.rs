//! Field condition evaluation.
//!
//! Conditions are combined left to right: each condition after the first
//! joins the running result through its own `logic` (`and` by default).
//! There is no operator precedence, so `a or b and c` is `(a or b) and c`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::json;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// Equality check.
    Equals,
    /// Inequality check.
    NotEquals,
    /// Case-insensitive substring.
    Contains,
    /// Negated case-insensitive substring.
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    /// Missing, null, "", [] or {}.
    IsEmpty,
    IsNotEmpty,
    /// Value is in list.
    In,
    /// Value is not in list.
    NotIn,
}

/// How a condition joins the result of the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// A single field test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dotted path into the evaluated data.
    pub field: String,

    pub operator: Operator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            logic: None,
        }
    }

    pub fn or(mut self) -> Self {
        self.logic = Some(Logic::Or);
        self
    }
}

/// Evaluates condition lists against JSON data.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Fold all conditions into one boolean. An empty list is `true`.
    pub fn evaluate(&self, conditions: &[Condition], data: &Value) -> bool {
        let mut iter = conditions.iter();
        let Some(first) = iter.next() else {
            return true;
        };

        let mut result = self.evaluate_condition(first, data);
        for condition in iter {
            let current = self.evaluate_condition(condition, data);
            result = match condition.logic.unwrap_or_default() {
                Logic::And => result && current,
                Logic::Or => result || current,
            };
        }
        result
    }

    /// Evaluate a single condition.
    pub fn evaluate_condition(&self, condition: &Condition, data: &Value) -> bool {
        let left = json::lookup(data, &condition.field);
        let right = condition.value.as_ref();

        match condition.operator {
            Operator::Equals => equals(left, right),
            Operator::NotEquals => !equals(left, right),
            Operator::Contains => contains(left, right),
            Operator::NotContains => !contains(left, right),
            Operator::GreaterThan => compare(left, right, |o| o.is_gt()),
            Operator::LessThan => compare(left, right, |o| o.is_lt()),
            Operator::GreaterThanOrEquals => compare(left, right, |o| o.is_ge()),
            Operator::LessThanOrEquals => compare(left, right, |o| o.is_le()),
            Operator::IsEmpty => json::is_empty(left),
            Operator::IsNotEmpty => !json::is_empty(left),
            Operator::In => match right {
                Some(Value::Array(options)) => member_of(left, options),
                _ => {
                    warn!(field = %condition.field, "'in' condition value is not an array");
                    false
                }
            },
            Operator::NotIn => match right {
                Some(Value::Array(options)) => !member_of(left, options),
                _ => {
                    warn!(field = %condition.field, "'notIn' condition value is not an array");
                    false
                }
            },
        }
    }
}

fn equals(left: Option<&Value>, right: Option<&Value>) -> bool {
    let left = left.unwrap_or(&Value::Null);
    let right = right.unwrap_or(&Value::Null);
    json::values_equal(left, right)
}

/// A missing or null field, or a missing or null value, never matches.
fn contains(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) if !left.is_null() && !right.is_null() => json::stringify(left)
            .to_lowercase()
            .contains(&json::stringify(right).to_lowercase()),
        _ => false,
    }
}

/// Numbers (and numeric strings) compare numerically; two plain strings
/// compare lexicographically. Anything else never matches.
fn compare(
    left: Option<&Value>,
    right: Option<&Value>,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let (Some(left), Some(right)) = (left, right) else {
        return false;
    };

    if let (Some(a), Some(b)) = (json::as_f64(left), json::as_f64(right)) {
        return a.partial_cmp(&b).is_some_and(accept);
    }

    match (left, right) {
        (Value::String(a), Value::String(b)) => accept(a.as_str().cmp(b.as_str())),
        _ => false,
    }
}

fn member_of(left: Option<&Value>, options: &[Value]) -> bool {
    let left = left.unwrap_or(&Value::Null);
    options.iter().any(|option| json::values_equal(left, option))
}
