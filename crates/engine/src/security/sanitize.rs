//! Redaction of credentials before webhook requests are logged or stored.

use serde_json::{Map, Value};

const REDACTED: &str = "[REDACTED]";

const MAX_DEPTH: usize = 20;

/// Key fragments that mark a value as secret (lowercase, `-` normalised to `_`).
static SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "bearer",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
    "client_secret",
    "session",
    "signature",
];

/// Headers that always carry credentials.
static SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase().replace('-', "_");
    SENSITIVE_KEYS.iter().any(|sensitive| key.contains(sensitive))
}

fn is_sensitive_value(value: &str) -> bool {
    let lower = value.to_lowercase();
    if lower.starts_with("bearer ") || lower.starts_with("basic ") {
        return true;
    }

    // JWT (header.payload.signature)
    if value.starts_with("eyJ") && value.matches('.').count() == 2 && value.len() > 50 {
        return true;
    }

    value.contains("-----BEGIN") && value.contains("PRIVATE KEY-----")
}

/// Copy of `value` with secret-looking keys and values replaced by `[REDACTED]`.
pub fn sanitize_sensitive_data(value: &Value) -> Value {
    sanitize_recursive(value, 0)
}

fn sanitize_recursive(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String(REDACTED.to_string());
    }

    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let sanitized = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_recursive(val, depth + 1)
                    };
                    (key.clone(), sanitized)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_recursive(item, depth + 1))
                .collect(),
        ),
        Value::String(s) if is_sensitive_value(s) => Value::String(REDACTED.to_string()),
        _ => value.clone(),
    }
}

/// Redact credential-bearing headers.
pub fn sanitize_headers<'a, I>(headers: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    headers
        .into_iter()
        .map(|(name, value)| {
            let lower = name.to_lowercase();
            let value = if SENSITIVE_HEADERS.contains(&lower.as_str())
                || is_sensitive_key(name)
                || is_sensitive_value(value)
            {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), Value::String(value))
        })
        .collect()
}
