//! Outbound webhook delivery.

mod auth;

pub use auth::{AuthCredentials, EnvSecrets, SecretSource, WebhookAuth};

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ActionError, ActionResult};
use crate::json;
use crate::security::sanitize::{sanitize_headers, sanitize_sensitive_data};
use crate::security::UrlValidator;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum HttpMethod {
    GET,
    #[default]
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::DELETE => Method::DELETE,
        }
    }
}

/// Configuration of a `sendWebhook` step (after interpolation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Header values may be any JSON scalar; they are sent as strings.
    #[serde(default)]
    pub headers: IndexMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,

    /// Per-call deadline, capped by the engine's webhook timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Treat non-2xx responses as step failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_on_error: Option<bool>,
}

/// Successful (or tolerated non-2xx) response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub status_code: u16,
    pub ok: bool,
    pub body: Value,
    pub duration_ms: u64,
}

/// Sanitized record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub url: String,
    pub method: HttpMethod,
    pub request_headers: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A delivery attempt: what to log, and what the step sees.
#[derive(Debug)]
pub struct Delivery {
    pub log: WebhookLog,
    pub outcome: ActionResult<WebhookResponse>,
}

/// Sends webhooks after URL validation, with env-sourced auth and a hard deadline.
pub struct WebhookClient {
    client: reqwest::Client,
    validator: Arc<dyn UrlValidator>,
    secrets: Arc<dyn SecretSource>,
    max_timeout: Duration,
    fail_on_error: bool,
}

impl WebhookClient {
    pub fn new(
        validator: Arc<dyn UrlValidator>,
        secrets: Arc<dyn SecretSource>,
        max_timeout: Duration,
        fail_on_error: bool,
    ) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            client,
            validator,
            secrets,
            max_timeout,
            fail_on_error,
        }
    }

    /// Deliver a webhook. Every attempt, blocked or not, yields a log entry.
    pub async fn send(&self, config: &WebhookConfig) -> Delivery {
        let start = Instant::now();
        let headers: IndexMap<String, String> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), json::stringify(v)))
            .collect();

        let mut log = WebhookLog {
            url: config.url.clone(),
            method: config.method,
            request_headers: sanitize_headers(&headers),
            request_body: config.body.as_ref().map(sanitize_sensitive_data),
            status_code: None,
            duration_ms: 0,
            success: false,
            error: None,
        };

        let outcome = self.deliver(config, &headers, &mut log).await;

        log.duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(response) => log.success = response.ok,
            Err(e) => log.error = Some(e.to_string()),
        }

        Delivery { log, outcome }
    }

    async fn deliver(
        &self,
        config: &WebhookConfig,
        headers: &IndexMap<String, String>,
        log: &mut WebhookLog,
    ) -> ActionResult<WebhookResponse> {
        let validation = self.validator.validate(&config.url);
        if !validation.valid {
            let reason = validation
                .error
                .unwrap_or_else(|| "SSRF protection: URL rejected".to_string());
            warn!(url = %config.url, reason = %reason, "Webhook URL blocked");
            return Err(ActionError::validation(reason));
        }

        let credentials = match &config.auth {
            Some(auth) => auth.resolve(self.secrets.as_ref())?,
            None => AuthCredentials::None,
        };
        if let Some(header) = credentials.header_name() {
            log.request_headers
                .insert(header.to_string(), Value::String("[REDACTED]".to_string()));
        }

        let mut request = self.client.request(config.method.into(), &config.url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &config.body {
            request = match body {
                Value::String(s) => request.body(s.clone()),
                _ => request.json(body),
            };
        }
        request = credentials.apply_to_request(request);

        let deadline = config
            .timeout_ms
            .map(Duration::from_millis)
            .map_or(self.max_timeout, |t| t.min(self.max_timeout));

        debug!(url = %config.url, method = ?config.method, "Sending webhook");
        let started = Instant::now();

        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status_code, text) = tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| {
                ActionError::external(format!(
                    "Webhook timed out after {}ms",
                    deadline.as_millis()
                ))
            })??;

        log.status_code = Some(status_code);
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        let ok = (200..300).contains(&status_code);

        if !ok && config.fail_on_error.unwrap_or(self.fail_on_error) {
            return Err(ActionError::external(format!(
                "Webhook returned HTTP {status_code}"
            )));
        }

        Ok(WebhookResponse {
            status_code,
            ok,
            body,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
