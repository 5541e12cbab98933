//! Webhook authentication.
//!
//! Credentials are never written into action definitions. A webhook names
//! the environment variables that hold them and they are looked up at call
//! time through a [`SecretSource`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ActionError, ActionResult};

/// Lookup of secrets by name.
pub trait SecretSource: Send + Sync {
    fn secret(&self, name: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Authentication block of a `sendWebhook` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WebhookAuth {
    None,
    Bearer {
        #[serde(rename = "tokenEnv")]
        token_env: String,
    },
    Basic {
        #[serde(rename = "usernameEnv")]
        username_env: String,
        #[serde(rename = "passwordEnv")]
        password_env: String,
    },
    ApiKey {
        #[serde(rename = "headerName", default = "default_api_key_header")]
        header_name: String,
        #[serde(rename = "valueEnv")]
        value_env: String,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Resolved credentials.
#[derive(Clone)]
pub enum AuthCredentials {
    /// Bearer token.
    Bearer(String),
    /// Basic auth (username, password).
    Basic(String, String),
    /// API key (header name, value).
    ApiKey(String, String),
    None,
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Self::Basic(user, _) => write!(f, "Basic({user}, [REDACTED])"),
            Self::ApiKey(header, _) => write!(f, "ApiKey({header}, [REDACTED])"),
            Self::None => f.write_str("None"),
        }
    }
}

impl AuthCredentials {
    /// Apply credentials to a reqwest request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::Basic(username, password) => request.basic_auth(username, Some(password)),
            Self::ApiKey(header, value) => request.header(header.as_str(), value.as_str()),
            Self::None => request,
        }
    }

    /// Header the credentials are sent in, for the request log.
    pub fn header_name(&self) -> Option<&str> {
        match self {
            Self::Bearer(_) | Self::Basic(_, _) => Some("Authorization"),
            Self::ApiKey(header, _) => Some(header.as_str()),
            Self::None => None,
        }
    }
}

impl WebhookAuth {
    pub fn resolve(&self, secrets: &dyn SecretSource) -> ActionResult<AuthCredentials> {
        match self {
            Self::None => Ok(AuthCredentials::None),
            Self::Bearer { token_env } => Ok(AuthCredentials::Bearer(lookup(secrets, token_env)?)),
            Self::Basic {
                username_env,
                password_env,
            } => Ok(AuthCredentials::Basic(
                lookup(secrets, username_env)?,
                lookup(secrets, password_env)?,
            )),
            Self::ApiKey {
                header_name,
                value_env,
            } => Ok(AuthCredentials::ApiKey(
                header_name.clone(),
                lookup(secrets, value_env)?,
            )),
        }
    }
}

fn lookup(secrets: &dyn SecretSource, name: &str) -> ActionResult<String> {
    secrets.secret(name).ok_or_else(|| {
        ActionError::validation(format!("Environment variable '{name}' is not set"))
    })
}
