//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

/// Limits and defaults applied while interpreting actions.
///
/// Environment variables are prefixed with `ACTIONFLOW_`:
/// - `ACTIONFLOW_MAX_LOOP_NESTING`: deepest allowed loop nesting (default: 3)
/// - `ACTIONFLOW_MAX_LOOP_ITERATIONS`: upper bound for a loop's `maxIterations` (default: 1000)
/// - `ACTIONFLOW_WEBHOOK_TIMEOUT_SECS`: hard webhook deadline (default: 30)
/// - `ACTIONFLOW_STORE_TIMEOUT_SECS`: deadline per store operation (default: 10)
/// - `ACTIONFLOW_TOOL_TIMEOUT_SECS`: deadline per tool call (default: 30)
/// - `ACTIONFLOW_WEBHOOK_FAIL_ON_ERROR`: fail webhook steps on non-2xx (default: true)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_loop_nesting")]
    pub max_loop_nesting: usize,

    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub webhook_fail_on_error: bool,
}

fn default_max_loop_nesting() -> usize {
    3
}

fn default_max_loop_iterations() -> u64 {
    1000
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

fn default_store_timeout_secs() -> u64 {
    10
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    /// Load configuration from `ACTIONFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("ACTIONFLOW_").from_env::<EngineConfig>()
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_nesting: default_max_loop_nesting(),
            max_loop_iterations: default_max_loop_iterations(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            webhook_fail_on_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_loop_nesting, 3);
        assert_eq!(config.max_loop_iterations, 1000);
        assert_eq!(config.webhook_timeout(), Duration::from_secs(30));
        assert!(config.webhook_fail_on_error);
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = envy::prefixed("ACTIONFLOW_")
            .from_iter::<_, EngineConfig>(vec![
                ("ACTIONFLOW_MAX_LOOP_NESTING".to_string(), "2".to_string()),
                ("ACTIONFLOW_WEBHOOK_FAIL_ON_ERROR".to_string(), "false".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();
        assert_eq!(config.max_loop_nesting, 2);
        assert!(!config.webhook_fail_on_error);
        assert_eq!(config.store_timeout_secs, 10);
    }

    #[test]
    fn test_empty_environment_matches_default() {
        let config = envy::prefixed("ACTIONFLOW_")
            .from_iter::<_, EngineConfig>(Vec::<(String, String)>::new())
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
