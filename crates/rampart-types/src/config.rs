//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` consumed when nodes
//! are constructed: retry bounds, group and chain policies, worker pool
//! sizing, and logging toggles. Every field has a default, so an empty file
//! is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::args::{DEFAULT_INJECT_KEY, InjectMode};

/// Top-level configuration for the engine.
///
/// Loaded from `~/.rampart/config.toml` by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Retry bounds applied to leaf actions built from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (>= 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    /// Growth factor applied per retry (>= 1.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added to each computed delay, in seconds.
    #[serde(default)]
    pub jitter_bound_secs: f64,
    /// Optional ceiling on any single delay, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<f64>,
    /// Error kinds that are never retried (e.g. `task_failed`, `unknown_task`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_retryable_kinds: Vec<String>,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_bound_secs: 0.0,
            max_delay_secs: None,
            non_retryable_kinds: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Composites
// ---------------------------------------------------------------------------

/// Policy for parallel groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Fail the group call when any member fails.
    #[serde(default)]
    pub fail_fast: bool,
}

/// Policy for sequential chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Forward each step's result to the next step.
    #[serde(default)]
    pub auto_inject: bool,
    /// Return every step's result instead of only the last.
    #[serde(default)]
    pub return_list: bool,
    /// Named key the previous result is injected under.
    #[serde(default = "default_inject_into")]
    pub inject_into: String,
    /// Append the previous result positionally instead of by key.
    #[serde(default)]
    pub inject_positional: bool,
}

fn default_inject_into() -> String {
    DEFAULT_INJECT_KEY.to_string()
}

impl ChainConfig {
    pub fn inject_mode(&self) -> InjectMode {
        if self.inject_positional {
            InjectMode::Positional
        } else {
            InjectMode::Named(self.inject_into.clone())
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            auto_inject: false,
            return_list: false,
            inject_into: default_inject_into(),
            inject_positional: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Workers and logging
// ---------------------------------------------------------------------------

/// Process worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of worker processes alive at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Per-request timeout in seconds (None = wait indefinitely).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Worker executable. Defaults to the current executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// Arguments passed to the worker executable.
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
}

fn default_pool_size() -> usize {
    4
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".to_string()]
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            timeout_secs: None,
            program: None,
            args: default_worker_args(),
        }
    }
}

/// Logging toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Attach tracing hooks to every node built by the CLI.
    #[serde(default)]
    pub debug_hooks: bool,
    /// Export spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.workers.pool_size, 4);
        assert_eq!(config.workers.args, vec!["worker".to_string()]);
        assert_eq!(config.chain.inject_mode(), InjectMode::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let toml_str = r#"
[retry]
max_attempts = 3
jitter_bound_secs = 0.5
non_retryable_kinds = ["task_failed"]

[group]
fail_fast = true

[chain]
auto_inject = true
inject_into = "input"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_secs, 1.0);
        assert_eq!(config.retry.jitter_bound_secs, 0.5);
        assert_eq!(config.retry.non_retryable_kinds, vec!["task_failed"]);
        assert!(config.group.fail_fast);
        assert!(config.chain.auto_inject);
        assert!(!config.chain.return_list);
        assert_eq!(
            config.chain.inject_mode(),
            InjectMode::Named("input".to_string())
        );
        assert!(!config.logging.debug_hooks);
    }

    #[test]
    fn positional_injection_from_config() {
        let config: EngineConfig =
            toml::from_str("[chain]\ninject_positional = true\n").unwrap();
        assert_eq!(config.chain.inject_mode(), InjectMode::Positional);
    }

    #[test]
    fn roundtrips_through_toml() {
        let mut config = EngineConfig::default();
        config.workers.timeout_secs = Some(30);
        config.retry.max_delay_secs = Some(10.0);
        let text = toml::to_string(&config).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
