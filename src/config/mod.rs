/// Configuration management for the NodeFlow engine
///
/// Handles server binding, history database location, engine run policy, and the
/// memory bounds of the run state store.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Run policy applied by the execution engine
    pub engine: EngineConfig,
    /// Memory bounds for logs and in-memory history
    pub store: StoreConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for persisted run history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding history.db (default: "data")
    pub data_dir: String,
    /// Persisted runs kept per graph; older records are pruned
    pub history_retention: usize,
}

/// What happens to the rest of a run once a node exhausts its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop dispatching every new node; in-flight nodes are allowed to finish
    #[default]
    Cascade,
    /// Skip only the failed node's descendants; independent branches run to completion
    IsolateBranch,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Cascade => f.write_str("cascade"),
            FailurePolicy::IsolateBranch => f.write_str("isolate-branch"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cascade" | "cascading" => Ok(FailurePolicy::Cascade),
            "isolate-branch" | "isolate" | "branch-isolated" => Ok(FailurePolicy::IsolateBranch),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

/// Execution engine run policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cascading vs. branch-isolated failure handling
    pub failure_policy: FailurePolicy,
    /// Re-invocations allowed after a failed attempt, unless a node overrides it
    pub max_retries: u32,
    /// Delay between a failed attempt and the next one
    pub retry_backoff_ms: u64,
    /// Upper bound for a single handler invocation, unless a node overrides it
    pub node_timeout_ms: Option<u64>,
    /// Maximum number of nodes executing at the same time within one run
    pub max_concurrency: usize,
    /// Reject unknown port names, incompatible port types, and unfed required inputs
    pub strict_ports: bool,
}

impl EngineConfig {
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Cascade,
            max_retries: 0,
            retry_backoff_ms: 0,
            node_timeout_ms: None,
            max_concurrency: 4,
            strict_ports: false,
        }
    }
}

/// Bounds for the run state store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Most recent log entries kept for the current run
    pub log_capacity: usize,
    /// Most recent finished runs kept in memory
    pub history_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            log_capacity: 100,
            history_capacity: 100,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let engine_defaults = EngineConfig::default();
        let store_defaults = StoreConfig::default();

        Self {
            server: ServerConfig {
                host: std::env::var("NODEFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("NODEFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("NODEFLOW_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                history_retention: env_or("NODEFLOW_HISTORY_RETENTION", 100),
            },
            engine: EngineConfig {
                failure_policy: env_or("NODEFLOW_FAILURE_POLICY", engine_defaults.failure_policy),
                max_retries: env_or("NODEFLOW_MAX_RETRIES", engine_defaults.max_retries),
                retry_backoff_ms: env_or("NODEFLOW_RETRY_BACKOFF_MS", engine_defaults.retry_backoff_ms),
                node_timeout_ms: std::env::var("NODEFLOW_NODE_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                max_concurrency: env_or("NODEFLOW_MAX_CONCURRENCY", engine_defaults.max_concurrency).max(1),
                strict_ports: env_or("NODEFLOW_STRICT_PORTS", engine_defaults.strict_ports),
            },
            store: StoreConfig {
                log_capacity: env_or("NODEFLOW_LOG_CAPACITY", store_defaults.log_capacity),
                history_capacity: env_or("NODEFLOW_HISTORY_CAPACITY", store_defaults.history_capacity),
            },
        }
    }
}

/// Parse an env var, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️ Ignoring invalid value for {}: {}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
