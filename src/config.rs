//! Runtime configuration.
//!
//! One [`RuntimeConfig`] is constructed at startup and passed explicitly
//! to every component; there is no ambient or global lookup. Loaded from
//! a TOML file, with `.env` values made available first via dotenvy.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// One tool-server endpoint: either a subprocess launch spec or a
/// network base address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Launch a child process and speak newline-delimited envelopes
    /// over its standard streams.
    Stdio {
        /// Endpoint name, used to route tool calls.
        name: String,
        /// Command to run.
        command: String,
        /// Command arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment variables for the child.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// POST envelopes to `{url}/rpc`.
    Http {
        /// Endpoint name, used to route tool calls.
        name: String,
        /// Base address of the tool server.
        url: String,
        /// Static headers sent with every request.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl EndpointConfig {
    /// The endpoint's routing name.
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. } | Self::Http { name, .. } => name,
        }
    }
}

/// Security validator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Additional deny patterns (regex), evaluated after the built-in
    /// rules in the order given.
    #[serde(default)]
    pub extra_deny_patterns: Vec<String>,
}

/// Approval gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Operation names that always require human approval.
    #[serde(default = "ApprovalConfig::default_high_risk")]
    pub high_risk_operations: HashSet<String>,
    /// Service names that escalate any operation touching them.
    #[serde(default = "ApprovalConfig::default_critical_services")]
    pub critical_services: HashSet<String>,
    /// Optional approval wait timeout in seconds. `None` waits
    /// indefinitely; a configured timeout auto-denies on expiry.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ApprovalConfig {
    fn default_high_risk() -> HashSet<String> {
        [
            "delete_file",
            "write_file",
            "start_service",
            "stop_service",
            "restart_service",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn default_critical_services() -> HashSet<String> {
        [
            "ssh",
            "sshd",
            "systemd",
            "systemd-journald",
            "dbus",
            "NetworkManager",
            "networking",
            "firewalld",
            "ufw",
            "docker",
            "containerd",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    /// Approval wait timeout as a duration, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            high_risk_operations: Self::default_high_risk(),
            critical_services: Self::default_critical_services(),
            timeout_secs: None,
        }
    }
}

/// Error recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Retry budget per turn.
    #[serde(default = "RecoveryConfig::default_max_retries")]
    pub max_retries: u32,
    /// Base backoff between transport retries, in milliseconds.
    /// Doubles on each retry.
    #[serde(default = "RecoveryConfig::default_backoff_ms")]
    pub backoff_ms: u64,
}

impl RecoveryConfig {
    fn default_max_retries() -> u32 {
        3
    }

    fn default_backoff_ms() -> u64 {
        500
    }

    /// Base backoff as a duration.
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            backoff_ms: Self::default_backoff_ms(),
        }
    }
}

/// Checkpoint store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding per-thread checkpoints. Defaults to
    /// `<data dir>/steward/checkpoints`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl CheckpointConfig {
    /// Resolve the checkpoint directory.
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("steward")
                .join("checkpoints")
        })
    }
}

/// Loop and dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum reason/act cycles per turn before forcing a response.
    #[serde(default = "LimitsConfig::default_max_iterations")]
    pub max_iterations: u32,
    /// Bound on concurrent tool dispatch within one reasoning step.
    #[serde(default = "LimitsConfig::default_max_parallel_tools")]
    pub max_parallel_tools: usize,
    /// Per-call transport timeout in seconds.
    #[serde(default = "LimitsConfig::default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl LimitsConfig {
    fn default_max_iterations() -> u32 {
        10
    }

    fn default_max_parallel_tools() -> usize {
        4
    }

    fn default_tool_timeout_secs() -> u64 {
        30
    }

    /// Per-call transport timeout as a duration.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::default_max_iterations(),
            max_parallel_tools: Self::default_max_parallel_tools(),
            tool_timeout_secs: Self::default_tool_timeout_secs(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tool-server endpoints.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Loads `.env` first so values referenced by the caller's
    /// environment are present; a missing `.env` is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
