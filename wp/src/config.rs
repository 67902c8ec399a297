//! Waypoint configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fleet::{CallPolicy, WorkerSpec};

/// Main Waypoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Worker fleet configuration
    pub fleet: FleetConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Worker names and ports must be unique across the fleet.
    pub fn validate(&self) -> Result<()> {
        self.fleet.validate()
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .waypoint.yml
        let local_config = PathBuf::from(".waypoint.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/waypoint/waypoint.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Follows the same fallback chain as [`Config::load`] but swallows every
    /// error, since nothing can be logged yet.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => [Some(PathBuf::from(".waypoint.yml")), Self::user_config_path()]
                .into_iter()
                .flatten()
                .collect(),
        };
        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("waypoint").join("waypoint.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Worker fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Host workers listen on
    pub host: String,

    /// Workers to launch, in order
    pub workers: Vec<WorkerSpec>,

    /// Health probe timeout in milliseconds
    #[serde(rename = "health-timeout-ms")]
    pub health_timeout_ms: u64,

    /// Default tool call timeout in milliseconds
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,

    /// Maximum readiness polling rounds
    #[serde(rename = "readiness-rounds")]
    pub readiness_rounds: u32,

    /// Delay between readiness rounds in milliseconds
    #[serde(rename = "readiness-delay-ms")]
    pub readiness_delay_ms: u64,

    /// How long a spawned worker gets before the early-exit check
    #[serde(rename = "startup-grace-ms")]
    pub startup_grace_ms: u64,

    /// Bound on collecting a crashed worker's output
    #[serde(rename = "output-capture-timeout-ms")]
    pub output_capture_timeout_ms: u64,

    /// Wait after SIGTERM before SIGKILL
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,

    /// lenient: failed or refused calls return {}; strict: they return errors
    #[serde(rename = "call-policy")]
    pub call_policy: CallPolicy,

    /// Demote a ready worker after this many consecutive call failures
    ///
    /// Unset keeps ready sticky.
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: Option<u32>,

    /// Only adopt workers already running; never spawn
    #[serde(rename = "attach-only")]
    pub attach_only: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            workers: default_workers(),
            health_timeout_ms: 3000,
            call_timeout_ms: 30_000,
            readiness_rounds: 30,
            readiness_delay_ms: 1000,
            startup_grace_ms: 2000,
            output_capture_timeout_ms: 3000,
            shutdown_timeout_ms: 5000,
            call_policy: CallPolicy::default(),
            failure_threshold: None,
            attach_only: false,
        }
    }
}

impl FleetConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn readiness_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_delay_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn output_capture_timeout(&self) -> Duration {
        Duration::from_millis(self.output_capture_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Check worker names and ports are unique and the counts are usable
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for worker in &self.workers {
            if !names.insert(worker.name.as_str()) {
                return Err(eyre::eyre!("Duplicate worker name: {}", worker.name));
            }
            if !ports.insert(worker.port) {
                return Err(eyre::eyre!(
                    "Duplicate worker port {} (worker {})",
                    worker.port,
                    worker.name
                ));
            }
        }
        if self.failure_threshold == Some(0) {
            return Err(eyre::eyre!("failure-threshold must be at least 1"));
        }
        if self.readiness_rounds == 0 {
            return Err(eyre::eyre!("readiness-rounds must be at least 1"));
        }
        Ok(())
    }
}

/// The six travel data workers, run with node from ../mcp-servers
fn default_workers() -> Vec<WorkerSpec> {
    [
        ("flight-server", 3001),
        ("hotel-server", 3002),
        ("activity-server", 3003),
        ("restaurant-server", 3004),
        ("clustering-server", 3005),
        ("search-server", 3006),
    ]
    .into_iter()
    .map(|(name, port)| {
        WorkerSpec::new(name, format!("{}.js", name), port)
            .with_interpreter("node", &["-r", "dotenv/config"])
            .with_working_dir("../mcp-servers")
    })
    .collect()
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "openai" supported: any OpenAI-compatible endpoint)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            max_tokens: 1024,
            timeout_ms: 60_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).map_err(|_| {
            eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.api_key_env
            )
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
