use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::HoneytrailError;

/// Main configuration for honeytrail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Log source to follow
    pub tail: TailConfig,

    /// Line classification rules
    pub classifier: ClassifierConfig,

    /// Delivery to the collector
    pub forwarder: ForwarderConfig,

    /// Collector HTTP service and storage
    pub collector: CollectorConfig,

    /// Response generator client
    pub responder: ResponderConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, HoneytrailError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HoneytrailError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, HoneytrailError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HoneytrailError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, HoneytrailError> {
        toml::to_string_pretty(self)
            .map_err(|e| HoneytrailError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), HoneytrailError> {
        if self.general.queue_capacity == 0 {
            return Err(HoneytrailError::Config(
                "general.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.forwarder.workers == 0 {
            return Err(HoneytrailError::Config(
                "forwarder.workers must be at least 1".to_string(),
            ));
        }
        if self.forwarder.max_attempts == 0 {
            return Err(HoneytrailError::Config(
                "forwarder.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.collector.max_limit == 0 {
            return Err(HoneytrailError::Config(
                "collector.max_limit must be at least 1".to_string(),
            ));
        }
        if let SourceConfig::Command { program, .. } = &self.tail.source {
            if program.trim().is_empty() {
                return Err(HoneytrailError::Config(
                    "tail.source.program must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Instance name for identification
    pub instance_name: String,

    /// Internal log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Pending events held between the classifier and the forwarder workers
    pub queue_capacity: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: "honeytrail".to_string(),
            log_level: "info".to_string(),
            queue_capacity: 1_000,
        }
    }
}

/// Tailer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Upper bound on the wait between reads when the source is idle
    pub poll_interval_ms: u64,

    /// Consecutive failed (re)attach attempts before the source is declared gone
    pub reattach_attempts: u32,

    /// Delay before reattaching to a source that went away
    pub reattach_delay_ms: u64,

    /// Source of raw lines
    pub source: SourceConfig,
}

impl TailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reattach_delay(&self) -> Duration {
        Duration::from_millis(self.reattach_delay_ms)
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            reattach_attempts: 10,
            reattach_delay_ms: 1_000,
            source: SourceConfig::default(),
        }
    }
}

/// Log source definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Follow the combined output of a long-running process
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Follow an append-only file
    File {
        path: PathBuf,
        /// Read existing content before following
        #[serde(default)]
        from_start: bool,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Command {
            program: "docker".to_string(),
            args: ["logs", "-f", "--tail", "0", "cowrie"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Protocol context stamped on every event
    pub dest_service: String,

    /// Case-insensitive phrases that mark a login attempt
    pub login_phrases: Vec<String>,

    /// Extra command markers, tried after the built-in ones
    pub custom_patterns: Vec<CustomPattern>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            dest_service: "ssh".to_string(),
            login_phrases: vec![
                "login attempt".to_string(),
                "unauthorized login".to_string(),
                "failed login".to_string(),
                "login failed".to_string(),
            ],
            custom_patterns: Vec::new(),
        }
    }
}

/// Custom pattern definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPattern {
    pub name: String,
    pub pattern: String,
}

/// What to do with a new event when the delivery queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending event to make room
    #[default]
    DropOldest,
    /// Discard the incoming event
    DropNewest,
}

/// Forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Collector ingest endpoint
    pub endpoint: String,

    /// Number of delivery workers
    pub workers: usize,

    /// Bound on a single send attempt
    pub timeout_ms: u64,

    /// Total send attempts per event, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Ceiling for the retry delay
    pub max_backoff_ms: u64,

    /// Growth factor applied to the delay after each retry
    pub backoff_multiplier: f64,

    /// Queue overflow behavior
    pub overflow: OverflowPolicy,
}

impl ForwarderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/api/events".to_string(),
            workers: 2,
            timeout_ms: 5_000,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub bind_address: String,
    pub port: u16,
    /// SQLite database path
    pub database: PathBuf,
    /// Rows returned when the request names no limit
    pub default_limit: usize,
    /// Hard cap on rows per list request
    pub max_limit: usize,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            database: PathBuf::from("events.db"),
            default_limit: 100,
            max_limit: 1_000,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Response generator client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Total requests per command, including the first
    pub max_attempts: u32,
    /// Fixed delay between requests
    pub retry_backoff_ms: u64,
    /// Fixed replies keyed by the first word of a command
    pub canned: BTreeMap<String, String>,
}

impl ResponderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        let canned = [
            ("ls", "bin  etc  home  usr"),
            ("whoami", "root"),
            ("pwd", "/root"),
            ("uname", "Linux honeypot 5.4.0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            endpoint: "http://127.0.0.1:8000/api/respond".to_string(),
            timeout_ms: 3_000,
            max_attempts: 2,
            retry_backoff_ms: 200,
            canned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.instance_name, "honeytrail");
        assert_eq!(config.general.queue_capacity, 1_000);
        assert_eq!(config.tail.poll_interval_ms, 100);
        assert_eq!(config.classifier.dest_service, "ssh");
        assert_eq!(config.forwarder.max_attempts, 3);
        assert_eq!(config.forwarder.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.collector.default_limit, 100);
        assert!(matches!(config.tail.source, SourceConfig::Command { .. }));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[general]
instance_name = "sensor-1"
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.general.instance_name, "sensor-1");
        // Defaults should be applied
        assert_eq!(config.forwarder.workers, 2);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[general]
log_level = "debug"
queue_capacity = 50

[tail]
poll_interval_ms = 250

[tail.source]
kind = "file"
path = "/var/log/cowrie/cowrie.log"
from_start = true

[classifier]
dest_service = "telnet"
custom_patterns = [
    { name = "exec", pattern = "exec: (.+)$" }
]

[forwarder]
endpoint = "http://collector:8000/api/events"
max_attempts = 5
overflow = "drop_newest"

[collector]
port = 9000
max_limit = 200
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.general.queue_capacity, 50);
        assert_eq!(config.tail.poll_interval_ms, 250);
        assert_eq!(
            config.tail.source,
            SourceConfig::File {
                path: PathBuf::from("/var/log/cowrie/cowrie.log"),
                from_start: true,
            }
        );
        assert_eq!(config.classifier.dest_service, "telnet");
        assert_eq!(config.classifier.custom_patterns.len(), 1);
        assert_eq!(config.forwarder.max_attempts, 5);
        assert_eq!(config.forwarder.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.collector.port, 9000);
        assert_eq!(config.collector.max_limit, 200);
    }

    #[test]
    fn test_parse_command_source() {
        let toml = r#"
[tail.source]
kind = "command"
program = "journalctl"
args = ["-f", "-u", "cowrie"]
"#;
        let config = Config::from_str(toml).unwrap();
        match config.tail.source {
            SourceConfig::Command { program, args } => {
                assert_eq!(program, "journalctl");
                assert_eq!(args, vec!["-f", "-u", "cowrie"]);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_workers() {
        let toml = r#"
[forwarder]
workers = 0
"#;
        assert!(matches!(
            Config::from_str(toml),
            Err(HoneytrailError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let toml = r#"
[forwarder]
max_attempts = 0
"#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_serialize_round_trips() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("kind = \"command\""));

        let parsed = Config::from_str(&toml).unwrap();
        assert_eq!(parsed.tail.source, config.tail.source);
        assert_eq!(parsed.responder.canned.len(), 4);
    }
}
