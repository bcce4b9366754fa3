use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub cache: CacheConfig,
    pub replication: ReplicationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    pub spool_dir: PathBuf,
    #[serde(default)]
    pub start_position: StartPosition,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_record_age_secs")]
    pub max_record_age_secs: u64,
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    #[serde(default = "default_value_attribute")]
    pub value_attribute: String,
}

/// Where a partition worker starts when no checkpoint exists for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Replay the full retained backlog.
    #[default]
    Earliest,
    /// Only future changes.
    Latest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default)]
    pub failure_channel: bool,
    #[serde(default = "default_failure_log_file")]
    pub failure_log_file: PathBuf,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("STREAM_CACHE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.replication.batch_size == 0 {
            return Err(config::ConfigError::Message(
                "replication.batch_size must be at least 1".to_string(),
            ));
        }
        if self.stream.key_attribute.is_empty() {
            return Err(config::ConfigError::Message(
                "stream.key_attribute must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ReplicationConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_record_age_secs() -> u64 {
    86_400 // 24 hours, the source's retention window
}

fn default_key_attribute() -> String {
    "id".to_string()
}

fn default_value_attribute() -> String {
    "name".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    5
}

fn default_batch_size() -> usize {
    1
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_initial_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_secs() -> u64 {
    30
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("checkpoint.json")
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_failure_log_file() -> PathBuf {
    PathBuf::from("failed-events.ndjson")
}
