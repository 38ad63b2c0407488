use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Default storage quota used by the usage indicator (50 MiB).
pub const DEFAULT_QUOTA_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct TimelapseConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

impl ServiceConfig {
    /// Socket path with `~` and environment variables expanded.
    pub fn expanded_socket_path(&self) -> String {
        shellexpand::full(&self.socket_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| self.socket_path.clone())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
}

fn default_quota_bytes() -> u64 {
    DEFAULT_QUOTA_BYTES
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

/// Thresholds used by the diff engine and warning detection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiffConfig {
    pub latency_spike_multiplier: f64,
    pub latency_spike_slack_ms: f64,
    pub max_key_changes: usize,
    pub clip_chars: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            latency_spike_multiplier: 1.5,
            latency_spike_slack_ms: 50.0,
            max_key_changes: 8,
            clip_chars: 400,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub sample_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { sample_size: 20 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8767,
        }
    }
}

impl TimelapseConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
