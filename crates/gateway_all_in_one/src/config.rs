use common::domain::MAX_CAPACITY;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where device records and credentials live
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// Where accepted events are relayed to
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    Log,
    Nats,
}

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    // HTTP ingress
    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Comma-separated allowed origins; empty allows all
    #[serde(default)]
    pub cors_allowed_origins: String,

    // Storage
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,

    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // Relay
    #[serde(default = "default_relay_backend")]
    pub relay_backend: RelayBackend,

    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream; events go to `{stream}.{event type}`
    #[serde(default = "default_nats_events_stream")]
    pub nats_events_stream: String,

    #[serde(default = "default_relay_queue_capacity")]
    pub relay_queue_capacity: usize,

    #[serde(default = "default_relay_max_attempts")]
    pub relay_max_attempts: u32,

    #[serde(default = "default_relay_initial_backoff_ms")]
    pub relay_initial_backoff_ms: u64,

    #[serde(default = "default_relay_max_backoff_ms")]
    pub relay_max_backoff_ms: u64,

    #[serde(default = "default_relay_timeout_ms")]
    pub relay_timeout_ms: u64,

    // Registry
    #[serde(default = "default_default_capacity")]
    pub default_capacity: u32,

    #[serde(default = "default_default_device_name")]
    pub default_device_name: String,

    /// Seed credentials as `id:token` pairs, comma-separated
    #[serde(default = "default_device_credentials")]
    pub device_credentials: String,

    #[serde(default = "default_registry_timeout_ms")]
    pub registry_timeout_ms: u64,

    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    // Lifecycle
    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

// Secrets stay out of debug output
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("http_host", &self.http_host)
            .field("http_port", &self.http_port)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("storage_backend", &self.storage_backend)
            .field("postgres_host", &self.postgres_host)
            .field("postgres_port", &self.postgres_port)
            .field("postgres_database", &self.postgres_database)
            .field("relay_backend", &self.relay_backend)
            .field("nats_url", &self.nats_url)
            .field("nats_events_stream", &self.nats_events_stream)
            .field("default_capacity", &self.default_capacity)
            .field("registry_timeout_ms", &self.registry_timeout_ms)
            .finish_non_exhaustive()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5000
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Memory
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}
fn default_postgres_port() -> u16 {
    5432
}
fn default_postgres_database() -> String {
    "dispensers".to_string()
}
fn default_postgres_username() -> String {
    "gateway".to_string()
}
fn default_postgres_password() -> String {
    "gateway".to_string()
}
fn default_postgres_max_pool_size() -> usize {
    5
}

// Relay defaults
fn default_relay_backend() -> RelayBackend {
    RelayBackend::Log
}
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}
fn default_nats_events_stream() -> String {
    "dispenser_events".to_string()
}
fn default_relay_queue_capacity() -> usize {
    1024
}
fn default_relay_max_attempts() -> u32 {
    5
}
fn default_relay_initial_backoff_ms() -> u64 {
    100
}
fn default_relay_max_backoff_ms() -> u64 {
    5000
}
fn default_relay_timeout_ms() -> u64 {
    2000
}

// Registry defaults
fn default_default_capacity() -> u32 {
    20
}
fn default_default_device_name() -> String {
    "Another Dispenser".to_string()
}
fn default_device_credentials() -> String {
    "1:42x5yz".to_string()
}
fn default_registry_timeout_ms() -> u64 {
    2000
}
fn default_max_conflict_retries() -> u32 {
    3
}

fn default_startup_timeout_secs() -> u64 {
    10
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(Environment::with_prefix("GATEWAY"))
            .build()?
            .try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.default_capacity == 0 || self.default_capacity > MAX_CAPACITY {
            return Err(ConfigError::Message(format!(
                "GATEWAY_DEFAULT_CAPACITY must be between 1 and {}, got {}",
                MAX_CAPACITY, self.default_capacity
            )));
        }
        Ok(())
    }
}
