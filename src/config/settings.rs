use std::env;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Grace period granted to clients before they are force-closed on shutdown
    #[serde(default = "default_shutdown_margin_secs")]
    pub shutdown_margin_secs: u64,
    /// How long force-closed sockets get to finish the close handshake
    /// before their sessions are torn down
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    /// Upper bound on waiting for the listener to release every socket
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Frames buffered between a socket and its overlay session, per direction
    #[serde(default = "default_overlay_buffer")]
    pub overlay_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

/// OpenTelemetry exporter settings. Disabled unless `otel.enabled` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_margin_secs() -> u64 {
    5
}

fn default_close_timeout_secs() -> u64 {
    2
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_overlay_buffer() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "overlay-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("relay.shutdown_margin_secs", 5)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, RELAY__SHUTDOWN_MARGIN_SECS, LOG__LEVEL, OTEL__ENABLED, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already-built configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        // Checked before deserializing so the error names the offending value
        if let Ok(margin) = config.get_int("relay.shutdown_margin_secs") {
            if margin < 0 {
                return Err(AppError::Validation(format!(
                    "relay.shutdown_margin_secs must not be negative (got {})",
                    margin
                )));
            }
        }

        let settings: Settings = config.try_deserialize()?;
        if settings.relay.overlay_buffer == 0 {
            return Err(AppError::Validation(
                "relay.overlay_buffer must be at least 1".to_string(),
            ));
        }

        Ok(settings)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl RelayConfig {
    pub fn shutdown_margin(&self) -> Duration {
        Duration::from_secs(self.shutdown_margin_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            shutdown_margin_secs: default_shutdown_margin_secs(),
            close_timeout_secs: default_close_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            overlay_buffer: default_overlay_buffer(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_log_json(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
