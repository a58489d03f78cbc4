// src/config.rs

//! Manages server configuration: loading and validation.

use crate::connection::ConnectionOptions;
use crate::core::protocol::DEFAULT_MAX_FRAME_SIZE;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Configuration for TLS encryption. The listener only accepts TLS connections.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    /// Path to the PEM-encoded certificate chain.
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    /// Path to the PEM-encoded private key.
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

fn default_cert_path() -> String {
    "titan.crt".to_string()
}
fn default_key_path() -> String {
    "titan.key".to_string()
}

/// Configuration for the per-user delivery queue.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QueueConfig {
    /// How often empty user queues are dropped.
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            purge_interval: default_purge_interval(),
        }
    }
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(300)
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9878
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Logs every frame read and written.
    #[serde(default)]
    pub debug: bool,
    /// Connections that send no frame for this long are closed.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Message handlers running longer than this are cancelled. `0s` disables the limit.
    #[serde(default = "default_handler_timeout", with = "humantime_serde")]
    pub handler_timeout: Duration,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Frames a connection buffers for writing before senders wait.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            debug: false,
            idle_timeout: default_idle_timeout(),
            handler_timeout: default_handler_timeout(),
            max_frame_size: default_max_frame_size(),
            outbound_buffer: default_outbound_buffer(),
            tls: TlsConfig::default(),
            queue: QueueConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}
fn default_handler_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_outbound_buffer() -> usize {
    64
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        config.validate()?;
        Ok(config)
    }

    /// The `host:port` address the listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The per-connection limits derived from this configuration.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            debug: self.debug,
            idle_timeout: self.idle_timeout,
            handler_timeout: (!self.handler_timeout.is_zero()).then_some(self.handler_timeout),
            max_frame_size: self.max_frame_size,
            outbound_buffer: self.outbound_buffer,
        }
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.idle_timeout.is_zero() {
            return Err(anyhow!("idle_timeout cannot be 0"));
        }
        if self.max_frame_size == 0 {
            return Err(anyhow!("max_frame_size cannot be 0"));
        }
        if self.outbound_buffer == 0 {
            return Err(anyhow!("outbound_buffer cannot be 0"));
        }
        if self.queue.purge_interval.is_zero() {
            return Err(anyhow!("queue.purge_interval cannot be 0"));
        }
        if self.tls.cert_path.trim().is_empty() {
            return Err(anyhow!("tls.cert_path cannot be empty"));
        }
        if self.tls.key_path.trim().is_empty() {
            return Err(anyhow!("tls.key_path cannot be empty"));
        }

        if self.handler_timeout.is_zero() {
            warn!(
                "handler_timeout is disabled. A message handler that never returns will leak its task."
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the server port ({})",
                    self.port
                ));
            }
        }
        Ok(())
    }
}
