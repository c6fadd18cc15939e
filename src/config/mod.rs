mod file_config;

pub use file_config::{DeliveryConfig, FileConfig};

use crate::server::websocket::{BackpressurePolicy, DeliveryPolicy, EchoPolicy, RelayConfig};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::time::Duration;

/// Backpressure strategy as written in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BackpressureMode {
    #[default]
    Drop,
    Wait,
}

/// Settings for delivering frames to room members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub backpressure: BackpressureMode,
    pub send_timeout_ms: u64,
    pub max_consecutive_failures: u32,
    pub echo_to_sender: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            backpressure: BackpressureMode::Drop,
            send_timeout_ms: 1000,
            max_consecutive_failures: 8,
            echo_to_sender: true,
        }
    }
}

impl DeliverySettings {
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        let backpressure = match self.backpressure {
            BackpressureMode::Drop => BackpressurePolicy::Drop,
            BackpressureMode::Wait => {
                BackpressurePolicy::Wait(Duration::from_millis(self.send_timeout_ms))
            }
        };
        DeliveryPolicy {
            backpressure,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        if self.echo_to_sender {
            EchoPolicy::IncludeSender
        } else {
            EchoPolicy::ExcludeSender
        }
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub bind_address: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub outbound_buffer_size: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            outbound_buffer_size: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub outbound_buffer_size: usize,
    pub delivery: DeliverySettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let bind_address = file
            .bind_address
            .unwrap_or_else(|| cli.bind_address.clone());
        if bind_address.trim().is_empty() {
            bail!("bind_address must not be empty");
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if metrics_port != 0 && metrics_port == port {
            bail!("metrics_port must differ from port ({})", port);
        }

        let logging_level = match file.logging_level {
            Some(s) => match parse_logging_level(&s) {
                Some(level) => level,
                None => bail!("Invalid logging_level {:?}, expected none, path or headers", s),
            },
            None => cli.logging_level.clone(),
        };

        let outbound_buffer_size = file
            .outbound_buffer_size
            .unwrap_or(cli.outbound_buffer_size);
        if outbound_buffer_size == 0 {
            bail!("outbound_buffer_size must be greater than 0");
        }

        // Delivery settings - merge file config with defaults
        let delivery_file = file.delivery.unwrap_or_default();
        let delivery_defaults = DeliverySettings::default();
        let backpressure = match delivery_file.backpressure {
            Some(s) => match BackpressureMode::from_str(&s, true) {
                Ok(mode) => mode,
                Err(_) => bail!("Invalid delivery.backpressure {:?}, expected drop or wait", s),
            },
            None => delivery_defaults.backpressure,
        };
        let delivery = DeliverySettings {
            backpressure,
            send_timeout_ms: delivery_file
                .send_timeout_ms
                .unwrap_or(delivery_defaults.send_timeout_ms),
            max_consecutive_failures: delivery_file
                .max_consecutive_failures
                .unwrap_or(delivery_defaults.max_consecutive_failures),
            echo_to_sender: delivery_file
                .echo_to_sender
                .unwrap_or(delivery_defaults.echo_to_sender),
        };
        if delivery.send_timeout_ms == 0 {
            bail!("delivery.send_timeout_ms must be greater than 0");
        }
        if delivery.max_consecutive_failures == 0 {
            bail!("delivery.max_consecutive_failures must be greater than 0");
        }

        Ok(AppConfig {
            bind_address,
            port,
            metrics_port,
            logging_level,
            outbound_buffer_size,
            delivery,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            bind_address: self.bind_address.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            delivery: self.delivery.delivery_policy(),
            echo: self.delivery.echo_policy(),
            outbound_buffer_size: self.outbound_buffer_size,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
