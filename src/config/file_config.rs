use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub outbound_buffer_size: Option<usize>,

    // Feature configs
    pub delivery: Option<DeliveryConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    /// What to do when a member's outbound buffer is full: "drop" or "wait"
    pub backpressure: Option<String>,
    /// Bounded wait per delivery under the "wait" policy
    pub send_timeout_ms: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub echo_to_sender: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
