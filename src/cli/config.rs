use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

pub const PASSWORD_ENV: &str = "RTU2TCP_PASSWORD";
pub const LOG_FILE_ENV: &str = "RTU2TCP_LOG_FILE";

/// Process-level settings, read once at start-up.
///
/// These are separate from the device configuration the web UI edits: they
/// say where things live, not what the gateway maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayBootConfig {
    /// Listen address of the configuration endpoint
    pub http_listen: SocketAddr,
    /// JSON file holding the device configuration
    pub data_file: PathBuf,
    /// RS485 serial device
    pub serial_port: String,
    /// Credential required for configuration writes
    pub password: String,
    /// Pause between poll cycles
    pub poll_interval_ms: u64,
    /// How long to wait for a slave to answer
    pub response_timeout_ms: u64,
    /// Interface the Modbus-TCP listener binds to; the port comes from the
    /// device configuration
    pub modbus_bind: IpAddr,
    pub max_entries: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for GatewayBootConfig {
    fn default() -> Self {
        Self {
            http_listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            data_file: PathBuf::from("rtu2tcp_config.json"),
            serial_port: "/dev/ttyUSB0".to_string(),
            password: "admin".to_string(),
            poll_interval_ms: 100,
            response_timeout_ms: 500,
            modbus_bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_entries: 64,
            log_file: None,
        }
    }
}

impl GatewayBootConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Read configuration from a file
    pub fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read boot config {file_path:?}"))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse boot config {file_path:?}"))
    }

    /// Convert to a TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Applies `RTU2TCP_PASSWORD` and `RTU2TCP_LOG_FILE`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.password = password;
        }
        if let Some(path) = lookup(LOG_FILE_ENV).filter(|p| !p.is_empty()) {
            self.log_file = Some(PathBuf::from(path));
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
