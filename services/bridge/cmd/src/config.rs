//! Configuration handling for the bridge service.
//!
//! Settings come from an optional YAML file, then `ESB_BRIDGE_*` environment
//! variables, then command line flags (applied in `main`).

use anyhow::{Context, Result};
use esb_device::DeviceConfig;
use esb_server::BridgeServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Bridge service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial device of the peripheral
    pub device: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Time to wait for a peripheral answer (milliseconds)
    pub reply_timeout_ms: u64,
    /// Commands the firmware uses for unsolicited pushes
    pub push_commands: Vec<u8>,
    /// TCP bridge listen address
    pub listen: SocketAddr,
    /// Pushed messages buffered per listener
    pub listener_buffer: usize,
    /// gRPC listen address (only used when built with `grpc`)
    pub grpc_listen: SocketAddr,
    /// Whether to start the gRPC service
    pub grpc_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let device = DeviceConfig::default();
        let server = BridgeServerConfig::default();
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: device.baud_rate,
            reply_timeout_ms: device.reply_timeout.as_millis() as u64,
            push_commands: device.push_commands,
            listen: server.listen_addr,
            listener_buffer: server.listener_buffer,
            grpc_listen: SocketAddr::from(([127, 0, 0, 1], 10000)),
            grpc_enabled: true,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `config_path` and the environment.
    ///
    /// A missing file yields the defaults; an unparsable one is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {:?}", path))
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `ESB_BRIDGE_*` overrides read through `lookup`
    pub fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup("ESB_BRIDGE_DEVICE") {
            info!("Serial device overridden by environment: {}", device);
            self.device = device;
        }

        if let Some(listen) = lookup("ESB_BRIDGE_LISTEN") {
            match listen.parse() {
                Ok(addr) => {
                    self.listen = addr;
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(_) => warn!("Ignoring invalid ESB_BRIDGE_LISTEN: {}", listen),
            }
        }

        if let Some(baud) = lookup("ESB_BRIDGE_BAUD") {
            match baud.parse() {
                Ok(baud) => {
                    self.baud_rate = baud;
                    info!("Baud rate overridden by environment: {}", baud);
                }
                Err(_) => warn!("Ignoring invalid ESB_BRIDGE_BAUD: {}", baud),
            }
        }

        if let Some(timeout) = lookup("ESB_BRIDGE_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => {
                    self.reply_timeout_ms = ms;
                    info!("Reply timeout overridden by environment: {}ms", ms);
                }
                Err(_) => warn!("Ignoring invalid ESB_BRIDGE_TIMEOUT_MS: {}", timeout),
            }
        }
    }

    /// Serial transport settings
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            baud_rate: self.baud_rate,
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            push_commands: self.push_commands.clone(),
        }
    }

    /// TCP bridge settings
    pub fn server_config(&self) -> BridgeServerConfig {
        BridgeServerConfig {
            listen_addr: self.listen,
            listener_buffer: self.listener_buffer,
        }
    }
}
