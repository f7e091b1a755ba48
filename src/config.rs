use anyhow::Result;
use livecapture_discovery::{DiscoveryOptions, DEFAULT_PORT, SEND_PERIOD, SERVER_LOSS_TIME};
use serde::{Deserialize, Serialize};
use std::{fs, net::SocketAddrV4, path::Path, time::Duration};
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "config/livecapture.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveCaptureConfig {
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// UDP port shared by servers and clients.
    pub port: u16,
    /// Product announced by `advertise` and filtered on by `discover`.
    pub product_name: String,
    /// Name shown to clients for this machine.
    pub instance_name: String,
    /// Stable server id; a random one is used when unset.
    pub server_id: Option<Uuid>,
    /// Endpoints announced by `advertise`.
    pub end_points: Vec<SocketAddrV4>,
    /// Whether `discover` reports servers running on this host.
    pub discover_local: bool,
    /// Seconds between announcements.
    pub send_period_secs: u64,
    /// Seconds of silence before a server is reported lost.
    pub loss_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            product_name: "LiveCapture".to_string(),
            instance_name: "livecapture".to_string(),
            server_id: None,
            end_points: Vec::new(),
            discover_local: true,
            send_period_secs: SEND_PERIOD.as_secs(),
            loss_timeout_secs: SERVER_LOSS_TIME.as_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            port: self.port,
            send_period: Duration::from_secs(self.send_period_secs.max(1)),
            loss_timeout: Duration::from_secs(self.loss_timeout_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

impl LiveCaptureConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<LiveCaptureConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    LiveCaptureConfig::default()
                }
            },
            Err(err) => {
                // A missing default file is the normal first run.
                if path != Path::new(DEFAULT_CONFIG_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                LiveCaptureConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }
}
