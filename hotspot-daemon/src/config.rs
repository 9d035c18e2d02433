//! Daemon runtime configuration, read from a TOML file.
//! 找不到或解析失败时回退到内置默认值，不影响启动。

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Wireless interface the backend drives.
    pub interface: String,
    /// Unix control socket the service binds.
    pub control_socket: PathBuf,
    /// Property store file (persisted SSID + advisory enabled flag).
    pub prop_store: PathBuf,
    /// HTTP status/control bind address.
    pub http_bind: SocketAddr,
    /// Backend start/stop timeout, seconds.
    pub op_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            control_socket: PathBuf::from("/run/hotspotd/control.sock"),
            prop_store: PathBuf::from("/var/lib/hotspotd/properties"),
            http_bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            op_timeout_secs: 10,
        }
    }
}

/// Load the configuration, degrading to defaults on any error.
pub fn load(path: &Path) -> DaemonConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
            return DaemonConfig::default();
        }
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file invalid, using defaults");
            DaemonConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: DaemonConfig =
            toml::from_str("interface = \"wlan1\"\nop_timeout_secs = 5\n").unwrap();
        assert_eq!(config.interface, "wlan1");
        assert_eq!(config.op_timeout_secs, 5);
        assert_eq!(config.control_socket, PathBuf::from("/run/hotspotd/control.sock"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load(Path::new("/nonexistent/hotspotd.toml"));
        assert_eq!(config.interface, "wlan0");
    }
}
