//! Persisted system properties, line-oriented `key=value` file.
//!
//! 只有默认 SSID 和 "AP 已启用" 标志会被持久化；共享密钥从不落盘。
//! Everything here is best-effort: an unreadable or missing store degrades
//! silently to built-in defaults, a failed write is logged and dropped.

use crate::traits::ApConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted default network name.
pub const PROP_AP_SSID: &str = "wifi.ap.ssid";
/// Advisory flag, `1` while the AP is up. Best-effort only.
pub const PROP_AP_ENABLED: &str = "wifi.ap.enabled";

pub struct PropStore {
    path: PathBuf,
}

impl PropStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the startup configuration: persisted SSID if present, built-in
    /// defaults for everything else.
    pub async fn load(&self) -> ApConfig {
        let props = self.read_all().await;
        let mut config = ApConfig::default();
        if let Some(ssid) = props.get(PROP_AP_SSID) {
            if !ssid.is_empty() {
                config.ssid = ssid.clone();
            }
        }
        config
    }

    /// Last persisted enabled flag, `false` when absent.
    pub async fn load_enabled(&self) -> bool {
        self.read_all().await.get(PROP_AP_ENABLED).map(String::as_str) == Some("1")
    }

    pub async fn save_ssid(&self, ssid: &str) {
        self.set(PROP_AP_SSID, ssid).await;
    }

    pub async fn save_enabled(&self, enabled: bool) {
        self.set(PROP_AP_ENABLED, if enabled { "1" } else { "0" }).await;
    }

    async fn set(&self, key: &str, value: &str) {
        let mut props = self.read_all().await;
        props.insert(key.to_string(), value.to_string());
        self.write_all(&props).await;
    }

    async fn read_all(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return props,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "property store unreadable, using defaults");
                return props;
            }
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    props.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => debug!(line, "skipping malformed property line"),
            }
        }
        props
    }

    async fn write_all(&self, props: &BTreeMap<String, String>) {
        let mut content = String::new();
        for (key, value) in props {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "failed to create property store directory");
                return;
            }
        }
        if let Err(e) = tokio::fs::write(&self.path, content).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist properties");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DEFAULT_CHANNEL, DEFAULT_PASSPHRASE, DEFAULT_SSID};

    fn store_in(dir: &tempfile::TempDir) -> PropStore {
        PropStore::new(dir.path().join("properties"))
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let config = store.load().await;
        assert_eq!(config.ssid, DEFAULT_SSID);
        assert_eq!(config.passphrase, DEFAULT_PASSPHRASE);
        assert_eq!(config.channel, DEFAULT_CHANNEL);
        assert!(!store.load_enabled().await);
    }

    #[tokio::test]
    async fn persisted_ssid_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save_ssid("Office").await;
        store.save_enabled(true).await;

        let reopened = store_in(&dir);
        let config = reopened.load().await;
        assert_eq!(config.ssid, "Office");
        // 密钥从不持久化
        assert_eq!(config.passphrase, DEFAULT_PASSPHRASE);
        assert!(reopened.load_enabled().await);
    }

    #[tokio::test]
    async fn garbage_lines_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("properties");
        tokio::fs::write(&path, "# comment\nnot a property\nwifi.ap.ssid=Lab\n")
            .await
            .unwrap();
        let config = PropStore::new(&path).load().await;
        assert_eq!(config.ssid, "Lab");
    }
}
