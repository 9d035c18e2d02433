use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// 在这里定义共享的数据结构，和为所有控制后端定义的 trait。

/// Fallback network name when nothing is persisted.
pub const DEFAULT_SSID: &str = "GlassPorts";
/// Fixed fallback shared key; never persisted, held in memory only.
pub const DEFAULT_PASSPHRASE: &str = "glassports";
/// 2.4 GHz 默认信道
pub const DEFAULT_CHANNEL: u8 = 6;

/// WPA2 requires at least 8 characters; an empty passphrase means an open
/// network and is always accepted.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Lifecycle state of the access point. Exactly one current value exists
/// per controller; every other component reads snapshots of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
    Failed,
}

impl ApState {
    /// Enabling/Disabling mark an in-flight backend call; no new
    /// enable/disable request is honored until it resolves.
    pub fn is_transitioning(self) -> bool {
        matches!(self, ApState::Enabling | ApState::Disabling)
    }
}

impl std::fmt::Display for ApState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApState::Disabled => "disabled",
            ApState::Enabling => "enabling",
            ApState::Enabled => "enabled",
            ApState::Disabling => "disabling",
            ApState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Desired hotspot configuration. Owned by the controller; mutated only
/// through its merge operation, never while a transition is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApConfig {
    pub ssid: String,
    pub passphrase: String,
    pub channel: u8,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            ssid: DEFAULT_SSID.to_string(),
            passphrase: DEFAULT_PASSPHRASE.to_string(),
            channel: DEFAULT_CHANNEL,
        }
    }
}

impl ApConfig {
    /// Merge caller-supplied values. Invalid input is silently ignored and
    /// the prior value retained: empty SSIDs, passphrases of 1..=7 chars
    /// (empty means open network and is accepted).
    pub fn merge(&mut self, ssid: Option<&str>, passphrase: Option<&str>) {
        if let Some(s) = ssid {
            if !s.is_empty() {
                self.ssid = s.to_string();
            }
        }
        if let Some(p) = passphrase {
            if p.is_empty() || p.len() >= MIN_PASSPHRASE_LEN {
                self.passphrase = p.to_string();
            }
        }
    }

    /// Channels outside the 1-11 range are ignored.
    pub fn merge_channel(&mut self, channel: Option<u8>) {
        if let Some(ch) = channel {
            if (1..=11).contains(&ch) {
                self.channel = ch;
            }
        }
    }
}

/// Produced once per state transition and fanned out to every observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub state: ApState,
    pub ssid: String,
}

/// Low-level control backend: the one place an actual OS/driver call occurs.
///
/// All four operations may block briefly (driver/OS call latency) and must be
/// treated as blocking I/O by callers. A failed call is reported as
/// `Ok(false)` (rejected) or `Err` (backend unreachable) — callers treat both
/// the same and never panic on either.
#[async_trait]
pub trait ApControlBackend: Send + Sync {
    /// Bring the radio up as an access point. Returns whether the call was
    /// accepted, not whether any station has associated. Implementations
    /// deactivate client-mode Wi-Fi first if it is active.
    async fn start(&self, ssid: &str, passphrase: &str, channel: u8) -> crate::Result<bool>;

    /// Tear the access point down.
    async fn stop(&self) -> crate::Result<bool>;

    /// Point-in-time query of whether the radio is currently in AP mode.
    async fn is_running(&self) -> crate::Result<bool>;

    /// Number of currently associated stations, 0 when the AP is down.
    async fn connected_station_count(&self) -> crate::Result<u32>;
}
