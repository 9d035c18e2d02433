// 直接驱动路径后端：hostapd + ip，不经过任何系统服务。
use crate::traits::ApControlBackend;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const HOSTAPD_CONF_PATH: &str = "/run/hotspotd/hostapd.conf";
const HOSTAPD_CTRL_DIR: &str = "/var/run/hostapd";
const AP_IP_ADDR: &str = "192.168.4.1/24";

/// Drives the radio into AP mode by rendering a hostapd configuration and
/// supervising a hostapd child process. Station queries go through
/// `hostapd_cli`. 适用于没有网络管理服务的精简系统。
#[derive(Debug)]
pub struct HostapdBackend {
    iface: String,
    conf_path: PathBuf,
    hostapd: Arc<Mutex<Option<Child>>>,
}

impl HostapdBackend {
    pub fn new(iface: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
            conf_path: PathBuf::from(HOSTAPD_CONF_PATH),
            hostapd: Arc::new(Mutex::new(None)),
        }
    }

    /// Render the hostapd configuration. An empty passphrase produces an
    /// open network (no wpa section).
    fn render_conf(&self, ssid: &str, passphrase: &str, channel: u8) -> String {
        let mut conf = String::new();
        conf.push_str(&format!("interface={}\n", self.iface));
        conf.push_str("driver=nl80211\n");
        conf.push_str(&format!("ctrl_interface={}\n", HOSTAPD_CTRL_DIR));
        conf.push_str(&format!("ssid={}\n", ssid));
        conf.push_str(&format!("channel={}\n", channel));
        conf.push_str("hw_mode=g\n");
        conf.push_str("ieee80211n=1\n");
        conf.push_str("wmm_enabled=1\n");
        if !passphrase.is_empty() {
            conf.push_str("wpa=2\n");
            conf.push_str("wpa_key_mgmt=WPA-PSK\n");
            conf.push_str("wpa_pairwise=CCMP\n");
            conf.push_str("rsn_pairwise=CCMP\n");
            conf.push_str(&format!("wpa_passphrase={}\n", passphrase));
        }
        conf.push_str("max_num_sta=4\n");
        conf.push_str("ignore_broadcast_ssid=0\n");
        conf
    }

    /// Count station MAC lines in `hostapd_cli all_sta` output; the per-sta
    /// attribute lines (`flags=...`, `aid=...`) are skipped.
    fn count_stations(output: &str) -> u32 {
        output
            .lines()
            .map(str::trim)
            .filter(|line| {
                line.len() == 17
                    && line.as_bytes().iter().enumerate().all(|(i, b)| match i % 3 {
                        2 => *b == b':',
                        _ => b.is_ascii_hexdigit(),
                    })
            })
            .count() as u32
    }

    async fn hostapd_cli(&self, cmd: &str) -> Result<std::process::Output> {
        Command::new("hostapd_cli")
            .arg("-p")
            .arg(HOSTAPD_CTRL_DIR)
            .arg("-i")
            .arg(&self.iface)
            .arg(cmd)
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("hostapd_cli {} spawn failed: {}", cmd, e)))
    }
}

#[async_trait]
impl ApControlBackend for HostapdBackend {
    async fn start(&self, ssid: &str, passphrase: &str, channel: u8) -> Result<bool> {
        info!(ssid, channel, "📡 [hostapd] starting access point");

        // 1. 先停掉客户端模式 (wpa_supplicant)，radio 不能同时处于两种模式
        let _ = Command::new("wpa_cli")
            .arg("-i")
            .arg(&self.iface)
            .arg("terminate")
            .output()
            .await;

        // 2. 写 hostapd 配置
        if let Some(parent) = self.conf_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.conf_path, self.render_conf(ssid, passphrase, channel)).await?;

        // 3. 设置网关地址
        let output = Command::new("ip")
            .arg("addr")
            .arg("add")
            .arg(AP_IP_ADDR)
            .arg("dev")
            .arg(&self.iface)
            .output()
            .await?;
        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            if !error_msg.contains("File exists") {
                warn!(stderr = %error_msg, "failed to assign gateway address");
                return Ok(false);
            }
        }

        // 4. 启动 hostapd
        let mut guard = self.hostapd.lock().await;
        if let Some(mut old) = guard.take() {
            let _ = old.kill().await;
        }
        let child = Command::new("hostapd").arg(&self.conf_path).spawn()?;
        *guard = Some(child);

        Ok(true)
    }

    async fn stop(&self) -> Result<bool> {
        info!("📡 [hostapd] stopping access point");

        if let Some(mut child) = self.hostapd.lock().await.take() {
            let _ = child.kill().await;
        } else {
            // 不是我们拉起的实例也一并关掉
            let _ = self.hostapd_cli("disable").await;
        }

        // 清理网关地址
        let output = Command::new("ip")
            .arg("addr")
            .arg("del")
            .arg(AP_IP_ADDR)
            .arg("dev")
            .arg(&self.iface)
            .output()
            .await?;
        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            if !error_msg.contains("Cannot assign requested address") {
                warn!(stderr = %error_msg, "failed to clean up gateway address");
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn is_running(&self) -> Result<bool> {
        if let Some(child) = self.hostapd.lock().await.as_mut() {
            if child.try_wait()?.is_none() {
                return Ok(true);
            }
        }
        // 守护进程重启后 child 句柄已丢失，用控制套接字探测
        match self.hostapd_cli("ping").await {
            Ok(output) => {
                Ok(output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("PONG"))
            }
            Err(e) => {
                debug!(error = %e, "hostapd_cli ping failed");
                Ok(false)
            }
        }
    }

    async fn connected_station_count(&self) -> Result<u32> {
        let output = self.hostapd_cli("all_sta").await?;
        if !output.status.success() {
            return Ok(0);
        }
        Ok(Self::count_stations(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conf_has_wpa2_section_for_psk_networks() {
        let backend = HostapdBackend::new("wlan0");
        let conf = backend.render_conf("Office", "passw0rd", 6);
        assert!(conf.contains("interface=wlan0\n"));
        assert!(conf.contains("driver=nl80211\n"));
        assert!(conf.contains("ssid=Office\n"));
        assert!(conf.contains("channel=6\n"));
        assert!(conf.contains("wpa=2\n"));
        assert!(conf.contains("wpa_passphrase=passw0rd\n"));
        assert!(conf.contains("max_num_sta=4\n"));
    }

    #[test]
    fn conf_omits_wpa_section_for_open_networks() {
        let backend = HostapdBackend::new("wlan0");
        let conf = backend.render_conf("OpenNet", "", 1);
        assert!(!conf.contains("wpa="));
        assert!(!conf.contains("wpa_passphrase"));
        assert!(conf.contains("ssid=OpenNet\n"));
    }

    #[test]
    fn all_sta_output_counts_mac_lines_only() {
        let output = "aa:bb:cc:dd:ee:ff\n\
                      flags=[AUTH][ASSOC][AUTHORIZED]\n\
                      aid=1\n\
                      11:22:33:44:55:66\n\
                      flags=[AUTH]\n";
        assert_eq!(HostapdBackend::count_stations(output), 2);
        assert_eq!(HostapdBackend::count_stations(""), 0);
        assert_eq!(HostapdBackend::count_stations("UNKNOWN COMMAND\n"), 0);
    }
}
