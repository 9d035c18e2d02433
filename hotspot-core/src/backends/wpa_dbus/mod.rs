// 托管路径后端：通过 wpa_supplicant 的 D-Bus 接口切换 AP 模式 (mode=2)。
use crate::traits::ApControlBackend;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, Proxy};

// D-Bus 常量
const WPA_SUPPLICANT_SERVICE: &str = "fi.w1.wpa_supplicant1";
const WPA_SUPPLICANT_PATH: &str = "/fi/w1/wpa_supplicant1";
const WPA_SUPPLICANT_INTERFACE: &str = "fi.w1.wpa_supplicant1";
const IFACE_INTERFACE: &str = "fi.w1.wpa_supplicant1.Interface";

/// Puts the radio into AP mode through the OS-managed wpa_supplicant
/// service instead of driving hostapd directly. The supplicant owns the
/// interface; we only ask it to host a `mode=2` network.
#[derive(Debug)]
pub struct WpaDbusBackend {
    iface: String,
    conn: Arc<Mutex<Option<Connection>>>,
    ap_network: Arc<Mutex<Option<OwnedObjectPath>>>,
}

impl WpaDbusBackend {
    pub fn new(iface: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
            conn: Arc::new(Mutex::new(None)),
            ap_network: Arc::new(Mutex::new(None)),
        }
    }

    /// 确保 D-Bus 连接存在
    async fn ensure_conn(&self) -> Result<Connection> {
        if let Some(c) = self.conn.lock().await.clone() {
            return Ok(c);
        }
        let c = Connection::system().await?;
        *self.conn.lock().await = Some(c.clone());
        Ok(c)
    }

    /// 获取根 DBus 代理
    async fn root_proxy(&self) -> Result<Proxy<'_>> {
        let conn = self.ensure_conn().await?;
        Ok(Proxy::new(
            &conn,
            WPA_SUPPLICANT_SERVICE,
            WPA_SUPPLICANT_PATH,
            WPA_SUPPLICANT_INTERFACE,
        )
        .await?)
    }

    /// DBus Value 转换辅助函数
    #[inline]
    fn ov<'a, V>(v: V) -> OwnedValue
    where
        V: Into<Value<'a>>,
    {
        v.into().try_into().unwrap()
    }

    /// 确保 wpa_supplicant 接口路径；必要时拉起守护进程
    async fn ensure_iface_path(&self) -> Result<OwnedObjectPath> {
        let mgr = self.root_proxy().await?;
        if let Ok(reply) = mgr.call_method("GetInterface", &(self.iface.as_str(),)).await {
            let path: OwnedObjectPath = reply.body().deserialize()?;
            return Ok(path);
        }

        info!("wpa_supplicant D-Bus interface not available, attempting to start daemon...");
        match Command::new("wpa_supplicant")
            .arg("-B")
            .arg(format!("-i{}", self.iface))
            .arg("-c/etc/wpa_supplicant.conf")
            .spawn()
        {
            Ok(_) => debug!("wpa_supplicant daemon started, waiting for D-Bus interface..."),
            Err(e) => warn!("Failed to spawn wpa_supplicant: {}", e),
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

        let reply = mgr
            .call_method("GetInterface", &(self.iface.as_str(),))
            .await
            .map_err(|e| {
                Error::CommandFailed(format!("GetInterface failed after daemon startup: {}", e))
            })?;
        let path: OwnedObjectPath = reply.body().deserialize()?;
        Ok(path)
    }

    async fn iface_proxy(&self) -> Result<(Proxy<'static>, OwnedObjectPath)> {
        let path = self.ensure_iface_path().await?;
        let conn = self.ensure_conn().await?;
        let proxy = Proxy::new(
            &conn,
            WPA_SUPPLICANT_SERVICE,
            path.clone(),
            IFACE_INTERFACE,
        )
        .await?;
        Ok((proxy, path))
    }

    fn freq_for_channel(channel: u8) -> i32 {
        // 2.4 GHz: 信道 1 = 2412 MHz，每信道 5 MHz
        2407 + 5 * i32::from(channel)
    }
}

#[async_trait]
impl ApControlBackend for WpaDbusBackend {
    async fn start(&self, ssid: &str, passphrase: &str, channel: u8) -> Result<bool> {
        info!(ssid, channel, "📡 [wpa_dbus] starting access point");
        let (iface, _path) = self.iface_proxy().await?;

        // 客户端模式下线；残留的网络配置一并清掉
        let _ = iface.call_method("Disconnect", &()).await;
        let _ = iface.call_method("RemoveAllNetworks", &()).await;

        let mut net: HashMap<String, OwnedValue> = HashMap::new();
        net.insert("ssid".into(), Self::ov(ssid.as_bytes().to_vec()));
        net.insert("mode".into(), Self::ov(2i32));
        net.insert("frequency".into(), Self::ov(Self::freq_for_channel(channel)));
        if passphrase.is_empty() {
            net.insert("key_mgmt".into(), Self::ov("NONE"));
        } else {
            net.insert("key_mgmt".into(), Self::ov("WPA-PSK"));
            net.insert("psk".into(), Self::ov(passphrase.to_string()));
        }

        let reply = iface.call_method("AddNetwork", &(net)).await?;
        let net_path: OwnedObjectPath = reply.body().deserialize()?;
        iface.call_method("SelectNetwork", &(net_path.as_ref(),)).await?;

        *self.ap_network.lock().await = Some(net_path);
        Ok(true)
    }

    async fn stop(&self) -> Result<bool> {
        info!("📡 [wpa_dbus] stopping access point");
        let (iface, _path) = self.iface_proxy().await?;

        let _ = iface.call_method("Disconnect", &()).await;
        if let Some(net_path) = self.ap_network.lock().await.take() {
            let _ = iface.call_method("RemoveNetwork", &(net_path.as_ref(),)).await;
        }
        Ok(true)
    }

    async fn is_running(&self) -> Result<bool> {
        if self.ap_network.lock().await.is_none() {
            return Ok(false);
        }
        let (iface, _path) = self.iface_proxy().await?;
        let state: String = iface.get_property("State").await?;
        Ok(state == "completed" || state == "associated")
    }

    async fn connected_station_count(&self) -> Result<u32> {
        let (iface, _path) = self.iface_proxy().await?;
        match iface.get_property::<Vec<OwnedObjectPath>>("Stations").await {
            Ok(stations) => Ok(stations.len() as u32),
            Err(e) => {
                debug!(error = %e, "Stations property unavailable");
                Ok(0)
            }
        }
    }
}
