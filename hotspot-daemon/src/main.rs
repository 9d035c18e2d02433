mod config;

use anyhow::Result;
use config::DaemonConfig;
use hotspot_core::controller::ApController;
use hotspot_core::service::ApService;
use hotspot_core::store::PropStore;
use hotspot_core::traits::ApControlBackend;
use hotspot_core::web;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/hotspotd.toml";

// --- 基于特性，在编译时决定实例化哪个后端 ---

const BACKEND_COUNT: usize = cfg!(feature = "backend_hostapd") as usize
    + cfg!(feature = "backend_wpa_dbus") as usize
    + cfg!(feature = "backend_mock") as usize;
const _: () = assert!(
    BACKEND_COUNT == 1,
    "Select exactly ONE backend feature, e.g., --features hotspot-daemon/backend_hostapd"
);

#[cfg(feature = "backend_hostapd")]
fn build_backend(config: &DaemonConfig) -> Arc<dyn ApControlBackend> {
    tracing::info!("🚀 Using hostapd backend");
    use hotspot_core::backends::hostapd::HostapdBackend;
    Arc::new(HostapdBackend::new(&config.interface))
}

#[cfg(feature = "backend_wpa_dbus")]
fn build_backend(config: &DaemonConfig) -> Arc<dyn ApControlBackend> {
    tracing::info!("🚀 Using wpa_supplicant D-Bus backend");
    use hotspot_core::backends::wpa_dbus::WpaDbusBackend;
    Arc::new(WpaDbusBackend::new(&config.interface))
}

#[cfg(feature = "backend_mock")]
fn build_backend(_config: &DaemonConfig) -> Arc<dyn ApControlBackend> {
    tracing::info!("🚀 Using mock backend (no hardware is touched)");
    use hotspot_core::backends::mock::MockBackend;
    Arc::new(MockBackend::new())
}

// 如果没有选择任何后端，编译失败
#[cfg(not(any(
    feature = "backend_hostapd",
    feature = "backend_wpa_dbus",
    feature = "backend_mock"
)))]
compile_error!(
    "No backend feature selected. Please choose one, e.g., --features hotspot-daemon/backend_hostapd"
);

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（这是入口点的职责）
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("HOTSPOTD_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = config::load(Path::new(&config_path));
    tracing::info!(?config, "🚀 Starting hotspotd");

    let backend = build_backend(&config);
    let store = PropStore::new(&config.prop_store);

    let was_enabled = store.load_enabled().await;
    let ap_config = store.load().await;
    let controller = ApController::with_timeout(
        backend,
        store,
        ap_config,
        Duration::from_secs(config.op_timeout_secs),
    );

    // 开机时与硬件实际状态对齐
    controller.reconcile_startup_state().await;
    if was_enabled && !controller.is_enabled() {
        tracing::info!("AP was enabled before the last shutdown but the radio is down");
    }

    let service = ApService::new(controller.clone(), &config.control_socket);
    service.start().await?;

    let http = web::start_http_server(controller, config.http_bind);

    wait_for_shutdown().await;
    tracing::info!("🛑 Shutting down.");
    service.shutdown().await;
    http.abort();
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
