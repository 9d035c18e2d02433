//! AP 服务：托管控制器并提供两个请求面。
//!
//! In-process callers hold the service (or its controller) directly and get
//! synchronous "request accepted" results. Decoupled callers talk to the
//! Unix control socket with the [`proto`](crate::proto) line protocol; a
//! `subscribe` request turns a connection into the outbound broadcast
//! stream that republishes every controller transition.

use crate::controller::ApController;
use crate::proto::{ControlEvent, ControlReply, ControlRequest};
use crate::traits::{ApConfig, ApState};
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ApService {
    controller: ApController,
    socket_path: PathBuf,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ApService {
    pub fn new(controller: ApController, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            controller,
            socket_path: socket_path.into(),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind the control socket and start serving. A stale socket file from
    /// a previous run is removed first.
    pub async fn start(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => debug!(path = %self.socket_path.display(), "removed stale control socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "control socket listening");

        let controller = self.controller.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let controller = controller.clone();
                        tokio::spawn(handle_connection(controller, stream));
                    }
                    Err(e) => {
                        warn!(error = %e, "control socket accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Stop accepting connections and remove the socket file. Idempotent;
    /// safe to call even if `start` never ran.
    pub async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        let _ = tokio::fs::remove_file(&self.socket_path).await;
        info!("control socket shut down");
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn controller(&self) -> &ApController {
        &self.controller
    }

    // --- 绑定调用面：同进程直接方法调用 ---

    pub fn enable(&self, ssid: Option<&str>, passphrase: Option<&str>) -> bool {
        self.controller.enable(ssid, passphrase)
    }

    pub fn disable(&self) -> bool {
        self.controller.disable()
    }

    pub fn is_enabled(&self) -> bool {
        self.controller.is_enabled()
    }

    pub fn state(&self) -> ApState {
        self.controller.state()
    }

    pub fn config(&self) -> ApConfig {
        self.controller.config()
    }

    pub fn set_config(&self, ssid: Option<&str>, passphrase: Option<&str>, channel: Option<u8>) -> bool {
        self.controller.set_config(ssid, passphrase, channel)
    }

    pub async fn station_count(&self) -> u32 {
        self.controller.station_count().await
    }
}

impl Drop for ApService {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn handle_connection(controller: ApController, stream: UnixStream) {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "control connection read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "rejecting malformed control request");
                let reply = ControlReply::Error { message: format!("malformed request: {}", e) };
                if write_line(&mut writer, &reply).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let reply = match request {
            ControlRequest::ApEnable { ssid, password } => ControlReply::Ack {
                accepted: controller.enable(ssid.as_deref(), password.as_deref()),
            },
            ControlRequest::ApDisable => ControlReply::Ack { accepted: controller.disable() },
            ControlRequest::SetConfig { ssid, password, channel } => ControlReply::Ack {
                accepted: controller.set_config(ssid.as_deref(), password.as_deref(), channel),
            },
            ControlRequest::Status => {
                let config = controller.config();
                ControlReply::Status {
                    state: controller.state(),
                    ssid: config.ssid,
                    channel: config.channel,
                    stations: controller.station_count().await,
                }
            }
            ControlRequest::Subscribe => {
                // Subscribe before acking, so the ack guarantees that no
                // later transition can be missed.
                let events = controller.subscribe();
                if write_line(&mut writer, &ControlReply::Subscribed).await.is_err() {
                    return;
                }
                stream_events(events, writer).await;
                return;
            }
        };

        if write_line(&mut writer, &reply).await.is_err() {
            return;
        }
    }
}

/// Forward controller transitions to one subscriber until it disconnects.
/// A lagging subscriber only loses its own backlog; the controller and the
/// other subscribers are never stalled.
async fn stream_events(
    mut events: tokio::sync::broadcast::Receiver<crate::traits::StateChangeEvent>,
    mut writer: OwnedWriteHalf,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let message = ControlEvent::StateChanged { state: event.state, ssid: event.ssid };
                if write_line(&mut writer, &message).await.is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagging, dropping backlog");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
