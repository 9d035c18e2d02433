//! AP 管理器：任意组件使用的客户端门面。
//!
//! Hides how the service is reached. Attached, every call is forwarded over
//! a persistent request-reply connection and returns the service's real
//! answer. Unattached (or after the connection died), `enable`/`disable`
//! degrade to fire-and-forget sends of the equivalent control message and
//! return `true` optimistically — the request was sent, not honored; the
//! state-change listener is the only truth in that mode.

use crate::proto::{ControlEvent, ControlReply, ControlRequest};
use crate::traits::{ApState, StateChangeEvent};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Single-slot state-change callback; registering a new one replaces the old.
pub type StateListener = Box<dyn Fn(StateChangeEvent) + Send + Sync>;

pub struct ApManager {
    socket_path: PathBuf,
    conn: Mutex<Option<ControlConn>>,
    listener: Arc<StdMutex<Option<StateListener>>>,
    events_task: StdMutex<Option<JoinHandle<()>>>,
}

struct ControlConn {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl ControlConn {
    async fn open(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self { lines: BufReader::new(read_half).lines(), writer })
    }

    async fn round_trip(&mut self, request: &ControlRequest) -> Result<ControlReply> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        match self.lines.next_line().await? {
            Some(line) => Ok(serde_json::from_str(&line)?),
            None => Err(Error::Protocol("service closed the connection".into())),
        }
    }
}

impl ApManager {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            conn: Mutex::new(None),
            listener: Arc::new(StdMutex::new(None)),
            events_task: StdMutex::new(None),
        }
    }

    /// Establish the direct binding. On failure the manager stays usable in
    /// fire-and-forget mode.
    pub async fn attach(&self) -> Result<()> {
        let conn = ControlConn::open(&self.socket_path).await?;
        *self.conn.lock().await = Some(conn);
        debug!(path = %self.socket_path.display(), "attached to AP service");
        Ok(())
    }

    /// Release the direct binding. The state-change listener, if any, keeps
    /// its own subscription and is not affected.
    pub async fn detach(&self) {
        *self.conn.lock().await = None;
    }

    pub async fn is_attached(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Request the AP up. Attached: the service's accepted/rejected answer.
    /// Unattached: `true` once the message is on its way.
    pub async fn enable(&self, ssid: Option<&str>, password: Option<&str>) -> bool {
        let request = ControlRequest::ApEnable {
            ssid: ssid.map(str::to_string),
            password: password.map(str::to_string),
        };
        match self.bound_ack(&request).await {
            Some(accepted) => accepted,
            None => {
                self.send_detached(request);
                true
            }
        }
    }

    /// Request the AP down; same degradation contract as [`enable`](Self::enable).
    pub async fn disable(&self) -> bool {
        let request = ControlRequest::ApDisable;
        match self.bound_ack(&request).await {
            Some(accepted) => accepted,
            None => {
                self.send_detached(request);
                true
            }
        }
    }

    pub async fn is_enabled(&self) -> bool {
        self.current_state().await == ApState::Enabled
    }

    /// Controller state when attached; `Disabled` when there is nothing to
    /// ask (matching the optimistic-send contract, callers in that mode
    /// watch the listener instead).
    pub async fn current_state(&self) -> ApState {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_mut() {
            match conn.round_trip(&ControlRequest::Status).await {
                Ok(ControlReply::Status { state, .. }) => return state,
                Ok(other) => warn!(reply = ?other, "unexpected status reply"),
                Err(e) => {
                    warn!(error = %e, "bound status call failed, detaching");
                    *guard = None;
                }
            }
        }
        ApState::Disabled
    }

    /// Register the state-change listener (single slot, replace-on-set) and
    /// make sure the background subscription is running.
    pub fn set_listener(&self, listener: impl Fn(StateChangeEvent) + Send + Sync + 'static) {
        *self.listener.lock().unwrap() = Some(Box::new(listener));
        self.ensure_events_task();
    }

    pub fn clear_listener(&self) {
        *self.listener.lock().unwrap() = None;
    }

    /// Bound path: forward and return the ack. `None` means "not attached"
    /// (including a connection that just died — it is dropped here).
    async fn bound_ack(&self, request: &ControlRequest) -> Option<bool> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut()?;
        match conn.round_trip(request).await {
            Ok(ControlReply::Ack { accepted }) => Some(accepted),
            Ok(other) => {
                warn!(reply = ?other, "unexpected ack reply");
                Some(false)
            }
            Err(e) => {
                warn!(error = %e, "bound call failed, falling back to fire-and-forget");
                *guard = None;
                None
            }
        }
    }

    /// Fire-and-forget path: send the message from a detached task and do
    /// not wait for the outcome.
    fn send_detached(&self, request: ControlRequest) {
        let path = self.socket_path.clone();
        tokio::spawn(async move {
            let result = async {
                let mut conn = ControlConn::open(&path).await?;
                let mut line = serde_json::to_string(&request)?;
                line.push('\n');
                conn.writer.write_all(line.as_bytes()).await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(e) = result {
                warn!(error = %e, "fire-and-forget command not delivered");
            }
        });
    }

    fn ensure_events_task(&self) {
        let mut guard = self.events_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let path = self.socket_path.clone();
        let listener = Arc::clone(&self.listener);
        *guard = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = run_subscription(&path, &listener).await {
                    debug!(error = %e, "event subscription lost, retrying");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }));
    }
}

impl Drop for ApManager {
    fn drop(&mut self) {
        if let Some(task) = self.events_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Keep one `subscribe` connection open and deliver each pushed event to
/// the current listener slot.
async fn run_subscription(
    path: &Path,
    listener: &Arc<StdMutex<Option<StateListener>>>,
) -> Result<()> {
    let mut conn = ControlConn::open(path).await?;
    let mut line = serde_json::to_string(&ControlRequest::Subscribe)?;
    line.push('\n');
    conn.writer.write_all(line.as_bytes()).await?;

    while let Some(line) = conn.lines.next_line().await? {
        match serde_json::from_str::<ControlEvent>(&line) {
            Ok(ControlEvent::StateChanged { state, ssid }) => {
                if let Some(callback) = listener.lock().unwrap().as_ref() {
                    callback(StateChangeEvent { state, ssid });
                }
            }
            // The subscribe ack and anything unknown are skipped.
            Err(_) => debug!(%line, "ignoring non-event line on subscription"),
        }
    }
    Err(Error::Protocol("service closed the event stream".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockBackend;
    use crate::controller::ApController;
    use crate::service::ApService;
    use crate::store::PropStore;
    use crate::traits::ApConfig;

    async fn spawn_service() -> (ApService, Arc<MockBackend>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        let store = PropStore::new(dir.path().join("properties"));
        let controller = ApController::new(backend.clone(), store, ApConfig::default());
        let service = ApService::new(controller, dir.path().join("control.sock"));
        service.start().await.unwrap();
        (service, backend, dir)
    }

    fn collecting_listener(
        manager: &ApManager,
    ) -> tokio::sync::mpsc::UnboundedReceiver<StateChangeEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        manager.set_listener(move |event| {
            let _ = tx.send(event);
        });
        rx
    }

    async fn next_event(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<StateChangeEvent>,
    ) -> StateChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for listener event")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn attached_calls_report_the_real_answer() {
        let (service, backend, _dir) = spawn_service().await;
        let manager = ApManager::new(service.socket_path());
        manager.attach().await.unwrap();
        assert!(manager.is_attached().await);

        assert_eq!(manager.current_state().await, ApState::Disabled);
        assert!(!manager.is_enabled().await);

        // A request bouncing off an in-flight transition is reported as
        // rejected, not optimistically accepted.
        let gate = backend.hold_start();
        assert!(manager.enable(Some("Office"), Some("passw0rd")).await);
        assert!(!manager.disable().await);
        gate.notify_one();

        let mut events = service.controller().subscribe();
        while manager.current_state().await != ApState::Enabled {
            let _ = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("enable never completed");
        }
        assert!(manager.is_enabled().await);
    }

    #[tokio::test]
    async fn unattached_sends_are_optimistic_and_still_arrive() {
        let (service, _backend, _dir) = spawn_service().await;
        let manager = ApManager::new(service.socket_path());
        let mut events = service.controller().subscribe();

        // Never attached: the call reports success immediately...
        assert!(manager.enable(Some("Drive-by"), None).await);
        // ...and state queries answer Disabled without asking anyone.
        assert_eq!(manager.current_state().await, ApState::Disabled);

        // ...but the command does reach the service.
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("fire-and-forget enable never arrived")
            .unwrap();
        assert_eq!(event.state, ApState::Enabling);
        assert_eq!(event.ssid, "Drive-by");
    }

    #[tokio::test]
    async fn listener_receives_transitions_without_attachment() {
        let (service, _backend, _dir) = spawn_service().await;
        let manager = ApManager::new(service.socket_path());
        let mut rx = collecting_listener(&manager);

        // Give the subscription task a moment to connect, then drive the
        // controller from the service side.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.enable(None, None));

        assert_eq!(next_event(&mut rx).await.state, ApState::Enabling);
        assert_eq!(next_event(&mut rx).await.state, ApState::Enabled);
    }

    #[tokio::test]
    async fn new_listener_replaces_the_old_one() {
        let (service, _backend, _dir) = spawn_service().await;
        let manager = ApManager::new(service.socket_path());

        let mut first = collecting_listener(&manager);
        let mut second = collecting_listener(&manager);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.enable(None, None));

        assert_eq!(next_event(&mut second).await.state, ApState::Enabling);
        // The replaced listener saw nothing.
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn detach_degrades_to_fire_and_forget() {
        let (service, _backend, _dir) = spawn_service().await;
        let manager = ApManager::new(service.socket_path());
        manager.attach().await.unwrap();
        manager.detach().await;
        assert!(!manager.is_attached().await);

        let mut events = service.controller().subscribe();
        assert!(manager.enable(None, None).await);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("command never arrived after detach")
            .unwrap();
        assert_eq!(event.state, ApState::Enabling);
    }
}
