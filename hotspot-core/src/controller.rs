//! AP 控制器：生命周期状态机。
//!
//! The controller is a single logical actor: one lock guards the state and
//! the configuration, every transition is emitted on a broadcast channel
//! while that lock is held, and the Enabling/Disabling states themselves
//! guarantee that at most one backend call is in flight. Backend calls run
//! in a spawned task with the lock released, so the controller keeps
//! accepting (and rejecting) requests while the radio is busy.

use crate::store::PropStore;
use crate::traits::{ApConfig, ApControlBackend, ApState, StateChangeEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Backend start/stop calls that outlive this are treated as failed; an
/// unresponsive driver must not wedge the controller forever.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct ApController {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn ApControlBackend>,
    store: PropStore,
    shared: Mutex<Shared>,
    events: broadcast::Sender<StateChangeEvent>,
    op_timeout: Duration,
}

struct Shared {
    state: ApState,
    config: ApConfig,
}

impl ApController {
    pub fn new(backend: Arc<dyn ApControlBackend>, store: PropStore, config: ApConfig) -> Self {
        Self::with_timeout(backend, store, config, DEFAULT_OP_TIMEOUT)
    }

    pub fn with_timeout(
        backend: Arc<dyn ApControlBackend>,
        store: PropStore,
        config: ApConfig,
        op_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                shared: Mutex::new(Shared {
                    state: ApState::Disabled,
                    config,
                }),
                events,
                op_timeout,
            }),
        }
    }

    /// Adopt the radio's actual mode once at startup, before anyone
    /// observes us: a daemon restart must not report `Disabled` while the
    /// AP is still on the air. No event is emitted.
    pub async fn reconcile_startup_state(&self) {
        match self.inner.backend.is_running().await {
            Ok(true) => {
                let mut shared = self.inner.lock_shared();
                if shared.state == ApState::Disabled {
                    shared.state = ApState::Enabled;
                    info!("radio already in AP mode, adopting enabled state");
                }
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "startup state probe failed"),
        }
    }

    /// Request the access point up. Returns whether the request was
    /// accepted; the transition itself completes asynchronously and is
    /// reported through [`subscribe`](Self::subscribe).
    ///
    /// 正在切换时 (Enabling/Disabling) 的新请求会被拒绝，配置也不会被改动。
    pub fn enable(&self, ssid: Option<&str>, passphrase: Option<&str>) -> bool {
        let (ssid_now, passphrase_now, channel) = {
            let mut shared = self.inner.lock_shared();
            match shared.state {
                ApState::Enabling | ApState::Disabling => {
                    debug!(state = %shared.state, "enable rejected: transition in flight");
                    return false;
                }
                ApState::Enabled => {
                    // Already up; just take the new desired config. The
                    // caller re-cycles explicitly to apply it.
                    shared.config.merge(ssid, passphrase);
                    return true;
                }
                ApState::Disabled | ApState::Failed => {}
            }
            shared.config.merge(ssid, passphrase);
            self.inner.transition(&mut shared, ApState::Enabling);
            (
                shared.config.ssid.clone(),
                shared.config.passphrase.clone(),
                shared.config.channel,
            )
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let accepted = inner
                .run_backend_op(inner.backend.start(&ssid_now, &passphrase_now, channel), "start")
                .await;
            inner.finish_enable(accepted).await;
        });
        true
    }

    /// Request the access point down. Disabled/Failed are already "down":
    /// the call is an accepted no-op with no backend call and no event.
    pub fn disable(&self) -> bool {
        {
            let mut shared = self.inner.lock_shared();
            match shared.state {
                ApState::Enabling | ApState::Disabling => {
                    debug!(state = %shared.state, "disable rejected: transition in flight");
                    return false;
                }
                ApState::Disabled | ApState::Failed => return true,
                ApState::Enabled => {}
            }
            self.inner.transition(&mut shared, ApState::Disabling);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let accepted = inner.run_backend_op(inner.backend.stop(), "stop").await;
            inner.finish_disable(accepted).await;
        });
        true
    }

    /// Merge a new desired configuration. Rejected while a transition is in
    /// flight; when currently Enabled the new values only take effect after
    /// an explicit disable/enable cycle.
    pub fn set_config(
        &self,
        ssid: Option<&str>,
        passphrase: Option<&str>,
        channel: Option<u8>,
    ) -> bool {
        let mut shared = self.inner.lock_shared();
        if shared.state.is_transitioning() {
            debug!(state = %shared.state, "config update rejected: transition in flight");
            return false;
        }
        shared.config.merge(ssid, passphrase);
        shared.config.merge_channel(channel);
        true
    }

    pub fn state(&self) -> ApState {
        self.inner.lock_shared().state
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == ApState::Enabled
    }

    /// Snapshot of the current desired configuration.
    pub fn config(&self) -> ApConfig {
        self.inner.lock_shared().config.clone()
    }

    /// Register an observer. Dropping the receiver unregisters it; only
    /// transitions after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.inner.events.subscribe()
    }

    /// Currently associated stations; 0 when not enabled or when the
    /// backend query fails.
    pub async fn station_count(&self) -> u32 {
        if !self.is_enabled() {
            return 0;
        }
        match self.inner.backend.connected_station_count().await {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "station count query failed");
                0
            }
        }
    }
}

impl Inner {
    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        // The lock is only held for field access, never across an await;
        // a poisoned lock means a panic mid-assignment, which cannot happen.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the new state and emit exactly one event while the lock is held,
    /// so no observer can see an event that lags the state.
    fn transition(&self, shared: &mut Shared, next: ApState) {
        info!(from = %shared.state, to = %next, ssid = %shared.config.ssid, "state transition");
        shared.state = next;
        let _ = self.events.send(StateChangeEvent {
            state: next,
            ssid: shared.config.ssid.clone(),
        });
    }

    /// Drive one backend call to completion under the operation timeout.
    /// `Err` and expiry both count as rejection.
    async fn run_backend_op(
        &self,
        op: impl std::future::Future<Output = crate::Result<bool>>,
        what: &str,
    ) -> bool {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                warn!(error = %e, "backend {} failed", what);
                false
            }
            Err(_) => {
                warn!(timeout = ?self.op_timeout, "backend {} timed out", what);
                false
            }
        }
    }

    /// Persist first, then transition: nobody can slip a new request in
    /// between because the state is still Enabling here.
    async fn finish_enable(&self, accepted: bool) {
        if accepted {
            let ssid = self.lock_shared().config.ssid.clone();
            self.store.save_ssid(&ssid).await;
            self.store.save_enabled(true).await;
        }
        let mut shared = self.lock_shared();
        let next = if accepted { ApState::Enabled } else { ApState::Failed };
        self.transition(&mut shared, next);
    }

    async fn finish_disable(&self, accepted: bool) {
        if accepted {
            self.store.save_enabled(false).await;
        }
        let mut shared = self.lock_shared();
        let next = if accepted { ApState::Disabled } else { ApState::Failed };
        self.transition(&mut shared, next);
    }
}
