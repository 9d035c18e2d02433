use crate::Result;
use crate::traits::ApControlBackend;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// A mock backend for tests and local development.
/// It simulates the radio without any hardware interaction: failures can be
/// injected, `start` can be held in flight, and every call is recorded.
#[derive(Debug, Default)]
pub struct MockBackend {
    running: AtomicBool,
    stations: AtomicU32,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    start_gate: Mutex<Option<Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` calls report rejection.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make the next `stop` calls report rejection.
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_stations(&self, count: u32) {
        self.stations.store(count, Ordering::SeqCst);
    }

    /// Hold every subsequent `start` call until the returned handle is
    /// notified. Lets tests observe the in-flight window.
    pub fn hold_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release_start(&self) {
        *self.start_gate.lock().unwrap() = None;
    }

    /// Recorded calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ApControlBackend for MockBackend {
    async fn start(&self, ssid: &str, passphrase: &str, channel: u8) -> Result<bool> {
        info!("🤖 [mock] start ssid={} channel={}", ssid, channel);
        self.record(format!("start:{}:{}:{}", ssid, passphrase, channel));
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn stop(&self) -> Result<bool> {
        info!("🤖 [mock] stop");
        self.record("stop".to_string());
        if self.fail_stop.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.running.store(false, Ordering::SeqCst);
        self.stations.store(0, Ordering::SeqCst);
        Ok(true)
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn connected_station_count(&self) -> Result<u32> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(0);
        }
        Ok(self.stations.load(Ordering::SeqCst))
    }
}
