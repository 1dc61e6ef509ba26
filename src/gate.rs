//! Readiness gate and session key: the two single-value cells shared between
//! the front-end, the control channel and the audio channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::Notify;

/// Latch flipped once the voice destination has been joined.
///
/// Monotonic: there is no reset, a new gate is built for every process
/// lifetime. Setting it again is a no-op.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    ready: AtomicBool,
    changed: Notify,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate. Returns `true` only for the call that actually flipped it.
    pub fn set(&self) -> bool {
        let first = !self.ready.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!("Readiness gate opened");
        }
        self.changed.notify_waiters();
        first
    }

    pub fn is_set(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Resolves on the next `set` call. Pollers combine this with a timeout,
    /// they never wait on it unbounded.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

/// Protocol-level credential issued by the control endpoint's `hello`.
///
/// Written by the control channel on every handshake, read by the audio
/// channel right before it connects.
#[derive(Debug, Default)]
pub struct SessionKey {
    key: RwLock<Option<String>>,
    changed: Notify,
}

impl SessionKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>) {
        let key = key.into();
        *self.key.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(key);
        self.changed.notify_waiters();
    }

    /// The current key, if one has been issued and it is non-empty.
    pub fn get(&self) -> Option<String> {
        self.key
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .filter(|key| !key.is_empty())
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
