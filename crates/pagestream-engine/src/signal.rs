//! The latest-wins access signal feeding the planners.
//!
//! Every consumer read of a snapshot position lands here; the component
//! schedulers drain the signal with a debounce, so only the newest key
//! within the debounce window triggers planning.

use std::sync::Arc;

use tokio::sync::watch;

/// A single-slot, latest-wins channel of access keys.
///
/// Cloning is cheap and every clone feeds the same slot. Offers never
/// block and never fail; if no scheduler is listening anymore the value is
/// simply dropped.
#[derive(Clone)]
pub struct AccessSignal {
    tx: Arc<watch::Sender<Option<i64>>>,
}

impl AccessSignal {
    /// Create an empty signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record an access to `key`, replacing any not-yet-drained value.
    pub fn offer(&self, key: i64) {
        self.tx.send_replace(Some(key));
    }

    /// Subscribe a scheduler to the signal.
    pub fn subscribe(&self) -> watch::Receiver<Option<i64>> {
        self.tx.subscribe()
    }
}

impl Default for AccessSignal {
    fn default() -> Self {
        Self::new()
    }
}
