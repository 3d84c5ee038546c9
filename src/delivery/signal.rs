//! One-shot initialization rendezvous.
//!
//! The poll loop waits here until the first successful handshake. Firing is
//! idempotent and a fired signal never blocks again.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct InitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for InitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl InitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Release all waiters. Returns `true` only for the first call.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}
