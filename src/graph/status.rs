use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::descriptor::Descriptor;

/// A one-shot completion signal. Closing is idempotent; waiters that arrive
/// after the close return immediately.
pub(crate) struct Latch {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Latch {
    fn new() -> Arc<Latch> {
        let (tx, rx) = watch::channel(false);
        Arc::new(Latch { tx, rx })
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.send(true);
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Coordinates at-most-once work per descriptor across the workers of one
/// copy. The first `try_commit` wins ownership; later callers receive the
/// winner's latch to wait on.
#[derive(Default)]
pub(crate) struct StatusTracker {
    statuses: Mutex<HashMap<(String, u64, String), Arc<Latch>>>,
}

impl StatusTracker {
    pub(crate) fn new() -> StatusTracker {
        StatusTracker::default()
    }

    pub(crate) fn try_commit(&self, node: &Descriptor) -> (Arc<Latch>, bool) {
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get(&node.content_key()) {
            Some(latch) => (latch.clone(), false),
            None => {
                let latch = Latch::new();
                statuses.insert(node.content_key(), latch.clone());
                (latch, true)
            }
        }
    }
}
