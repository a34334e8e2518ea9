//! Single-slot, overwrite-on-publish hand-off from the sampler to the delivery loop

use std::time::Duration;

use solarstation_shared::Snapshot;
use tokio::sync::watch;

/// Create the publisher/consumer pair
pub fn snapshot_channel() -> (SnapshotPublisher, SnapshotConsumer) {
    let (tx, rx) = watch::channel(None);
    (SnapshotPublisher { tx }, SnapshotConsumer { rx })
}

/// Writer side; publishing never blocks and never fails
pub struct SnapshotPublisher {
    tx: watch::Sender<Option<Snapshot>>,
}

impl SnapshotPublisher {
    /// Replace any snapshot not yet consumed
    pub fn publish(&self, snapshot: Snapshot) {
        self.tx.send_replace(Some(snapshot));
    }
}

/// Reader side
pub struct SnapshotConsumer {
    rx: watch::Receiver<Option<Snapshot>>,
}

impl SnapshotConsumer {
    /// Wait up to `wait` for a snapshot published since the last consume
    pub async fn try_consume(&mut self, wait: Duration) -> Option<Snapshot> {
        match tokio::time::timeout(wait, self.rx.changed()).await {
            Ok(Ok(())) => *self.rx.borrow_and_update(),
            // Publisher gone or nothing new in time
            Ok(Err(_)) | Err(_) => None,
        }
    }
}
