//! Hand-off channel between the dispatcher's workers and the collector.
//!
//! Many producers, exactly one consumer. `emit` waits for a free slot,
//! so a slow collector slows the workers down and with them the
//! dispatcher's per-tick join. No ordering is guaranteed across
//! producers.

use tokio::sync::mpsc;

use crate::error::FunnelClosed;
use crate::schema::Sample;

/// Producer side, cloned into every worker.
#[derive(Clone)]
pub struct FunnelSender {
    tx: mpsc::Sender<Sample>,
}

/// Consumer side, owned by the collector task.
pub struct FunnelReceiver {
    rx: mpsc::Receiver<Sample>,
}

/// Creates a funnel with `capacity` in-flight slots (at least one).
pub fn channel(capacity: usize) -> (FunnelSender, FunnelReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FunnelSender { tx }, FunnelReceiver { rx })
}

impl FunnelSender {
    pub async fn emit(&self, sample: Sample) -> Result<(), FunnelClosed> {
        self.tx.send(sample).await.map_err(|_| FunnelClosed)
    }
}

impl FunnelReceiver {
    /// Next sample, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Sample> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Brand;
    use std::collections::HashMap;
    use std::time::Duration;

    fn sample() -> Sample {
        Sample::new(Brand::Shell, "A".into(), "1,2".into(), HashMap::new())
    }

    #[tokio::test]
    async fn emit_waits_for_the_collector() {
        let (tx, mut rx) = channel(1);

        tx.emit(sample()).await.unwrap();

        // Slot is taken: the second emit must not complete until we receive.
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.emit(sample())).await;
        assert!(blocked.is_err());

        assert!(rx.recv().await.is_some());
        tx.emit(sample()).await.unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn receiver_sees_end_when_senders_drop() {
        let (tx, mut rx) = channel(4);
        let second = tx.clone();

        second.emit(sample()).await.unwrap();
        drop(tx);
        drop(second);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn emit_after_collector_drop_fails() {
        let (tx, rx) = channel(1);
        drop(rx);
        assert!(tx.emit(sample()).await.is_err());
    }
}
