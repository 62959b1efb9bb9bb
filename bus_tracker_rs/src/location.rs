//! Location source seam.
//!
//! A source registers a subscription with the platform provider and pushes
//! fixes into a [`FixSink`]. Fixes travel to the session worker over a
//! bounded channel tagged with the subscription id, so a late fix from a
//! cancelled subscription can be recognised and dropped.

use crate::config::LocationRequest;
use crate::error::Result;
use crate::fix::LocationFix;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Proof of a registered subscription, returned by [`LocationSource::subscribe`]
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn new(id: SubscriptionId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// A fix together with the subscription that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcedFix {
    pub subscription: SubscriptionId,
    pub fix: LocationFix,
}

/// Callback end of a subscription
#[derive(Debug, Clone)]
pub struct FixSink {
    subscription: SubscriptionId,
    tx: Sender<SourcedFix>,
    dropped: Arc<AtomicU64>,
}

impl FixSink {
    pub fn new(subscription: SubscriptionId, tx: Sender<SourcedFix>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            subscription,
            tx,
            dropped,
        }
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Forward one fix. Returns `false` once the worker is gone.
    pub fn deliver(&self, fix: LocationFix) -> bool {
        match self.tx.try_send(SourcedFix {
            subscription: self.subscription,
            fix,
        }) {
            Ok(_) => true,
            Err(TrySendError::Full(_)) => {
                // Worker is behind, drop this fix
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("[{}] fix queue full, dropping fix", self.subscription);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Forward a provider batch; only the most recent fix is kept
    pub fn deliver_batch(&self, batch: &[LocationFix]) -> bool {
        match batch.last() {
            Some(fix) => self.deliver(*fix),
            None => true,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Platform location provider
pub trait LocationSource: Send + Sync {
    /// Register for updates. Fails with `PermissionDenied` when the runtime
    /// location permission is missing.
    fn subscribe(&self, request: &LocationRequest, sink: FixSink) -> Result<SubscriptionHandle>;

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sink(capacity: usize) -> (FixSink, mpsc::Receiver<SourcedFix>, Arc<AtomicU64>) {
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (FixSink::new(SubscriptionId(7), tx, dropped.clone()), rx, dropped)
    }

    #[test]
    fn test_batch_keeps_last_fix() {
        let (sink, mut rx, _) = sink(4);
        let batch = [
            LocationFix::new(1.0, 1.0, 0.0, 1),
            LocationFix::new(2.0, 2.0, 0.0, 2),
            LocationFix::new(3.0, 3.0, 0.0, 3),
        ];

        assert!(sink.deliver_batch(&batch));

        let got = rx.try_recv().unwrap();
        assert_eq!(got.subscription, SubscriptionId(7));
        assert_eq!(got.fix.captured_at_ms, 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_batch_is_ignored() {
        let (sink, mut rx, _) = sink(4);
        assert!(sink.deliver_batch(&[]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (sink, _rx, dropped) = sink(1);
        assert!(sink.deliver(LocationFix::new(1.0, 1.0, 0.0, 1)));
        assert!(sink.deliver(LocationFix::new(2.0, 2.0, 0.0, 2)));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_closed_worker_reports_false() {
        let (sink, rx, _) = sink(1);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(LocationFix::new(1.0, 1.0, 0.0, 1)));
    }
}
