//! Blocking, cancellable wait for a change in any of a set of buckets.
//!
//! Each wait owns one short-lived listener whose only job is to convert the
//! push-style bucket events into a single consumable outcome. The listener
//! never outlives the wait that created it: it is detached from every bucket
//! on every exit path.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use confstore_client::Bucket;
use confstore_client::dynamic::{BucketListener, DynamicBucket, ListenerId};
use confstore_client::registry::BucketRegistry;

use crate::error::{Error, Result};

/// Single-use listener shared by every bucket of one wait.
///
/// The outcome channel is buffered to the number of watched buckets, so a
/// dispatching bucket never blocks: once the first outcome is consumed and
/// the listener detached, later sends land in the buffer and are dropped
/// with it.
struct WatchListener {
    outcome_tx: mpsc::Sender<Result<u64>>,
    baseline: u64,
}

impl WatchListener {
    fn post(&self, outcome: Result<u64>) {
        if let Err(e) = self.outcome_tx.try_send(outcome) {
            // The wait already has its outcome; this event is redundant.
            trace!(%e, "Dropping watch event");
        }
    }
}

impl BucketListener for WatchListener {
    fn connected(&self, name: &str) {
        info!(bucket = name, "Connected");
    }

    fn disconnected(&self, name: &str) {
        info!(bucket = name, "Disconnected");
    }

    fn updated(&self, _old: &Bucket, new: &Bucket) {
        trace!(version = new.version, "Watched bucket updated");
        let outcome = match self.baseline.checked_add(1) {
            Some(next) => Ok(next),
            None => Err(Error::Internal(format!(
                "Wait index {} cannot advance",
                self.baseline
            ))),
        };
        self.post(outcome);
    }

    fn deleted(&self, name: &str) {
        self.post(Err(Error::BucketDeleted(name.to_string())));
    }
}

/// Blocks until any of `names` changes, any is deleted, or `cancel` fires.
///
/// A `baseline` of 0 means the caller has no prior state: the wait returns
/// index 1 immediately, without touching the store, to establish a starting
/// point. Cancellation returns index 0 and is not an error. After an update
/// the caller re-enters with the returned index; the wait never loops
/// internally.
pub(crate) async fn watch(
    registry: &BucketRegistry,
    names: &[&str],
    baseline: u64,
    cancel: CancellationToken,
) -> Result<u64> {
    if baseline == 0 {
        return Ok(1);
    }

    let mut buckets = Vec::with_capacity(names.len());
    for name in names {
        buckets.push(registry.resolve(name).await?);
    }

    let (outcome_tx, mut outcome_rx) = mpsc::channel(buckets.len().max(1));
    let listener: Arc<dyn BucketListener> = Arc::new(WatchListener {
        outcome_tx,
        baseline,
    });

    let attached: Vec<(&Arc<DynamicBucket>, ListenerId)> = buckets
        .iter()
        .map(|bucket| (bucket, bucket.add_listener(Arc::clone(&listener))))
        .collect();

    let outcome = tokio::select! {
        outcome = outcome_rx.recv() => match outcome {
            Some(outcome) => outcome,
            // Unreachable while the listener is attached; the sender lives
            // inside it.
            None => Err(Error::Internal("Watch outcome channel closed".to_string())),
        },
        _ = cancel.cancelled() => {
            info!(?names, "Watch cancelled by the caller");
            Ok(0)
        }
    };

    for (bucket, id) in attached {
        bucket.remove_listener(id);
    }

    outcome
}
