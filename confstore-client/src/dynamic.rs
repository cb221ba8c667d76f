//! A live bucket: the latest committed snapshot for one bucket name, the
//! listeners interested in its lifecycle, and the refresh loop that keeps it
//! current by long-polling the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::bucket::{Bucket, Value};
use crate::error::Error;
use crate::fetch::{BucketFetcher, FetchOutcome};

/// Handle for one registered listener. Ids are handed out in increasing
/// order, so iterating the listener table visits listeners in registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Lifecycle callbacks for one bucket.
///
/// Dispatch runs synchronously on the bucket's refresh task, so
/// implementations must not block. `connected`/`disconnected` are
/// observational and default to no-ops.
pub trait BucketListener: Send + Sync {
    fn connected(&self, _name: &str) {}

    fn disconnected(&self, _name: &str) {}

    /// A newer bucket version was committed.
    fn updated(&self, old: &Bucket, new: &Bucket);

    /// The store no longer knows the bucket.
    fn deleted(&self, name: &str);
}

/// One bucket's live state. Shared via the registry; mutated only by the
/// bucket's own refresh loop.
pub struct DynamicBucket {
    name: String,
    current: RwLock<Arc<Bucket>>,
    listeners: Mutex<BTreeMap<ListenerId, Arc<dyn BucketListener>>>,
    next_listener_id: AtomicU64,
    dead: AtomicBool,
    connected: AtomicBool,
}

impl std::fmt::Debug for DynamicBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicBucket")
            .field("name", &self.name)
            .field("version", &self.current.read().version)
            .field("listeners", &self.listeners.lock().len())
            .field("dead", &self.dead.load(Ordering::Acquire))
            .field("connected", &self.connected.load(Ordering::Acquire))
            .finish()
    }
}

impl DynamicBucket {
    pub(crate) fn new(initial: Bucket) -> Self {
        DynamicBucket {
            name: initial.name.clone(),
            current: RwLock::new(Arc::new(initial)),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(0),
            dead: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// The latest committed key/value snapshot. Never blocks on an
    /// in-flight refresh.
    pub fn current_keys(&self) -> HashMap<String, Value> {
        self.current.read().keys.clone()
    }

    /// True once the store reported the bucket deleted. A dead bucket is
    /// re-created on its next resolution.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn add_listener(&self, listener: Arc<dyn BucketListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, listener);
        id
    }

    /// Removes a listener. Dispatch holds the listener table lock, so once
    /// this returns the listener is never invoked again.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn snapshot(&self) -> Arc<Bucket> {
        Arc::clone(&self.current.read())
    }

    /// Applies one fetch outcome. Returns false once the bucket is dead and
    /// its refresh loop should stop.
    pub(crate) fn apply(&self, outcome: FetchOutcome) -> bool {
        match outcome {
            FetchOutcome::Fresh(bucket) => {
                let old = {
                    let mut current = self.current.write();
                    if bucket.version <= current.version {
                        warn!(
                            bucket = %self.name,
                            held = current.version,
                            got = bucket.version,
                            "Ignoring bucket payload with a non-advancing version"
                        );
                        return true;
                    }
                    std::mem::replace(&mut *current, Arc::new(bucket))
                };
                let new = self.snapshot();
                trace!(
                    bucket = %self.name,
                    old_version = old.version,
                    new_version = new.version,
                    "Committed bucket update"
                );
                for listener in self.listeners.lock().values() {
                    listener.updated(&old, &new);
                }
                true
            }
            FetchOutcome::NotModified => true,
            FetchOutcome::Deleted => {
                self.dead.store(true, Ordering::Release);
                info!(bucket = %self.name, "Bucket deleted by the store");
                for listener in self.listeners.lock().values() {
                    listener.deleted(&self.name);
                }
                false
            }
        }
    }

    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(bucket = %self.name, "Reconnected to the store");
            for listener in self.listeners.lock().values() {
                listener.connected(&self.name);
            }
        }
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            for listener in self.listeners.lock().values() {
                listener.disconnected(&self.name);
            }
        }
    }
}

/// Continuous refresh for one bucket: exactly one fetch in flight at a time,
/// re-issued after every completion until the bucket is deleted or the token
/// is cancelled. Long-poll timeouts and transient failures are retried
/// indefinitely after `retry_interval`.
pub(crate) async fn refresh_loop(
    bucket: Arc<DynamicBucket>,
    fetcher: Arc<dyn BucketFetcher>,
    retry_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let version = bucket.version();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!(bucket = bucket.name(), "Cancellation token triggered. Stopping bucket refresh.");
                return;
            }
            outcome = fetcher.fetch(bucket.name(), version) => outcome,
        };

        let delay = match outcome {
            Ok(FetchOutcome::NotModified) => {
                // The long-poll window elapsed without a change; expected.
                bucket.mark_connected();
                retry_interval
            }
            Ok(outcome) => {
                bucket.mark_connected();
                if !bucket.apply(outcome) {
                    return;
                }
                continue;
            }
            Err(Error::Decode(e)) => {
                warn!(bucket = bucket.name(), %e, "Undecodable store payload. Will retry after a delay");
                retry_interval
            }
            Err(e) => {
                warn!(bucket = bucket.name(), %e, "Bucket fetch failed. Will retry after a delay");
                bucket.mark_disconnected();
                retry_interval
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
