//! Process-wide cache of live buckets, keyed by name. The registry is owned
//! state with an explicit lifecycle: a bucket is created on first
//! resolution, shared by every caller while it lives, and re-created on the
//! resolution after the store deletes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dynamic::{DynamicBucket, refresh_loop};
use crate::error::{Error, Result};
use crate::fetch::{BucketFetcher, FetchOutcome};

pub struct BucketRegistry {
    fetcher: Arc<dyn BucketFetcher>,
    buckets: Mutex<HashMap<String, Arc<DynamicBucket>>>,
    retry_interval: Duration,
    cancel: CancellationToken,
}

impl BucketRegistry {
    pub fn new(fetcher: Arc<dyn BucketFetcher>, retry_interval: Duration) -> Self {
        BucketRegistry {
            fetcher,
            buckets: Mutex::new(HashMap::new()),
            retry_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolves a bucket name to its shared [DynamicBucket].
    ///
    /// Idempotent for a live bucket: every caller gets the same instance.
    /// The first resolution fetches the bucket at version 0 and spawns its
    /// refresh loop; a failure is propagated and nothing is cached.
    pub async fn resolve(&self, name: &str) -> Result<Arc<DynamicBucket>> {
        let mut buckets = self.buckets.lock().await;

        if let Some(bucket) = buckets.get(name) {
            if !bucket.is_dead() {
                return Ok(Arc::clone(bucket));
            }
            // A deleted bucket stays in the table until the next resolution
            // replaces it.
            buckets.remove(name);
        }

        let initial = match self.fetcher.fetch(name, 0).await? {
            FetchOutcome::Fresh(bucket) => bucket,
            FetchOutcome::Deleted => return Err(Error::BucketNotFound(name.to_string())),
            FetchOutcome::NotModified => {
                // A version-0 fetch must be answered with a full bucket.
                return Err(Error::Internal(format!(
                    "Store returned not-modified for the initial fetch of bucket {name}"
                )));
            }
        };

        let bucket = Arc::new(DynamicBucket::new(initial));
        buckets.insert(name.to_string(), Arc::clone(&bucket));
        tokio::spawn(refresh_loop(
            Arc::clone(&bucket),
            Arc::clone(&self.fetcher),
            self.retry_interval,
            self.cancel.child_token(),
        ));

        info!(bucket = name, version = bucket.version(), "Created dynamic bucket");
        Ok(bucket)
    }

    /// Stops every refresh loop. Already-resolved buckets keep serving their
    /// last committed snapshot.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{Bucket, Value};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn bucket(name: &str, version: u64) -> Bucket {
        Bucket {
            name: name.to_string(),
            version,
            keys: HashMap::from([("tier".to_string(), Value::String("gold".to_string()))]),
        }
    }

    /// Replays a per-bucket script of outcomes, then leaves the long-poll
    /// hanging forever.
    #[derive(Default)]
    struct ScriptedFetcher {
        scripts: parking_lot::Mutex<HashMap<String, VecDeque<Result<FetchOutcome>>>>,
        fetches: AtomicU64,
    }

    impl ScriptedFetcher {
        fn script(&self, name: &str, outcomes: Vec<Result<FetchOutcome>>) {
            self.scripts
                .lock()
                .insert(name.to_string(), outcomes.into());
        }

        fn fetches(&self) -> u64 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BucketFetcher for ScriptedFetcher {
        async fn fetch(&self, name: &str, _current_version: u64) -> Result<FetchOutcome> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = self
                .scripts
                .lock()
                .get_mut(name)
                .and_then(VecDeque::pop_front);
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_resolve_returns_shared_instance() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script("app", vec![Ok(FetchOutcome::Fresh(bucket("app", 1)))]);
        let registry = BucketRegistry::new(
            Arc::clone(&fetcher) as Arc<dyn BucketFetcher>,
            Duration::from_millis(10),
        );

        let first = registry.resolve("app").await.unwrap();
        let second = registry.resolve("app").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.version(), 1);
    }

    #[tokio::test]
    async fn test_resolve_propagates_fetch_errors() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(
            "app",
            vec![Err(Error::Connection("connection refused".to_string()))],
        );
        let registry = BucketRegistry::new(
            Arc::clone(&fetcher) as Arc<dyn BucketFetcher>,
            Duration::from_millis(10),
        );

        let result = registry.resolve("app").await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_resolve_missing_bucket() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script("app", vec![Ok(FetchOutcome::Deleted)]);
        let registry = BucketRegistry::new(
            Arc::clone(&fetcher) as Arc<dyn BucketFetcher>,
            Duration::from_millis(10),
        );

        let result = registry.resolve("app").await;
        assert!(matches!(result, Err(Error::BucketNotFound(_))));
    }

    #[tokio::test]
    async fn test_dead_bucket_is_recreated() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(
            "app",
            vec![
                Ok(FetchOutcome::Fresh(bucket("app", 1))),
                Ok(FetchOutcome::Deleted),
            ],
        );
        let registry = BucketRegistry::new(
            Arc::clone(&fetcher) as Arc<dyn BucketFetcher>,
            Duration::from_millis(10),
        );

        let first = registry.resolve("app").await.unwrap();

        // Wait for the refresh loop to observe the deletion.
        tokio::time::timeout(Duration::from_secs(1), async {
            while !first.is_dead() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bucket never died");

        fetcher.script("app", vec![Ok(FetchOutcome::Fresh(bucket("app", 1)))]);
        let second = registry.resolve("app").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_dead());
    }

    #[tokio::test]
    async fn test_refresh_commits_newer_versions() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(
            "app",
            vec![
                Ok(FetchOutcome::Fresh(bucket("app", 1))),
                Ok(FetchOutcome::Fresh(bucket("app", 2))),
                Ok(FetchOutcome::Fresh(bucket("app", 5))),
            ],
        );
        let registry = BucketRegistry::new(
            Arc::clone(&fetcher) as Arc<dyn BucketFetcher>,
            Duration::from_millis(10),
        );

        let dynamic = registry.resolve("app").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while dynamic.version() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("refresh never reached version 5");
    }

    #[tokio::test]
    async fn test_shutdown_stops_refresh() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script("app", vec![Ok(FetchOutcome::Fresh(bucket("app", 1)))]);
        let registry = BucketRegistry::new(
            Arc::clone(&fetcher) as Arc<dyn BucketFetcher>,
            Duration::from_millis(10),
        );

        let dynamic = registry.resolve("app").await.unwrap();
        registry.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fetches_after_shutdown = fetcher.fetches();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fetcher.fetches(), fetches_after_shutdown);
        assert_eq!(dynamic.version(), 1);
    }
}
