//! Backend for a templating host on top of a bucketed remote configuration
//! store.
//!
//! The host speaks two operations: [StoreClient::get_values] flattens the
//! current contents of one or more buckets into a single string-keyed map,
//! and [StoreClient::watch_prefix] blocks until any of a named set of
//! buckets changes, returning a monotonically increasing wait index. Both
//! address buckets with the `bucket[,bucket...]/key` syntax.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use confstore_client::fetch::HttpFetcher;
use confstore_client::registry::BucketRegistry;

pub mod error;

/// Flattens bucket contents into the host's string-keyed map.
mod snapshot;

/// The blocking, cancellable wait for bucket changes.
mod watch;

#[cfg(test)]
mod test_support;

pub use confstore_client::ClientConfig;
pub use error::{Error, Result, SnapshotError};

/// Client handed to the templating host.
///
/// Owns the process-wide bucket registry; every `get_values` and
/// `watch_prefix` call resolves bucket names through it, so all callers
/// share one live bucket per name.
pub struct StoreClient {
    registry: BucketRegistry,
}

impl StoreClient {
    pub fn new(config: ClientConfig) -> Result<StoreClient> {
        let retry_interval = config.retry_interval;
        let fetcher = Arc::new(HttpFetcher::new(&config).map_err(Error::Store)?);
        Ok(StoreClient {
            registry: BucketRegistry::new(fetcher, retry_interval),
        })
    }

    /// Flattens the values named by `keys` into a single map.
    ///
    /// Each key has the form `bucket[,bucket...]/key`, where `*` selects
    /// every key of a bucket. Later buckets overwrite earlier ones on
    /// collision; a missing key is skipped. On failure the error carries
    /// whatever values were flattened before it.
    pub async fn get_values(
        &self,
        keys: &[String],
    ) -> std::result::Result<HashMap<String, String>, SnapshotError> {
        snapshot::build(&self.registry, keys).await
    }

    /// Blocks until any bucket named in `prefix` changes, any is deleted,
    /// or `cancel` fires.
    ///
    /// `prefix` uses the same comma-separated bucket syntax as `get_values`;
    /// a trailing `/key` portion is ignored. A `wait_index` of 0 returns 1
    /// immediately to establish a starting point; cancellation returns 0
    /// with no error; a deletion is reported as [Error::BucketDeleted].
    pub async fn watch_prefix(
        &self,
        prefix: &str,
        wait_index: u64,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let names = parse_prefix(prefix);
        watch::watch(&self.registry, &names, wait_index, cancel).await
    }

    /// Stops every background refresh. Snapshot reads keep serving the last
    /// committed state.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

/// Extracts the bucket names from a watch prefix, dropping any key portion.
fn parse_prefix(prefix: &str) -> Vec<&str> {
    let trimmed = prefix.strip_prefix('/').unwrap_or(prefix);
    let buckets = trimmed.split('/').next().unwrap_or(trimmed);
    buckets.split(',').map(str::trim).collect()
}
