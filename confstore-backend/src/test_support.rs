//! Shared fixtures for the backend tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use confstore_client::fetch::{BucketFetcher, FetchOutcome};
use confstore_client::{Bucket, Result, Value};

pub(crate) fn bucket(name: &str, version: u64, keys: &[(&str, Value)]) -> Bucket {
    Bucket {
        name: name.to_string(),
        version,
        keys: keys
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
    }
}

/// Replays a per-bucket script of fetch outcomes, then leaves the long-poll
/// hanging forever. An optional delay before each outcome lets a test attach
/// listeners before the refresh loop delivers events.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<FetchOutcome>>>>,
    fetches: AtomicU64,
    delay: Duration,
}

impl ScriptedFetcher {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        ScriptedFetcher {
            delay,
            ..Default::default()
        }
    }

    pub(crate) fn script(&self, name: &str, outcomes: Vec<Result<FetchOutcome>>) {
        self.scripts.lock().insert(name.to_string(), outcomes.into());
    }

    pub(crate) fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketFetcher for ScriptedFetcher {
    async fn fetch(&self, name: &str, _current_version: u64) -> Result<FetchOutcome> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
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
