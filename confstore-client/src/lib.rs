//! Client library for a remote configuration store organized into named,
//! versioned buckets of key/value data.
//!
//! The store is request/response HTTP; change notification is built on
//! long-polling. Each resolved bucket runs a refresh loop that keeps one
//! fetch in flight at all times and pushes lifecycle events (updated,
//! deleted, connected, disconnected) to registered listeners.

pub mod bucket;
pub mod config;

/// A live bucket plus the listener dispatch and refresh machinery.
pub mod dynamic;

pub mod error;

/// One long-poll fetch against the store's HTTP API.
pub mod fetch;

/// Process-wide cache of live buckets.
pub mod registry;

pub use bucket::{Bucket, Value};
pub use config::ClientConfig;
pub use dynamic::{BucketListener, DynamicBucket, ListenerId};
pub use error::{Error, Result};
pub use fetch::{BucketFetcher, FetchOutcome, HttpFetcher};
pub use registry::BucketRegistry;
