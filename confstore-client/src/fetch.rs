//! Long-poll fetch against the remote store. One call performs one request;
//! the store holds a watch request open until the bucket changes or its own
//! timeout elapses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

use crate::bucket::Bucket;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Header carrying the last version the caller observed.
pub const VERSION_HEADER: &str = "X-Confstore-Version";

/// Error envelope `type` values the store is known to emit.
const TYPE_DELETED: &str = "deleted";
const TYPE_NOT_MODIFIED: &str = "not-modified";

/// Slack added on top of the store's long-poll window so the client does not
/// abort a request the store is still entitled to hold open.
const LONG_POLL_SLACK: Duration = Duration::from_secs(5);

/// Outcome of a single fetch. Transport and decode failures are reported
/// through the `Result` error channel instead.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A bucket payload with a version strictly greater than the one the
    /// caller passed in (or any version, for an initial fetch at version 0).
    Fresh(Bucket),
    /// The long-poll window elapsed without a change.
    NotModified,
    /// The store no longer knows the bucket.
    Deleted,
}

/// Body the store returns in place of a bucket payload.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
pub trait BucketFetcher: Send + Sync {
    /// Performs one long-poll fetch for `name`.
    ///
    /// `current_version` must be the version the caller last observed; 0
    /// means no prior version, in which case the store answers immediately
    /// with whatever exists.
    async fn fetch(&self, name: &str, current_version: u64) -> Result<FetchOutcome>;
}

/// [BucketFetcher] backed by the store's HTTP API.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.long_poll_timeout + LONG_POLL_SLACK)
            .build()
            .map_err(|e| Error::Connection(format!("Building HTTP client: {e}")))?;

        Ok(HttpFetcher {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl BucketFetcher for HttpFetcher {
    async fn fetch(&self, name: &str, current_version: u64) -> Result<FetchOutcome> {
        let url = format!("{}/v1/buckets/{name}", self.base_url);

        let mut request = self.client.get(&url);
        if current_version > 0 {
            request = request
                .query(&[("watch", "true")])
                .header(VERSION_HEADER, current_version.to_string());
        }
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Fetching bucket {name}: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Connection(format!("Reading bucket {name} response: {e}")))?;

        decode_response(name, current_version, status, &body)
    }
}

/// Classifies one store response.
///
/// The status code alone is not trusted: any body that decodes as a valid
/// bucket is a bucket, anything else must decode as a recognized error
/// envelope, and the rest is an internal error.
fn decode_response(
    name: &str,
    current_version: u64,
    status: StatusCode,
    body: &[u8],
) -> Result<FetchOutcome> {
    if status == StatusCode::NOT_FOUND {
        // Deletion comes back as a 404 with an envelope; the envelope is
        // informational only.
        if let Err(e) = serde_json::from_slice::<ErrorEnvelope>(body) {
            warn!(bucket = name, %e, "Undecodable envelope on a 404 response");
        }
        return Ok(FetchOutcome::Deleted);
    }

    if status == StatusCode::NOT_MODIFIED {
        return Ok(FetchOutcome::NotModified);
    }

    if let Ok(bucket) = serde_json::from_slice::<Bucket>(body) {
        if !bucket.name.is_empty() {
            if current_version == 0 || bucket.version > current_version {
                return Ok(FetchOutcome::Fresh(bucket));
            }
            return Err(Error::Internal(format!(
                "Bucket {name} version did not advance: held {current_version}, got {}",
                bucket.version
            )));
        }
    }

    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error_type.as_str() {
            TYPE_DELETED => Ok(FetchOutcome::Deleted),
            TYPE_NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            other => Err(Error::Internal(format!(
                "Unrecognized error type {other} for bucket {name}: {}",
                envelope.message
            ))),
        },
        Err(e) => Err(Error::Decode(format!("Bucket {name} payload: {e}"))),
    }
}
