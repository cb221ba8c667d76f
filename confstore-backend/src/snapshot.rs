//! Flattens bucket contents into the single string-keyed map handed to the
//! templating host.

use std::collections::HashMap;

use tracing::warn;

use confstore_client::Value;
use confstore_client::registry::BucketRegistry;

use crate::error::{Error, SnapshotError};

/// Key selecting every key of a bucket.
const WILDCARD: &str = "*";

/// One parsed `bucket[,bucket...]/key` request.
struct KeyRequest<'a> {
    buckets: Vec<&'a str>,
    key: &'a str,
}

fn parse_key(raw: &str) -> Result<KeyRequest<'_>, Error> {
    let trimmed = raw.strip_prefix('/').unwrap_or(raw);
    let (buckets, key) = trimmed.split_once('/').ok_or_else(|| {
        Error::InvalidKey(format!("{raw} is not of the form bucket[,bucket...]/key"))
    })?;

    Ok(KeyRequest {
        buckets: buckets.split(',').map(str::trim).collect(),
        key,
    })
}

/// Resolves every bucket named by `keys` and flattens the requested values,
/// left to right, later buckets overwriting earlier ones on key collision.
/// A missing key is skipped; a bucket that fails to resolve aborts the whole
/// call with whatever was already written.
pub(crate) async fn build(
    registry: &BucketRegistry,
    keys: &[String],
) -> Result<HashMap<String, String>, SnapshotError> {
    let mut vars = HashMap::new();

    for raw in keys {
        let request = match parse_key(raw) {
            Ok(request) => request,
            Err(e) => return Err(SnapshotError::new(vars, e)),
        };

        // Resolve every named bucket before reading any of them.
        let mut buckets = Vec::with_capacity(request.buckets.len());
        for name in &request.buckets {
            match registry.resolve(name).await {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => return Err(SnapshotError::new(vars, e.into())),
            }
        }

        for bucket in buckets {
            let keys = bucket.current_keys();
            if request.key == WILDCARD {
                for (key, value) in &keys {
                    if let Some(rendered) = render(value) {
                        vars.insert(key.clone(), rendered);
                    }
                }
            } else if let Some(value) = keys.get(request.key) {
                if let Some(rendered) = render(value) {
                    vars.insert(request.key.to_string(), rendered);
                }
            }
        }
    }

    Ok(vars)
}

/// Coerces a bucket value to the string form the templating host consumes.
fn render(value: &Value) -> Option<String> {
    match value {
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::List(items) => match serde_json::to_string(items) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(%e, "Failed encoding list value as JSON");
                None
            }
        },
    }
}
