use std::collections::HashMap;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Invalid Key - {0}")]
    InvalidKey(String),

    #[error("Bucket {0} was deleted")]
    BucketDeleted(String),

    #[error("Store Error - {0}")]
    Store(confstore_client::Error),

    #[error("Internal Error - {0}")]
    Internal(String),
}

impl From<confstore_client::Error> for Error {
    fn from(value: confstore_client::Error) -> Self {
        Error::Store(value)
    }
}

/// A snapshot request that failed part-way through. Carries whatever values
/// were already flattened so the caller can still use them.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct SnapshotError {
    partial: HashMap<String, String>,
    #[source]
    source: Error,
}

impl SnapshotError {
    pub(crate) fn new(partial: HashMap<String, String>, source: Error) -> Self {
        SnapshotError { partial, source }
    }

    /// The values flattened before the failure.
    pub fn partial(&self) -> &HashMap<String, String> {
        &self.partial
    }

    pub fn into_parts(self) -> (HashMap<String, String>, Error) {
        (self.partial, self.source)
    }
}
