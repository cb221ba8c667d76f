use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Connection Error - {0}")]
    Connection(String),

    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Bucket {0} not found")]
    BucketNotFound(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Internal Error - {0}")]
    Internal(String),
}
