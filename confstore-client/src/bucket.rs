//! In-memory model of a bucket: a named, versioned set of configuration
//! key/value pairs as returned by the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single configuration value. The store only ever hands out these five
/// shapes; lists may nest any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

/// Immutable snapshot of one bucket's contents at a single version.
///
/// Versions are monotonically increasing per bucket name. A payload whose
/// version is not strictly greater than one already held never replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub version: u64,
    #[serde(default)]
    pub keys: HashMap<String, Value>,
}
