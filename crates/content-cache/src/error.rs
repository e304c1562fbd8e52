//! Error types for the content cache
//!
//! Disk failures never appear here: they are absorbed at the persistent tier
//! boundary and surface as misses.

use std::fmt;

/// Error returned by a [`crate::BlobLoader`]
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum CacheError {
    /// The loader could not produce a value after a full miss
    Fetch(LoadError),
    /// A value handed to the structured tier could not be serialized
    Serialization(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Fetch(err) => write!(f, "Fetch error: {}", err),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Fetch(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
