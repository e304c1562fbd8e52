//! Error types for the blob store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Io(Box<std::io::Error>),
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::Corrupt(msg) => write!(f, "Corrupt blob: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<lz4_flex::block::DecompressError> for StoreError {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
