//! Shared fakes for unit tests

use crate::error::LoadError;
use crate::loader::BlobLoader;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Loader returning `payload` (or failing) and counting calls
pub(crate) struct CountingLoader {
    pub payload: Vec<u8>,
    pub fail: bool,
    calls: AtomicUsize,
}

impl CountingLoader {
    pub fn returning(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            payload: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobLoader for CountingLoader {
    async fn load(&self, key: &str) -> Result<Vec<u8>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(format!("upstream unavailable for {}", key).into());
        }
        Ok(self.payload.clone())
    }
}

/// Loader that never resolves, for cancellation tests
pub(crate) struct PendingLoader;

#[async_trait]
impl BlobLoader for PendingLoader {
    async fn load(&self, _key: &str) -> Result<Vec<u8>, LoadError> {
        futures::future::pending().await
    }
}
