//! Full-miss fallback supplied by the network layer

use crate::error::LoadError;
use async_trait::async_trait;

/// Fetches the bytes for a blob key (usually a URL) after every tier missed.
///
/// Dropping the returned future cancels the load; the cache stores nothing
/// for a load that did not complete.
#[async_trait]
pub trait BlobLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Vec<u8>, LoadError>;
}
