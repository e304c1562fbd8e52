//! File-backed blob store
//!
//! Durable key to bytes mapping used as the fallback tier behind an
//! in-memory blob cache. Keys are hashed into filesystem-safe names, and each
//! key may additionally carry an LZ4-compressed variant.

mod error;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use store::BlobStore;
pub use types::StoreUsage;
