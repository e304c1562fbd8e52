//! Store types

use serde::{Deserialize, Serialize};

/// On-disk usage of a blob store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreUsage {
    pub files: usize,
    pub total_size: u64,
}
