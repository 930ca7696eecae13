//! Time-series rows recording aggregate bucket size.

use serde::{Deserialize, Serialize};

/// Aggregate size of a bucket at one instant. Append-only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SizeSample {
    pub bucket_name: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub total_size: i64,
    pub object_count: i64,
}
