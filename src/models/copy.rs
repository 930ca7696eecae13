//! Ledger rows describing replicated copies of a source object.

use serde::{Deserialize, Serialize};

/// One retained copy of a source object.
///
/// Keyed by `(original_name, copy_timestamp)`. `delete_time` is only set
/// once the copy has been disowned.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CopyRecord {
    pub original_name: String,
    /// Unix seconds at which the copy was taken.
    pub copy_timestamp: i64,
    /// Key of the copy inside the copy bucket.
    pub copy_object_name: String,
    pub is_disowned: bool,
    /// Unix seconds at which the copy was disowned.
    pub delete_time: Option<i64>,
}

impl CopyRecord {
    /// A freshly taken, retained copy.
    pub fn retained(original_name: impl Into<String>, copy_timestamp: i64) -> Self {
        let original_name = original_name.into();
        Self {
            copy_object_name: copy_key(&original_name, copy_timestamp),
            original_name,
            copy_timestamp,
            is_disowned: false,
            delete_time: None,
        }
    }
}

/// Key under which a copy of `original` taken at `timestamp` is stored.
pub fn copy_key(original: &str, timestamp: i64) -> String {
    format!("{}_{}", original, timestamp)
}
