//! Storage data structures.

use crate::retention::UnitId;
use std::path::PathBuf;

/// Statistics about the unit store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Path of the database file
    pub path: PathBuf,
    /// Number of persisted units
    pub buckets: u64,
    /// Oldest persisted unit id
    pub oldest: Option<UnitId>,
    /// Newest persisted unit id
    pub newest: Option<UnitId>,
}
