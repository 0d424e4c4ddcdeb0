//! Persistent storage for hourly units.
//!
//! - **Unit store**: SQLite database, one bucket per persisted hour,
//!   transactional updates and key-ordered iteration
//! - **Codec**: versioned binary encoding of a `UnitRecord`
//!
//! The live unit never touches storage until it is flushed.

pub mod codec;
pub mod types;
pub mod unit_store;

pub use types::StoreStats;
pub use unit_store::{StoreTxn, UnitStore};
