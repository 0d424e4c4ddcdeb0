//! Periodic rotation of the current unit into storage.

pub mod scheduler;

pub use scheduler::{FlushScheduler, FlushStep, IDLE_INTERVAL};
