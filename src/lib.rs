//! # Query Statistics
//!
//! Embedded time-series statistics for a filtering DNS server.
//!
//! Every answered query is counted into the unit for the current hour.
//! Once per hour the unit is persisted into a SQLite bucket keyed by its
//! hour number, and the bucket that fell out of the retention window is
//! deleted. Reports merge the persisted hours with the live unit into
//! per-hour or per-day series, top-N tables and totals.
//!
//! ```rust,no_run
//! use querystats::{Engine, EngineConfig, Entry, FilterResult};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> querystats::Result<()> {
//! let engine = Arc::new(Engine::new(EngineConfig::default())?);
//! engine.start()?;
//!
//! engine.update(&Entry::new(
//!     "192.168.1.10",
//!     "example.org",
//!     FilterResult::NotFiltered,
//!     Duration::from_micros(850),
//! ));
//!
//! let report = engine.get_report(None)?;
//! println!("{} queries", report.dns_queries_total);
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod api;
pub mod engine;
pub mod error;
pub mod flush;
pub mod report;
pub mod retention;
pub mod storage;
pub mod types;
pub mod unit;

pub use api::{Endpoint, EndpointRegistry, StatsInfo};
pub use engine::{Engine, EngineConfig, EngineState, StatsSettings};
pub use error::{Result, StatsError};
pub use report::{Report, TimeUnit};
pub use retention::{HourlyIdGenerator, UnitId, UnitIdGenerator, MAX_WINDOW_HOURS};
pub use storage::UnitStore;
pub use types::{ClientId, Entry, FilterResult};
pub use unit::{NameCount, Unit, UnitRecord};
