//! Retention intervals and unit identity.
//!
//! Units are identified by the absolute hour number since the UNIX epoch.
//! A `u32` hour counter overflows only after roughly 490,000 years, so ids
//! never wrap during any realistic uptime. Window arithmetic near zero (test
//! generators start at hour 0) uses wrapping subtraction and simply finds no
//! stored units for the wrapped ids.

use crate::types::now_secs;
use log::warn;

/// Identifier of one hourly unit.
pub type UnitId = u32;

/// Hours aggregated into one day of a daily rollup.
pub const HOURS_PER_DAY: u32 = 24;

/// Retention intervals accepted from operators, in days.
pub const ALLOWED_RETENTION_DAYS: [u32; 5] = [0, 1, 7, 30, 90];

/// Longest window a report can cover, in hours.
pub const MAX_WINDOW_HOURS: u32 = 90 * HOURS_PER_DAY;

/// Retention used when a stored value is not an accepted interval.
pub const DEFAULT_RETENTION_DAYS: u32 = 1;

/// Width of an encoded bucket key.
pub const KEY_LEN: usize = 4;

/// Returns true if `days` is an accepted retention interval. Zero disables
/// statistics.
pub fn check_interval(days: u32) -> bool {
    ALLOWED_RETENTION_DAYS.contains(&days)
}

/// Validates a retention value that was already stored (configuration file
/// or legacy data), falling back to [`DEFAULT_RETENTION_DAYS`].
pub fn sanitize_stored_interval(days: u32) -> u32 {
    if check_interval(days) {
        return days;
    }

    warn!(
        "Stored statistics interval of {} days is not supported, using {} day",
        days, DEFAULT_RETENTION_DAYS
    );

    DEFAULT_RETENTION_DAYS
}

/// Number of hourly units retained for `days`.
#[inline]
pub fn retention_hours(days: u32) -> u32 {
    days * HOURS_PER_DAY
}

/// Encodes a unit id as an order-preserving bucket key.
#[inline]
pub fn id_to_key(id: UnitId) -> [u8; KEY_LEN] {
    id.to_be_bytes()
}

/// Decodes a bucket key. Returns `None` if the key has the wrong width.
#[inline]
pub fn key_to_id(key: &[u8]) -> Option<UnitId> {
    let bytes: [u8; KEY_LEN] = key.try_into().ok()?;
    Some(UnitId::from_be_bytes(bytes))
}

/// Oldest unit id still kept at startup for the given current id. Units
/// strictly older are evicted by the startup walk.
#[inline]
pub fn startup_eviction_boundary(current: UnitId, hours: u32) -> UnitId {
    current.saturating_sub(hours).saturating_sub(1)
}

/// Unit id that falls out of the window once `current` becomes the current
/// unit. `None` when the window reaches back past hour zero.
#[inline]
pub fn expired_unit_id(current: UnitId, hours: u32) -> Option<UnitId> {
    current.checked_sub(hours)
}

/// Source of the id for the unit that is current right now.
///
/// Two generators observing the same wall clock must agree, so engines
/// never need to coordinate on ids.
pub trait UnitIdGenerator: Send + Sync {
    /// Returns the id of the unit that covers the present moment.
    fn current_id(&self) -> UnitId;
}

/// Default generator: absolute hour number since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct HourlyIdGenerator;

impl UnitIdGenerator for HourlyIdGenerator {
    fn current_id(&self) -> UnitId {
        (now_secs() / 3600) as UnitId
    }
}

impl<F> UnitIdGenerator for F
where
    F: Fn() -> UnitId + Send + Sync,
{
    fn current_id(&self) -> UnitId {
        self()
    }
}
