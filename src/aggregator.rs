//! Query-time aggregation over a window of hourly records.
//!
//! A [`Window`] holds exactly one record per hour of the requested span,
//! oldest first, with the live unit's snapshot as the last element. The
//! functions here turn it into per-hour or per-day series, top-N tables and
//! scalar totals.

use crate::error::{Result, StatsError};
use crate::retention::{UnitId, HOURS_PER_DAY};
use crate::storage::StoreTxn;
use crate::types::FilterResult;
use crate::unit::{top_pairs, NameCount, UnitRecord};
use log::error;
use std::collections::{HashMap, HashSet};

/// Granularity of a collected series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
}

/// Consecutive hourly records ending with the current unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    records: Vec<UnitRecord>,
    first_id: UnitId,
}

impl Window {
    /// Wraps loaded records.
    ///
    /// # Panics
    /// Panics if `records` does not hold exactly `hours` elements, which
    /// means the window arithmetic is broken.
    pub fn new(records: Vec<UnitRecord>, first_id: UnitId, hours: u32) -> Self {
        assert_eq!(
            records.len(),
            hours as usize,
            "loaded {} units when the desired number is {}",
            records.len(),
            hours
        );

        Self { records, first_id }
    }

    #[inline]
    pub fn records(&self) -> &[UnitRecord] {
        &self.records
    }

    #[inline]
    pub fn first_id(&self) -> UnitId {
        self.first_id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Id of the oldest unit in a window of `hours` ending at `cur_id`.
#[inline]
pub fn window_first_id(cur_id: UnitId, hours: u32) -> UnitId {
    cur_id.wrapping_sub(hours.saturating_sub(1))
}

/// Loads `count` persisted records starting at `first_id`. Missing or
/// unreadable units are replaced by empty records.
pub fn load_history(tx: &StoreTxn<'_>, first_id: UnitId, count: u32) -> Result<Vec<UnitRecord>> {
    let mut records = Vec::with_capacity(count as usize + 1);

    for offset in 0..count {
        let id = first_id.wrapping_add(offset);
        let record = match tx.get(id) {
            Ok(record) => record,
            Err(e @ StatsError::Store(_)) => return Err(e),
            Err(e) => {
                error!("Loading unit {}: {}", id, e);
                None
            }
        };
        records.push(record.unwrap_or_default());
    }

    Ok(records)
}

/// Collects one number per hour or per day using `metric`.
///
/// Daily series are aligned to absolute day boundaries (multiples of 24
/// unit ids): the hours before the first boundary are added to the first
/// day and the trailing partial day becomes the last element. A window of
/// `24 * d` hours therefore always yields `d` elements, whatever hour of the
/// day it starts at.
pub fn collect_series<F>(
    records: &[UnitRecord],
    first_id: UnitId,
    granularity: Granularity,
    metric: F,
) -> Vec<u64>
where
    F: Fn(&UnitRecord) -> u64,
{
    match granularity {
        Granularity::Hourly => records.iter().map(&metric).collect(),
        Granularity::Daily => {
            if records.is_empty() {
                return Vec::new();
            }

            let day = HOURS_PER_DAY as usize;
            let lead = ((HOURS_PER_DAY - first_id % HOURS_PER_DAY) % HOURS_PER_DAY) as usize;
            let first_len = (lead + day).min(records.len());

            let (first, rest) = records.split_at(first_len);
            let mut nums = Vec::with_capacity(records.len() / day + 1);
            nums.push(first.iter().map(&metric).sum());
            nums.extend(rest.chunks(day).map(|chunk| chunk.iter().map(&metric).sum::<u64>()));
            nums
        }
    }
}

/// Merges per-record name counts and returns the `max` largest, skipping
/// names in `exclude`.
pub fn collect_top_n<F>(
    records: &[UnitRecord],
    max: usize,
    metric: F,
    exclude: &HashSet<String>,
) -> Vec<NameCount>
where
    F: Fn(&UnitRecord) -> &[NameCount],
{
    let mut merged: HashMap<String, u64> = HashMap::new();

    for record in records {
        for pair in metric(record) {
            if exclude.contains(&pair.name) {
                continue;
            }
            *merged.entry(pair.name.clone()).or_insert(0) += pair.count;
        }
    }

    top_pairs(&merged, max)
}

/// Average processing time in seconds.
///
/// This is the mean of the per-hour averages over hours that saw traffic,
/// not a request-weighted mean. Existing dashboards are calibrated to it.
pub fn average_processing_time(records: &[UnitRecord]) -> f64 {
    let mut sum: u64 = 0;
    let mut hours: u64 = 0;

    for record in records {
        sum += u64::from(record.avg_time_us);
        if record.avg_time_us != 0 {
            hours += 1;
        }
    }

    if hours == 0 {
        return 0.0;
    }

    (sum / hours) as f64 / 1_000_000.0
}

/// Scalar counters summed over a window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub dns_queries: u64,
    pub blocked_filtering: u64,
    pub replaced_safebrowsing: u64,
    pub replaced_safesearch: u64,
    pub replaced_parental: u64,
}

pub fn totals(records: &[UnitRecord]) -> Totals {
    records.iter().fold(Totals::default(), |mut acc, r| {
        acc.dns_queries += r.total;
        acc.blocked_filtering += r.result_count(FilterResult::Filtered);
        acc.replaced_safebrowsing += r.result_count(FilterResult::SafeBrowsing);
        acc.replaced_safesearch += r.result_count(FilterResult::SafeSearch);
        acc.replaced_parental += r.result_count(FilterResult::Parental);
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(totals: &[u64]) -> Vec<UnitRecord> {
        totals
            .iter()
            .map(|&total| UnitRecord {
                total,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_hourly_series_is_one_to_one() {
        let records = vec![UnitRecord::default(); 720];
        let nums = collect_series(&records, 0, Granularity::Hourly, |r| r.total);
        assert_eq!(nums.len(), 720);
    }

    #[test]
    fn test_daily_series_length_for_every_offset() {
        let records = vec![UnitRecord::default(); 720];
        for first_id in 0..25u32 {
            let nums = collect_series(&records, first_id, Granularity::Daily, |r| r.total);
            assert_eq!(nums.len(), 30, "first_id={}", first_id);
        }

        let records = vec![UnitRecord::default(); 2160];
        for first_id in 480_000..480_024u32 {
            let nums = collect_series(&records, first_id, Granularity::Daily, |r| r.total);
            assert_eq!(nums.len(), 90, "first_id={}", first_id);
        }
    }

    #[test]
    fn test_daily_series_aligned_sums() {
        // Two full days starting on a boundary.
        let mut totals = vec![1u64; 24];
        totals.extend(vec![2u64; 24]);
        let nums = collect_series(&hourly(&totals), 48, Granularity::Daily, |r| r.total);
        assert_eq!(nums, vec![24, 48]);
    }

    #[test]
    fn test_daily_series_unaligned_sums() {
        // Window starts 2 hours before a day boundary: those 2 hours join
        // the first day, the last 22 hours form the final element.
        let records = hourly(&vec![1u64; 48]);
        let nums = collect_series(&records, 22, Granularity::Daily, |r| r.total);
        assert_eq!(nums, vec![26, 22]);
        assert_eq!(nums.iter().sum::<u64>(), 48);
    }

    #[test]
    fn test_daily_series_preserves_sum() {
        let totals: Vec<u64> = (0..720).collect();
        let records = hourly(&totals);
        let nums = collect_series(&records, 13, Granularity::Daily, |r| r.total);
        assert_eq!(nums.iter().sum::<u64>(), totals.iter().sum::<u64>());
    }

    #[test]
    fn test_top_n_merges_and_excludes() {
        let records = vec![
            UnitRecord {
                domains: vec![NameCount::new("a.example", 3), NameCount::new("b.example", 1)],
                ..Default::default()
            },
            UnitRecord {
                domains: vec![NameCount::new("b.example", 4), NameCount::new("c.example", 2)],
                ..Default::default()
            },
        ];

        let top = collect_top_n(&records, 2, |r| &r.domains, &HashSet::new());
        assert_eq!(
            top,
            vec![NameCount::new("b.example", 5), NameCount::new("a.example", 3)]
        );

        let exclude: HashSet<String> = ["b.example".to_string()].into_iter().collect();
        let top = collect_top_n(&records, 10, |r| &r.domains, &exclude);
        assert_eq!(
            top,
            vec![NameCount::new("a.example", 3), NameCount::new("c.example", 2)]
        );
    }

    #[test]
    fn test_average_of_averages() {
        let records = vec![
            UnitRecord {
                avg_time_us: 100,
                total: 1,
                ..Default::default()
            },
            UnitRecord::default(),
            UnitRecord {
                avg_time_us: 300,
                total: 1_000,
                ..Default::default()
            },
        ];

        // Unweighted: (100 + 300) / 2, the empty hour is ignored.
        assert_eq!(average_processing_time(&records), 0.0002);
        assert_eq!(average_processing_time(&[]), 0.0);
    }

    #[test]
    fn test_totals() {
        let records = vec![
            UnitRecord {
                results: vec![0, 1, 2, 3, 4, 5],
                total: 15,
                ..Default::default()
            },
            UnitRecord {
                results: vec![0, 0, 1],
                total: 1,
                ..Default::default()
            },
        ];

        let sum = totals(&records);
        assert_eq!(sum.dns_queries, 16);
        assert_eq!(sum.blocked_filtering, 3);
        assert_eq!(sum.replaced_safebrowsing, 3);
        assert_eq!(sum.replaced_safesearch, 4);
        assert_eq!(sum.replaced_parental, 5);
    }

    #[test]
    fn test_window_first_id_wraps_near_zero() {
        assert_eq!(window_first_id(100, 24), 77);
        assert_eq!(window_first_id(5, 24), 5u32.wrapping_sub(23));
    }

    #[test]
    #[should_panic(expected = "desired number")]
    fn test_window_length_mismatch_panics() {
        Window::new(vec![UnitRecord::default(); 3], 0, 24);
    }
}
