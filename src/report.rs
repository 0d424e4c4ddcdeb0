//! Aggregated statistics report.
//!
//! Field names of the serialized form are consumed by the web dashboard and
//! must stay stable.

use crate::aggregator::{
    average_processing_time, collect_series, collect_top_n, totals, Granularity, Window,
};
use crate::retention::HOURS_PER_DAY;
use crate::types::FilterResult;
use crate::unit::{NameCount, MAX_CLIENTS, MAX_DOMAINS};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashSet;

/// Longest window, in days, still reported per hour.
pub const HOURLY_REPORT_MAX_DAYS: u32 = 7;

/// Unit of the series in a [`Report`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Hours,
    Days,
}

impl TimeUnit {
    /// Series unit for a window of `hours`.
    pub fn for_window(hours: u32) -> Self {
        if hours / HOURS_PER_DAY > HOURLY_REPORT_MAX_DAYS {
            TimeUnit::Days
        } else {
            TimeUnit::Hours
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }

    fn granularity(self) -> Granularity {
        match self {
            TimeUnit::Hours => Granularity::Hourly,
            TimeUnit::Days => Granularity::Daily,
        }
    }
}

/// Statistics over a retention window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub time_units: TimeUnit,

    #[serde(rename = "num_dns_queries")]
    pub dns_queries_total: u64,
    #[serde(rename = "num_blocked_filtering")]
    pub blocked_filtering_total: u64,
    #[serde(rename = "num_replaced_safebrowsing")]
    pub replaced_safebrowsing_total: u64,
    #[serde(rename = "num_replaced_safesearch")]
    pub replaced_safesearch_total: u64,
    #[serde(rename = "num_replaced_parental")]
    pub replaced_parental_total: u64,

    /// Seconds.
    pub avg_processing_time: f64,

    #[serde(rename = "top_queried_domains", serialize_with = "serialize_top")]
    pub top_domains: Vec<NameCount>,
    #[serde(serialize_with = "serialize_top")]
    pub top_clients: Vec<NameCount>,
    #[serde(serialize_with = "serialize_top")]
    pub top_blocked_domains: Vec<NameCount>,

    pub dns_queries: Vec<u64>,
    pub blocked_filtering: Vec<u64>,
    pub replaced_safebrowsing: Vec<u64>,
    pub replaced_parental: Vec<u64>,
}

impl Report {
    /// Report returned while statistics are disabled.
    pub fn disabled() -> Self {
        Self {
            time_units: TimeUnit::Days,
            dns_queries_total: 0,
            blocked_filtering_total: 0,
            replaced_safebrowsing_total: 0,
            replaced_safesearch_total: 0,
            replaced_parental_total: 0,
            avg_processing_time: 0.0,
            top_domains: Vec::new(),
            top_clients: Vec::new(),
            top_blocked_domains: Vec::new(),
            dns_queries: Vec::new(),
            blocked_filtering: Vec::new(),
            replaced_safebrowsing: Vec::new(),
            replaced_parental: Vec::new(),
        }
    }

    /// Builds a report from a loaded window. Domains in `ignored` are left
    /// out of the top tables.
    pub fn build(window: &Window, ignored: &HashSet<String>) -> Self {
        let records = window.records();
        let first_id = window.first_id();
        let time_units = TimeUnit::for_window(window.len() as u32);
        let granularity = time_units.granularity();

        let series = |result: FilterResult| {
            collect_series(records, first_id, granularity, |r| r.result_count(result))
        };

        let sum = totals(records);

        Self {
            time_units,
            dns_queries_total: sum.dns_queries,
            blocked_filtering_total: sum.blocked_filtering,
            replaced_safebrowsing_total: sum.replaced_safebrowsing,
            replaced_safesearch_total: sum.replaced_safesearch,
            replaced_parental_total: sum.replaced_parental,
            avg_processing_time: average_processing_time(records),
            top_domains: collect_top_n(records, MAX_DOMAINS, |r| &r.domains, ignored),
            top_clients: collect_top_n(records, MAX_CLIENTS, |r| &r.clients, &HashSet::new()),
            top_blocked_domains: collect_top_n(
                records,
                MAX_DOMAINS,
                |r| &r.blocked_domains,
                ignored,
            ),
            dns_queries: collect_series(records, first_id, granularity, |r| r.total),
            blocked_filtering: series(FilterResult::Filtered),
            replaced_safebrowsing: series(FilterResult::SafeBrowsing),
            replaced_parental: series(FilterResult::Parental),
        }
    }

    /// Number of elements in each series.
    pub fn series_len(&self) -> usize {
        self.dns_queries.len()
    }
}

/// Top tables are rendered as a list of single-entry objects
/// (`[{"example.org": 12}, ...]`) to keep their order.
fn serialize_top<S: Serializer>(pairs: &[NameCount], serializer: S) -> Result<S::Ok, S::Error> {
    struct Single<'a>(&'a NameCount);

    impl Serialize for Single<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry(&self.0.name, &self.0.count)?;
            map.end()
        }
    }

    serializer.collect_seq(pairs.iter().map(Single))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitRecord;

    fn window(hours: u32) -> Window {
        let mut records = vec![UnitRecord::default(); hours as usize];
        records[0] = UnitRecord {
            results: vec![0, 1, 1, 0, 0, 0],
            domains: vec![NameCount::new("example.org", 1)],
            blocked_domains: vec![NameCount::new("ads.example", 1)],
            clients: vec![NameCount::new("10.0.0.1", 2)],
            total: 2,
            avg_time_us: 500,
        };
        Window::new(records, 480_000, hours)
    }

    #[test]
    fn test_time_unit_selection() {
        assert_eq!(TimeUnit::for_window(24), TimeUnit::Hours);
        assert_eq!(TimeUnit::for_window(7 * 24), TimeUnit::Hours);
        assert_eq!(TimeUnit::for_window(30 * 24), TimeUnit::Days);
        assert_eq!(TimeUnit::for_window(90 * 24), TimeUnit::Days);
    }

    #[test]
    fn test_build_hourly_and_daily() {
        let report = Report::build(&window(24), &HashSet::new());
        assert_eq!(report.time_units, TimeUnit::Hours);
        assert_eq!(report.series_len(), 24);
        assert_eq!(report.dns_queries_total, 2);
        assert_eq!(report.blocked_filtering_total, 1);
        assert_eq!(report.avg_processing_time, 0.0005);

        let report = Report::build(&window(30 * 24), &HashSet::new());
        assert_eq!(report.time_units, TimeUnit::Days);
        assert_eq!(report.series_len(), 30);
        assert_eq!(report.blocked_filtering.len(), 30);
        assert_eq!(report.dns_queries.iter().sum::<u64>(), 2);
    }

    #[test]
    fn test_ignored_domains_hidden_from_tops() {
        let ignored: HashSet<String> = ["example.org".to_string()].into_iter().collect();
        let report = Report::build(&window(24), &ignored);
        assert!(report.top_domains.is_empty());
        assert_eq!(report.top_blocked_domains.len(), 1);
        assert_eq!(report.dns_queries_total, 2);
    }

    #[test]
    fn test_json_field_names() {
        let report = Report::build(&window(24), &HashSet::new());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["time_units"], "hours");
        assert_eq!(json["num_dns_queries"], 2);
        assert_eq!(json["num_blocked_filtering"], 1);
        assert_eq!(json["top_queried_domains"][0]["example.org"], 1);
        assert_eq!(json["top_clients"][0]["10.0.0.1"], 2);
        assert_eq!(json["top_blocked_domains"][0]["ads.example"], 1);
        assert_eq!(json["dns_queries"].as_array().unwrap().len(), 24);
    }

    #[test]
    fn test_disabled_report() {
        let report = Report::disabled();
        assert_eq!(report.time_units, TimeUnit::Days);
        assert_eq!(report.dns_queries_total, 0);
        assert_eq!(report.series_len(), 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["time_units"], "days");
    }
}
