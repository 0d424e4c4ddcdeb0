//! Hourly units and their persisted snapshots.
//!
//! A [`Unit`] is the live, mutable aggregate of one hour. Its name maps grow
//! to the full cardinality of that hour; they are cut down to the top
//! [`MAX_DOMAINS`]/[`MAX_CLIENTS`] entries only when the unit is serialized
//! into a [`UnitRecord`].

use crate::retention::UnitId;
use crate::types::{FilterResult, RESULT_SLOTS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of domains kept per record and returned in top tables.
pub const MAX_DOMAINS: usize = 100;

/// Maximum number of clients kept per record and returned in top tables.
pub const MAX_CLIENTS: usize = 100;

/// Name and number of requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCount {
    pub name: String,
    pub count: u64,
}

impl NameCount {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Serializable snapshot of one unit.
///
/// Field order is part of the stored format, see
/// [`storage::codec`](crate::storage::codec).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Requests per [`FilterResult`], indexed by result code.
    pub results: Vec<u64>,
    /// Top allowed domains.
    pub domains: Vec<NameCount>,
    /// Top blocked domains.
    pub blocked_domains: Vec<NameCount>,
    /// Top clients.
    pub clients: Vec<NameCount>,
    /// Total requests.
    pub total: u64,
    /// Average processing time per request, microseconds.
    pub avg_time_us: u32,
}

impl Default for UnitRecord {
    fn default() -> Self {
        Self {
            results: vec![0; RESULT_SLOTS],
            domains: Vec::new(),
            blocked_domains: Vec::new(),
            clients: Vec::new(),
            total: 0,
            avg_time_us: 0,
        }
    }
}

impl UnitRecord {
    /// Number of requests with the given result. Records written with a
    /// shorter histogram read as zero for the missing slots.
    #[inline]
    pub fn result_count(&self, result: FilterResult) -> u64 {
        self.results.get(result.index()).copied().unwrap_or(0)
    }
}

/// Live statistics for one hour.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    id: UnitId,
    results: [u64; RESULT_SLOTS],
    domains: HashMap<String, u64>,
    blocked_domains: HashMap<String, u64>,
    clients: HashMap<String, u64>,
    total: u64,
    time_sum_us: u64,
}

impl Unit {
    /// Creates an empty unit.
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            results: [0; RESULT_SLOTS],
            domains: HashMap::new(),
            blocked_domains: HashMap::new(),
            clients: HashMap::new(),
            total: 0,
            time_sum_us: 0,
        }
    }

    /// Rebuilds a unit from its stored snapshot.
    ///
    /// The processing time sum is reconstituted as `avg * total`, so sub-
    /// average precision of the original unit is lost.
    pub fn from_record(id: UnitId, record: &UnitRecord) -> Self {
        let mut results = [0; RESULT_SLOTS];
        for (slot, n) in results.iter_mut().zip(&record.results).skip(1) {
            *slot = *n;
        }

        Self {
            id,
            results,
            domains: pairs_to_map(&record.domains),
            blocked_domains: pairs_to_map(&record.blocked_domains),
            clients: pairs_to_map(&record.clients),
            total: record.total,
            time_sum_us: u64::from(record.avg_time_us).saturating_mul(record.total),
        }
    }

    #[inline]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn result_count(&self, result: FilterResult) -> u64 {
        self.results[result.index()]
    }

    /// Requests for `domain` that were not filtered.
    pub fn domain_count(&self, domain: &str) -> u64 {
        self.domains.get(domain).copied().unwrap_or(0)
    }

    /// Requests for `domain` that were blocked or replaced.
    pub fn blocked_domain_count(&self, domain: &str) -> u64 {
        self.blocked_domains.get(domain).copied().unwrap_or(0)
    }

    pub fn client_count(&self, client: &str) -> u64 {
        self.clients.get(client).copied().unwrap_or(0)
    }

    /// Counts one request.
    pub fn add(&mut self, result: FilterResult, domain: &str, client: &str, time_us: u64) {
        let slot = &mut self.results[result.index()];
        *slot = slot.saturating_add(1);

        let domains = if result == FilterResult::NotFiltered {
            &mut self.domains
        } else {
            &mut self.blocked_domains
        };
        *domains.entry(domain.to_string()).or_insert(0) += 1;

        *self.clients.entry(client.to_string()).or_insert(0) += 1;
        self.time_sum_us = self.time_sum_us.saturating_add(time_us);
        self.total = self.total.saturating_add(1);
    }

    /// Takes a snapshot for persistence or reporting.
    pub fn serialize(&self) -> UnitRecord {
        let avg_time_us = if self.total == 0 {
            0
        } else {
            u32::try_from(self.time_sum_us / self.total).unwrap_or(u32::MAX)
        };

        UnitRecord {
            results: self.results.to_vec(),
            domains: top_pairs(&self.domains, MAX_DOMAINS),
            blocked_domains: top_pairs(&self.blocked_domains, MAX_DOMAINS),
            clients: top_pairs(&self.clients, MAX_CLIENTS),
            total: self.total,
            avg_time_us,
        }
    }
}

/// Returns at most `max` pairs sorted by descending count. Equal counts are
/// ordered by name so the cut is deterministic.
pub fn top_pairs(map: &HashMap<String, u64>, max: usize) -> Vec<NameCount> {
    let mut pairs: Vec<NameCount> = map
        .iter()
        .map(|(name, count)| NameCount::new(name.clone(), *count))
        .collect();

    pairs.sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    pairs.truncate(max);
    pairs
}

fn pairs_to_map(pairs: &[NameCount]) -> HashMap<String, u64> {
    pairs.iter().map(|p| (p.name.clone(), p.count)).collect()
}
