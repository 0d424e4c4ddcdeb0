//! The statistics engine.
//!
//! The Engine owns the live unit for the current hour, the handle to the
//! unit store and the background flush loop. It is shared by reference
//! between the DNS pipeline (ingestion) and the web layer (queries and
//! administration).
//!
//! # Locking
//! - `current` guards the live unit. `update` holds it for one in-memory
//!   insert; queries hold it only while taking a snapshot.
//! - `store` guards the store handle, which `clear` swaps out. Callers clone
//!   the `Arc` under the guard and run transactions without holding it.
//! - `unflushed` holds a unit that was rotated out but is not yet committed.
//!   It is set while `current` is write-locked, so a query either sees the
//!   unit as current, as parked, or in the store.
//!
//! No two of these locks are held at the same time except `current` then
//! `unflushed` during rotation.

use crate::aggregator::{collect_top_n, load_history, window_first_id, Window};
use crate::api::{Endpoint, EndpointRegistry};
use crate::error::{Result, StatsError};
use crate::flush::{FlushScheduler, FlushStep};
use crate::report::Report;
use crate::retention::{
    check_interval, expired_unit_id, retention_hours, sanitize_stored_interval,
    startup_eviction_boundary, HourlyIdGenerator, UnitId, UnitIdGenerator,
    DEFAULT_RETENTION_DAYS, MAX_WINDOW_HOURS,
};
use crate::storage::{StoreStats, StoreTxn, UnitStore};
use crate::types::{normalize_client, ClientId, Entry};
use crate::unit::{Unit, UnitRecord};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Callback invoked after a setting changed at runtime.
pub type ConfigModifiedFn = Arc<dyn Fn() + Send + Sync>;

/// Configuration for an [`Engine`].
#[derive(Clone)]
pub struct EngineConfig {
    /// Path to the statistics database
    pub filename: PathBuf,
    /// Retention in days, one of 0, 1, 7, 30, 90
    pub retention_days: u32,
    /// Source of unit ids
    pub unit_id: Arc<dyn UnitIdGenerator>,
    /// Mask client addresses before counting
    pub anonymize_client_ip: bool,
    /// Host names that are not counted
    pub ignored: Vec<String>,
    /// Receives the HTTP endpoints on start
    pub registry: Option<Arc<dyn EndpointRegistry>>,
    /// Called after `set_retention` or `set_ignored` succeeds
    pub on_config_modified: Option<ConfigModifiedFn>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filename: PathBuf::from("./var/data/stats.db"),
            retention_days: DEFAULT_RETENTION_DAYS,
            unit_id: Arc::new(HourlyIdGenerator),
            anonymize_client_ip: false,
            ignored: Vec::new(),
            registry: None,
            on_config_modified: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("filename", &self.filename)
            .field("retention_days", &self.retention_days)
            .field("anonymize_client_ip", &self.anonymize_client_ip)
            .field("ignored", &self.ignored)
            .field("registry", &self.registry.is_some())
            .field("on_config_modified", &self.on_config_modified.is_some())
            .finish()
    }
}

impl EngineConfig {
    /// Builds a configuration from persisted settings. Everything else keeps
    /// its default.
    pub fn from_settings(filename: impl Into<PathBuf>, settings: &StatsSettings) -> Self {
        Self {
            filename: filename.into(),
            retention_days: settings.interval,
            anonymize_client_ip: settings.anonymize_client_ip,
            ignored: settings.ignored.clone(),
            ..Default::default()
        }
    }
}

/// Settings persisted by the host configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSettings {
    /// Retention in days
    pub interval: u32,
    #[serde(default)]
    pub anonymize_client_ip: bool,
    #[serde(default)]
    pub ignored: Vec<String>,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETENTION_DAYS,
            anonymize_client_ip: false,
            ignored: Vec::new(),
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, flush loop not running
    Created,
    /// Flush loop running
    Running,
    /// Shut down; terminal
    Stopped,
}

/// Settings that change at runtime.
#[derive(Debug)]
struct RuntimeConf {
    retention_days: u32,
    ignored: HashSet<String>,
}

// ================================================================================================
// ENGINE
// ================================================================================================

/// Hourly DNS statistics engine.
pub struct Engine {
    filename: PathBuf,
    unit_id: Arc<dyn UnitIdGenerator>,
    anonymize_client_ip: bool,
    registry: Option<Arc<dyn EndpointRegistry>>,
    on_config_modified: Option<ConfigModifiedFn>,

    conf: RwLock<RuntimeConf>,
    /// Live unit; `None` after shutdown
    current: RwLock<Option<Unit>>,
    /// Rotated unit waiting to be committed
    unflushed: Mutex<Option<Unit>>,
    /// Store handle; `None` while cleared or after shutdown
    store: Mutex<Option<Arc<UnitStore>>>,

    state: Mutex<EngineState>,
    flush: Mutex<Option<FlushScheduler>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("filename", &self.filename)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Engine {
    /// Opens the store, evicts expired units and restores the current unit
    /// if it was persisted by a previous run within the same hour.
    ///
    /// A panic during initialization is returned as [`StatsError::Panic`].
    pub fn new(config: EngineConfig) -> Result<Self> {
        match panic::catch_unwind(AssertUnwindSafe(|| Self::init(config))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                error!("Statistics engine initialization panicked: {}", msg);
                Err(StatsError::Panic(msg))
            }
        }
    }

    fn init(config: EngineConfig) -> Result<Self> {
        let retention_days = sanitize_stored_interval(config.retention_days);
        let store = UnitStore::open(&config.filename)?;

        let id = config.unit_id.current_id();
        let hours = retention_hours(retention_days);

        // Unused buckets are removed here; the current unit is restored in
        // the same transaction.
        let restored = store.update(|tx| {
            let boundary = startup_eviction_boundary(id, hours);
            let deleted = delete_older_than(tx, boundary)?;
            if deleted > 0 {
                debug!("Deleted {} units older than {}", deleted, boundary);
            }
            Ok(load_record(tx, id))
        });

        let current = match restored {
            Ok(Some(record)) => {
                debug!("Restored unit {} with {} requests", id, record.total);
                Unit::from_record(id, &record)
            }
            Ok(None) => Unit::new(id),
            Err(e) => {
                error!("Loading statistics at startup: {}", e);
                Unit::new(id)
            }
        };

        info!(
            "Statistics engine initialized: {} ({} days)",
            config.filename.display(),
            retention_days
        );

        Ok(Self {
            filename: config.filename,
            unit_id: config.unit_id,
            anonymize_client_ip: config.anonymize_client_ip,
            registry: config.registry,
            on_config_modified: config.on_config_modified,
            conf: RwLock::new(RuntimeConf {
                retention_days,
                ignored: normalize_hosts(config.ignored),
            }),
            current: RwLock::new(Some(current)),
            unflushed: Mutex::new(None),
            store: Mutex::new(Some(Arc::new(store))),
            state: Mutex::new(EngineState::Created),
            flush: Mutex::new(None),
        })
    }

    // ============================================================================================
    // LIFECYCLE
    // ============================================================================================

    /// Starts the flush loop and registers the HTTP endpoints.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Running => return Err(StatsError::AlreadyStarted),
                EngineState::Stopped => return Err(StatsError::ShutDown),
                EngineState::Created => {}
            }

            let scheduler = FlushScheduler::spawn(self)?;
            *self.flush.lock() = Some(scheduler);
            *state = EngineState::Running;
        }

        if let Some(registry) = &self.registry {
            for endpoint in Endpoint::ALL {
                debug!("Registering {} {}", endpoint.method(), endpoint.path());
                registry.register(endpoint, Arc::clone(self));
            }
        }

        info!("Statistics engine started");
        Ok(())
    }

    /// Stops the flush loop, persists the current unit and closes the
    /// store. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Stopped {
                return Ok(());
            }
            *state = EngineState::Stopped;
        }

        let scheduler = self.flush.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }

        let store = self.store.lock().take();
        let current = self.current.write().take();
        let parked = self.unflushed.lock().take();

        let Some(store) = store else {
            info!("Statistics engine shut down");
            return Ok(());
        };

        let flushed = store.update(|tx| {
            for unit in parked.iter().chain(current.iter()) {
                tx.put(unit.id(), &unit.serialize())?;
            }
            Ok(())
        });

        if let Err(e) = &flushed {
            error!("Flushing statistics on shutdown: {}", e);
        }

        let closed = close_store(store);
        info!("Statistics engine shut down");
        flushed.and(closed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    // ============================================================================================
    // INGESTION
    // ============================================================================================

    /// Counts one request. Invalid entries are dropped; this never fails and
    /// never touches the store.
    pub fn update(&self, entry: &Entry) {
        if let Err(e) = entry.validate() {
            debug!("Dropping statistics entry: {}", e);
            return;
        }

        // Held until the insert so a concurrent disable cannot be followed
        // by a late write into the cleared unit. Lock order: conf, current.
        let conf = self.conf.read();
        if conf.retention_days == 0 {
            return;
        }

        let client = normalize_client(&entry.client, self.anonymize_client_ip);
        let time_us = u64::try_from(entry.processing_time.as_micros()).unwrap_or(u64::MAX);

        let mut current = self.current.write();
        match current.as_mut() {
            Some(unit) => unit.add(entry.result, &entry.domain, &client, time_us),
            None => debug!("Dropping statistics entry after shutdown"),
        }
    }

    /// Returns false if requests for `host` must not be counted.
    pub fn should_count(&self, host: &str) -> bool {
        let host = normalize_host(host);
        !self.conf.read().ignored.contains(&host)
    }

    // ============================================================================================
    // FLUSH
    // ============================================================================================

    /// Runs one iteration of the flush loop: rotates the current unit into
    /// the store when the hour changed and evicts the unit that fell out of
    /// the retention window.
    pub fn flush_step(&self) -> FlushStep {
        let id = self.unit_id.current_id();
        let hours = retention_hours(self.conf.read().retention_days);
        if hours == 0 {
            return FlushStep::idle();
        }

        let Some(store) = self.store_handle() else {
            return FlushStep::idle();
        };

        // A unit left over from a failed flush goes first.
        if !self.flush_parked(&store, id, hours) {
            return FlushStep::idle();
        }

        {
            let mut current = self.current.write();
            match current.as_ref() {
                None => return FlushStep::stop(),
                Some(unit) if unit.id() == id => return FlushStep::idle(),
                Some(_) => {}
            }

            let old = current.replace(Unit::new(id));
            *self.unflushed.lock() = old;
        }

        if self.flush_parked(&store, id, hours) {
            FlushStep::busy()
        } else {
            FlushStep::idle()
        }
    }

    /// Persists the parked unit, if any. Returns false if it is still
    /// parked.
    fn flush_parked(&self, store: &UnitStore, new_id: UnitId, hours: u32) -> bool {
        let parked = self
            .unflushed
            .lock()
            .as_ref()
            .map(|unit| (unit.id(), unit.serialize()));

        let Some((id, record)) = parked else {
            return true;
        };

        let result = store.update(|tx| {
            tx.put(id, &record)?;
            evict(tx, new_id, hours)
        });

        match result {
            Ok(deleted) => {
                self.unflushed.lock().take();
                debug!("Flushed unit {} ({} requests), evicted {}", id, record.total, deleted);
                true
            }
            Err(e) => {
                error!("Flushing unit {}: {}", id, e);
                false
            }
        }
    }

    // ============================================================================================
    // QUERIES
    // ============================================================================================

    /// Builds the report for the retention window, or for the last
    /// `override_hours` hours when given.
    pub fn get_report(&self, override_hours: Option<u32>) -> Result<Report> {
        let (days, ignored) = {
            let conf = self.conf.read();
            (conf.retention_days, conf.ignored.clone())
        };

        let hours = override_hours.unwrap_or_else(|| retention_hours(days));
        if days == 0 || hours == 0 {
            return Ok(Report::disabled());
        }
        if hours > MAX_WINDOW_HOURS {
            return Err(StatsError::InvalidWindow(hours));
        }

        let window = self.load_window(hours)?;
        Ok(Report::build(&window, &ignored))
    }

    /// Clients with the most requests in the retention window.
    pub fn top_clients(&self, limit: usize) -> Result<Vec<ClientId>> {
        let hours = retention_hours(self.conf.read().retention_days);
        if hours == 0 || limit == 0 {
            return Ok(Vec::new());
        }

        let window = self.load_window(hours)?;
        let top = collect_top_n(
            window.records(),
            limit,
            |r| &r.clients,
            &HashSet::new(),
        );

        Ok(top.iter().map(|pair| ClientId::parse(&pair.name)).collect())
    }

    /// Loads `hours` records ending with a snapshot of the current unit.
    pub fn load_window(&self, hours: u32) -> Result<Window> {
        if hours == 0 || hours > MAX_WINDOW_HOURS {
            return Err(StatsError::InvalidWindow(hours));
        }

        let (cur_id, current) = {
            let current = self.current.read();
            match current.as_ref() {
                Some(unit) => (unit.id(), Some(unit.serialize())),
                None => (self.unit_id.current_id(), None),
            }
        };

        // Read before the store so a commit racing with this query is seen
        // in one of the two places.
        let parked = self
            .unflushed
            .lock()
            .as_ref()
            .map(|unit| (unit.id(), unit.serialize()));

        let store = self.store_handle().ok_or(StatsError::Closed)?;
        let first_id = window_first_id(cur_id, hours);
        let mut records = store.view(|tx| load_history(tx, first_id, hours - 1))?;

        if let Some((id, record)) = parked {
            let idx = id.wrapping_sub(first_id) as usize;
            if let Some(slot) = records.get_mut(idx) {
                *slot = record;
            }
        }

        records.push(current.unwrap_or_default());
        Ok(Window::new(records, first_id, hours))
    }

    /// Bucket statistics of the underlying store.
    pub fn store_stats(&self) -> Result<StoreStats> {
        self.store_handle().ok_or(StatsError::Closed)?.stats()
    }

    // ============================================================================================
    // ADMINISTRATION
    // ============================================================================================

    /// Retention in days.
    pub fn retention_days(&self) -> u32 {
        self.conf.read().retention_days
    }

    /// Changes retention. Zero disables statistics and clears all data.
    pub fn set_retention(&self, days: u32) -> Result<()> {
        if !check_interval(days) {
            return Err(StatsError::InvalidRetention(days));
        }

        let previous = std::mem::replace(&mut self.conf.write().retention_days, days);
        info!("Statistics retention set to {} days", days);

        if days == 0 {
            self.clear()?;
        } else if previous == 0 {
            // The current unit stopped rotating while disabled.
            let mut current = self.current.write();
            if current.is_some() {
                *current = Some(Unit::new(self.unit_id.current_id()));
            }
        }

        self.config_modified();
        Ok(())
    }

    /// Replaces the set of ignored host names.
    pub fn set_ignored<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ignored = normalize_hosts(hosts);
        debug!("Statistics ignore {} hosts", ignored.len());
        self.conf.write().ignored = ignored;
        self.config_modified();
    }

    /// Settings to persist in the host configuration file.
    pub fn settings(&self) -> StatsSettings {
        let conf = self.conf.read();
        let mut ignored: Vec<String> = conf.ignored.iter().cloned().collect();
        ignored.sort();

        StatsSettings {
            interval: conf.retention_days,
            anonymize_client_ip: self.anonymize_client_ip,
            ignored,
        }
    }

    /// Deletes all statistics: removes the database file, reopens an empty
    /// store and starts a fresh current unit.
    pub fn clear(&self) -> Result<()> {
        if self.state() == EngineState::Stopped {
            return Err(StatsError::ShutDown);
        }

        let old = self.store.lock().take();
        if let Some(store) = old {
            close_store(store)?;
        }

        self.unflushed.lock().take();

        if let Err(e) = UnitStore::remove_files(&self.filename) {
            error!("Removing {}: {}", self.filename.display(), e);
        }

        let store = UnitStore::open(&self.filename)?;
        *self.store.lock() = Some(Arc::new(store));
        *self.current.write() = Some(Unit::new(self.unit_id.current_id()));

        info!("Statistics cleared");
        Ok(())
    }

    /// Same as [`clear`](Self::clear).
    pub fn reset(&self) -> Result<()> {
        self.clear()
    }

    /// Path of the database file.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    fn store_handle(&self) -> Option<Arc<UnitStore>> {
        self.store.lock().clone()
    }

    fn config_modified(&self) {
        if let Some(callback) = &self.on_config_modified {
            callback();
        }
    }
}

// ================================================================================================
// HELPERS
// ================================================================================================

/// Deletes the bucket that just fell out of the window and anything older.
fn evict(tx: &StoreTxn<'_>, new_id: UnitId, hours: u32) -> Result<usize> {
    let Some(expired) = expired_unit_id(new_id, hours) else {
        return Ok(0);
    };

    let mut deleted = 0;
    match tx.delete_bucket(expired) {
        Ok(()) => deleted += 1,
        Err(StatsError::BucketNotFound(id)) => debug!("No unit {} to evict", id),
        Err(e) => return Err(e),
    }

    Ok(deleted + delete_older_than(tx, expired)?)
}

/// Deletes all buckets with an id below `boundary`, walking in key order.
fn delete_older_than(tx: &StoreTxn<'_>, boundary: UnitId) -> Result<usize> {
    let mut deleted = 0;

    for id in tx.bucket_ids()? {
        if id >= boundary {
            break;
        }

        match tx.delete_bucket(id) {
            Ok(()) => deleted += 1,
            Err(StatsError::BucketNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(deleted)
}

fn load_record(tx: &StoreTxn<'_>, id: UnitId) -> Option<UnitRecord> {
    match tx.get(id) {
        Ok(record) => record,
        Err(e) => {
            error!("Loading unit {}: {}", id, e);
            None
        }
    }
}

fn close_store(store: Arc<UnitStore>) -> Result<()> {
    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        // A transaction in flight still holds the handle; the connection
        // closes when it is dropped.
        Err(_) => {
            debug!("Statistics store still in use, closing on drop");
            Ok(())
        }
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn normalize_hosts<I, S>(hosts: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    hosts
        .into_iter()
        .map(|h| normalize_host(&h.into()))
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir, hour: Arc<AtomicU32>) -> EngineConfig {
        EngineConfig {
            filename: dir.path().join("stats.db"),
            unit_id: Arc::new(move || hour.load(Ordering::SeqCst)),
            ..Default::default()
        }
    }

    fn entry(domain: &str, result: FilterResult) -> Entry {
        Entry::new("127.0.0.1", domain, result, Duration::from_millis(1))
    }

    #[test]
    fn test_flush_step_rotates_once_per_hour() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let hour = Arc::new(AtomicU32::new(1_000));
        let engine = Engine::new(config(&tmp_dir, hour.clone())).unwrap();

        engine.update(&entry("example.org", FilterResult::NotFiltered));
        assert_eq!(engine.flush_step(), FlushStep::idle());

        hour.store(1_001, Ordering::SeqCst);
        assert_eq!(engine.flush_step(), FlushStep::busy());
        assert_eq!(engine.flush_step(), FlushStep::idle());

        let stats = engine.store_stats().unwrap();
        assert_eq!(stats.buckets, 1);
        assert_eq!(stats.newest, Some(1_000));
    }

    #[test]
    fn test_parked_unit_is_visible_to_queries() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let hour = Arc::new(AtomicU32::new(2_000));
        let engine = Engine::new(config(&tmp_dir, hour)).unwrap();

        let mut parked = Unit::new(1_999);
        parked.add(FilterResult::Filtered, "ads.example", "10.0.0.1", 10);
        *engine.unflushed.lock() = Some(parked);

        let report = engine.get_report(None).unwrap();
        assert_eq!(report.dns_queries_total, 1);
        assert_eq!(report.blocked_filtering_total, 1);

        // The next step commits it.
        assert_eq!(engine.flush_step(), FlushStep::idle());
        assert!(engine.unflushed.lock().is_none());
        assert_eq!(engine.store_stats().unwrap().newest, Some(1_999));
    }

    #[test]
    fn test_should_count_normalizes_hosts() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config(&tmp_dir, Arc::new(AtomicU32::new(5)))).unwrap();

        engine.set_ignored(["Tracker.Example."]);
        assert!(!engine.should_count("tracker.example"));
        assert!(!engine.should_count("TRACKER.example."));
        assert!(engine.should_count("example.org"));
        assert_eq!(engine.settings().ignored, vec!["tracker.example".to_string()]);
    }

    #[test]
    fn test_new_reports_open_failure() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let blocker = tmp_dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = EngineConfig {
            filename: blocker.join("stats.db"),
            ..Default::default()
        };
        assert!(matches!(Engine::new(config), Err(StatsError::StoreOpen { .. })));
    }

    #[test]
    fn test_new_converts_panic() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            filename: tmp_dir.path().join("stats.db"),
            unit_id: Arc::new(|| -> UnitId { panic!("clock unavailable") }),
            ..Default::default()
        };

        match Engine::new(config) {
            Err(StatsError::Panic(msg)) => assert!(msg.contains("clock unavailable")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
