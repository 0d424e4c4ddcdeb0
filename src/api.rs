//! HTTP surface seam.
//!
//! The engine does not run a server. On start it hands each endpoint to an
//! [`EndpointRegistry`] supplied by the host, together with a handle to the
//! engine. [`dispatch`] maps a request body to the JSON the dashboard
//! expects, so registries only need to route bytes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{Result, StatsError};

/// Statistics endpoints exposed to the web layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Full report for the retention window.
    Stats,
    /// Clears all statistics.
    Reset,
    /// Changes the retention interval.
    Config,
    /// Returns the retention interval.
    Info,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Stats,
        Endpoint::Reset,
        Endpoint::Config,
        Endpoint::Info,
    ];

    pub fn method(self) -> &'static str {
        match self {
            Endpoint::Stats | Endpoint::Info => "GET",
            Endpoint::Reset | Endpoint::Config => "POST",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Stats => "/control/stats",
            Endpoint::Reset => "/control/stats_reset",
            Endpoint::Config => "/control/stats_config",
            Endpoint::Info => "/control/stats_info",
        }
    }
}

/// Receives endpoint registrations when the engine starts.
pub trait EndpointRegistry: Send + Sync {
    fn register(&self, endpoint: Endpoint, engine: Arc<Engine>);
}

/// Body of the config and info endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsInfo {
    /// Retention in days.
    pub interval: u32,
}

/// Handles one request. Returns the JSON response body, if any.
pub fn dispatch(engine: &Engine, endpoint: Endpoint, body: &[u8]) -> Result<Option<String>> {
    let to_json = |value: serde_json::Result<String>| {
        value.map(Some).map_err(|e| StatsError::Codec(e.to_string()))
    };

    match endpoint {
        Endpoint::Stats => to_json(serde_json::to_string(&engine.get_report(None)?)),
        Endpoint::Info => to_json(serde_json::to_string(&StatsInfo {
            interval: engine.retention_days(),
        })),
        Endpoint::Reset => {
            engine.reset()?;
            Ok(None)
        }
        Endpoint::Config => {
            let info: StatsInfo = serde_json::from_slice(body)
                .map_err(|e| StatsError::InvalidEntry(format!("config body: {}", e)))?;
            engine.set_retention(info.interval)?;
            Ok(None)
        }
    }
}
