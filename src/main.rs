//! # Query Statistics Server
//!
//! Runs the statistics engine as a standalone process: opens the database,
//! starts the flush loop and persists the current hour on Ctrl-C.
//!
//! Environment:
//! - `STATS_DB_PATH`: database file (default `./var/data/stats.db`)
//! - `STATS_RETENTION_DAYS`: retention in days (default 1)

use querystats::{Engine, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=================================================");
    println!("  Query Statistics Engine                        ");
    println!("=================================================");
    println!();

    let mut config = EngineConfig::default();
    if let Ok(path) = std::env::var("STATS_DB_PATH") {
        config.filename = PathBuf::from(path);
    }
    if let Ok(days) = std::env::var("STATS_RETENTION_DAYS") {
        config.retention_days = days
            .parse()
            .map_err(|e| format!("invalid STATS_RETENTION_DAYS '{}': {}", days, e))?;
    }

    println!("Opening statistics database...");
    let engine = match Engine::new(config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("✗ Failed to initialize statistics engine: {}", e);
            return Err(e.into());
        }
    };
    println!("✓ Engine initialized");
    println!("  - Database: {}", engine.filename().display());
    println!("  - Retention: {} days", engine.retention_days());

    let stats = engine.store_stats()?;
    println!("  - Persisted hours: {}", stats.buckets);
    println!();

    engine.start()?;
    println!("Flush loop running, press Ctrl-C to stop");
    println!();

    tokio::signal::ctrl_c().await?;

    println!("Shutting down...");
    engine.shutdown().await?;

    println!("=================================================");
    println!("  Statistics Engine Shut Down");
    println!("=================================================");

    Ok(())
}
