//! # Stats Viewer CLI
//!
//! Command-line tool for inspecting a statistics database offline. The
//! database is opened read-only; no unit is flushed or evicted.
//!
//! Usage:
//!   stats_viewer report [--days N] [--format json|pretty]
//!   stats_viewer top-clients [--days N] [--limit N]
//!   stats_viewer buckets

use clap::{Parser, Subcommand};
use querystats::aggregator::{collect_top_n, load_history, window_first_id, Window};
use querystats::report::Report;
use querystats::retention::{check_interval, retention_hours};
use querystats::{ClientId, HourlyIdGenerator, NameCount, UnitIdGenerator, UnitStore};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stats_viewer")]
#[command(about = "Inspect a DNS query statistics database", long_about = None)]
struct Cli {
    /// Path to the statistics database
    #[arg(short, long, default_value = "./var/data/stats.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the report for a retention window
    Report {
        /// Window length in days (1, 7, 30 or 90)
        #[arg(short, long, default_value_t = 1)]
        days: u32,

        /// Output format: json, pretty
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },

    /// Show the clients with the most requests
    TopClients {
        /// Window length in days (1, 7, 30 or 90)
        #[arg(short, long, default_value_t = 1)]
        days: u32,

        /// Maximum number of clients to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Show persisted buckets
    Buckets,
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();

    if !cli.db.exists() {
        return Err(format!("database not found: {}", cli.db.display()));
    }

    let store = UnitStore::open_read_only(&cli.db).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::Report { days, format } => {
            let window = load(&store, days)?;
            let report = Report::build(&window, &HashSet::new());

            match format.as_str() {
                "json" => {
                    let json =
                        serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
                    println!("{}", json);
                }
                _ => print_report(&report, days),
            }
        }

        Commands::TopClients { days, limit } => {
            let window = load(&store, days)?;
            let top = collect_top_n(window.records(), limit, |r| &r.clients, &HashSet::new());

            println!("Top {} clients over {} days:\n", limit, days);
            for (i, pair) in top.iter().enumerate() {
                let client = ClientId::parse(&pair.name);
                let kind = if client.ip().is_some() { "ip" } else { "id" };
                println!("{:>3}. {:<40} {:>10}  ({})", i + 1, client, pair.count, kind);
            }
        }

        Commands::Buckets => {
            let stats = store.stats().map_err(|e| e.to_string())?;

            println!("Statistics Database\n");
            println!("Path:      {}", stats.path.display());
            println!("Buckets:   {}", stats.buckets);
            match (stats.oldest, stats.newest) {
                (Some(oldest), Some(newest)) => {
                    println!("Oldest:    hour {} ({})", oldest, hour_to_string(oldest));
                    println!("Newest:    hour {} ({})", newest, hour_to_string(newest));
                }
                _ => println!("(empty)"),
            }
        }
    }

    Ok(())
}

/// Loads the persisted window ending at the current hour. The current hour
/// comes from the store too, as written by the last flush or shutdown.
fn load(store: &UnitStore, days: u32) -> Result<Window, String> {
    if days == 0 || !check_interval(days) {
        return Err(format!("unsupported window: {} days", days));
    }

    let hours = retention_hours(days);
    let cur_id = HourlyIdGenerator.current_id();
    let first_id = window_first_id(cur_id, hours);

    let records = store
        .view(|tx| load_history(tx, first_id, hours))
        .map_err(|e| e.to_string())?;

    Ok(Window::new(records, first_id, hours))
}

fn print_report(report: &Report, days: u32) {
    println!("═══════════════════════════════════════════════════════════");
    println!("Statistics for the last {} days", days);
    println!("═══════════════════════════════════════════════════════════\n");

    println!("DNS queries:            {}", report.dns_queries_total);
    println!("Blocked by filters:     {}", report.blocked_filtering_total);
    println!("Safe browsing:          {}", report.replaced_safebrowsing_total);
    println!("Safe search:            {}", report.replaced_safesearch_total);
    println!("Parental control:       {}", report.replaced_parental_total);
    println!(
        "Avg processing time:    {:.3} ms",
        report.avg_processing_time * 1000.0
    );

    println!("\n───────────────────────────────────────────────────────────");
    println!("Queries per {}", report.time_units.as_str());
    println!("───────────────────────────────────────────────────────────\n");

    let peak = report.dns_queries.iter().copied().max().unwrap_or(0);
    for (i, count) in report.dns_queries.iter().enumerate() {
        let width = if peak == 0 { 0 } else { (count * 40 / peak) as usize };
        println!("{:>4} {:>10} {}", i, count, "█".repeat(width));
    }

    print_top("Top queried domains", &report.top_domains);
    print_top("Top blocked domains", &report.top_blocked_domains);
    print_top("Top clients", &report.top_clients);

    println!("\n═══════════════════════════════════════════════════════════\n");
}

fn print_top(title: &str, pairs: &[NameCount]) {
    println!("\n───────────────────────────────────────────────────────────");
    println!("{}", title);
    println!("───────────────────────────────────────────────────────────\n");

    if pairs.is_empty() {
        println!("(none)");
        return;
    }

    for pair in pairs.iter().take(10) {
        println!("{:<48} {:>10}", pair.name, pair.count);
    }
}

fn hour_to_string(hour: u32) -> String {
    let secs = u64::from(hour) * 3600;
    let days = secs / 86_400;
    let hh = (secs % 86_400) / 3600;
    format!("day {} since epoch, {:02}:00 UTC", days, hh)
}
