//! FeatureLab CLI — feature tables, snapshots and cache management.
//!
//! Commands:
//! - `features` — build the feature table for a date range, optionally export it
//! - `snapshot list|show|combine` — inspect snapshots, join one onto a dated CSV
//! - `cache status` — report entry count, size and TTL
//! - `cache clear` — remove every cache entry

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use featurelab_core::{CacheStore, FeatureConfig, FeatureOrchestrator, FeatureTable};
use featurelab_runner::SnapshotStore;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const API_KEY_ENV: &str = "CALENDARIFIC_API_KEY";

#[derive(Parser)]
#[command(
    name = "featurelab",
    version,
    about = "FeatureLab CLI — cached external features for time-series forecasting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the feature table for an inclusive date range.
    Features {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cache directory. Overrides the config file.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Two-letter country code for holidays. Overrides the config file.
        #[arg(long)]
        country: Option<String>,

        /// Export the table as a snapshot with this name.
        #[arg(long)]
        export: Option<String>,

        /// Snapshot directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Replace an existing snapshot of the same name.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Snapshot commands.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List snapshots in the data directory.
    List {
        /// Snapshot directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Show rows, columns and date range of one snapshot.
    Show {
        name: String,

        /// Snapshot directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Left-join a dated CSV with a snapshot.
    Combine {
        /// CSV file to enrich.
        #[arg(long)]
        input: PathBuf,

        /// Snapshot name.
        #[arg(long)]
        snapshot: String,

        /// Name of the date column in the input.
        #[arg(long, default_value = "date")]
        date_column: String,

        /// Output name; written as {data_dir}/{output}.csv.
        #[arg(long)]
        output: String,

        /// Snapshot directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report entry count, total size and TTL.
    Status {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cache directory. Overrides the config file.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Remove every cache entry.
    Clear {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cache directory. Overrides the config file.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Features {
            start,
            end,
            config,
            cache_dir,
            country,
            export,
            data_dir,
            overwrite,
        } => {
            let config = load_config(config.as_deref(), cache_dir, country)?;
            run_features(&config, &start, &end, export.as_deref(), &data_dir, overwrite)
        }
        Commands::Snapshot { action } => match action {
            SnapshotAction::List { data_dir } => run_snapshot_list(&data_dir),
            SnapshotAction::Show { name, data_dir } => run_snapshot_show(&data_dir, &name),
            SnapshotAction::Combine {
                input,
                snapshot,
                date_column,
                output,
                data_dir,
            } => {
                let store = SnapshotStore::new(data_dir);
                let path = store.combine(&input, &snapshot, &date_column, &output)?;
                println!("Combined dataset written to: {}", path.display());
                Ok(())
            }
        },
        Commands::Cache { action } => match action {
            CacheAction::Status { config, cache_dir } => {
                let config = load_config(config.as_deref(), cache_dir, None)?;
                run_cache_status(&CacheStore::from_config(&config.cache))
            }
            CacheAction::Clear { config, cache_dir } => {
                let config = load_config(config.as_deref(), cache_dir, None)?;
                let cache = CacheStore::from_config(&config.cache);
                let removed = cache.clear();
                println!(
                    "Removed {removed} entries from {}",
                    cache.cache_dir().display()
                );
                Ok(())
            }
        },
    }
}

/// Logs go to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file (or defaults), then CLI flags, then the API key from the
/// environment.
fn load_config(
    path: Option<&Path>,
    cache_dir: Option<PathBuf>,
    country: Option<String>,
) -> Result<FeatureConfig> {
    let mut config = match path {
        Some(path) => FeatureConfig::from_file(path)?,
        None => FeatureConfig::default(),
    };
    if let Some(dir) = cache_dir {
        config.cache.dir = dir;
    }
    if let Some(country) = country {
        config.holidays.country_code = country;
    }
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            config.holidays.api_key = Some(key.trim().to_string());
        }
    }
    config.validate()?;
    Ok(config)
}

fn parse_date(s: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("--{flag} must be YYYY-MM-DD, got '{s}'"))
}

fn run_features(
    config: &FeatureConfig,
    start: &str,
    end: &str,
    export: Option<&str>,
    data_dir: &Path,
    overwrite: bool,
) -> Result<()> {
    let start = parse_date(start, "start")?;
    let end = parse_date(end, "end")?;
    if start > end {
        bail!("--start {start} is after --end {end}");
    }

    let store = SnapshotStore::new(data_dir);
    if let Some(name) = export {
        // Fail before any fetching if the export would be refused anyway
        if store.exists(name) && !overwrite {
            bail!(
                "snapshot '{name}' already exists at {}; pass --overwrite to replace it",
                store.path_for(name).display()
            );
        }
    }

    let orchestrator = FeatureOrchestrator::from_config(config)?;
    info!(
        %start,
        %end,
        country = %config.holidays.country_code,
        sources = ?orchestrator.source_names(),
        "building feature table"
    );
    let table = orchestrator.features_for_range(start, end)?;
    print_summary(&table);

    if let Some(name) = export {
        let path = store.export(&table, name, overwrite)?;
        println!("Snapshot saved to: {}", path.display());
    }
    Ok(())
}

fn run_snapshot_list(data_dir: &Path) -> Result<()> {
    let store = SnapshotStore::new(data_dir);
    let names = store.list()?;
    if names.is_empty() {
        println!("No snapshots in {}", data_dir.display());
        return Ok(());
    }

    println!("Snapshots: {}", data_dir.display());
    println!();
    println!("{:<24} {:>6} {:<25} {:>10}", "Name", "Rows", "Date Range", "Size");
    println!("{}", "-".repeat(68));
    for name in &names {
        match store.info(name) {
            Ok(info) => println!(
                "{:<24} {:>6} {:<25} {:>10}",
                info.name,
                info.rows,
                format_range(info.first_date, info.last_date),
                format_size(info.size_bytes)
            ),
            Err(e) => println!("{name:<24} (unreadable: {e})"),
        }
    }
    Ok(())
}

fn run_snapshot_show(data_dir: &Path, name: &str) -> Result<()> {
    let store = SnapshotStore::new(data_dir);
    let info = store.info(name)?;
    println!("Snapshot: {}", info.name);
    println!("Path: {}", info.path.display());
    println!("Rows: {}", info.rows);
    println!("Date range: {}", format_range(info.first_date, info.last_date));
    println!("Size: {}", format_size(info.size_bytes));
    println!("Columns ({}):", info.columns.len());
    for column in &info.columns {
        println!("  {column}");
    }
    Ok(())
}

fn run_cache_status(cache: &CacheStore) -> Result<()> {
    let stats = cache.stats();
    if stats.count == 0 {
        println!("Cache is empty: {}", stats.cache_dir.display());
        return Ok(());
    }
    println!("Cache: {}", stats.cache_dir.display());
    println!("Entries: {}", stats.count);
    println!("Total size: {}", format_size(stats.total_size_bytes));
    println!("TTL: {}h", stats.ttl.as_secs() / 3600);
    Ok(())
}

fn format_range(first: Option<NaiveDate>, last: Option<NaiveDate>) -> String {
    match (first, last) {
        (Some(a), Some(b)) => format!("{a} to {b}"),
        _ => "(empty)".into(),
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn print_summary(table: &FeatureTable) {
    println!();
    println!("=== Feature Table ===");
    println!(
        "Range:    {}",
        format_range(table.first_date(), table.last_date())
    );
    println!("Rows:     {}", table.len());
    println!("Columns:  {}", table.columns().len());
    println!();
    println!("{:<26} {:>10} {:>10} {:>10}", "Feature", "Min", "Mean", "Max");
    println!("{}", "-".repeat(59));
    for name in table.feature_names() {
        let values: Vec<f64> = table
            .rows()
            .iter()
            .filter_map(|r| r.features.get(&name))
            .collect();
        if values.is_empty() {
            continue;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        println!("{name:<26} {min:>10.3} {mean:>10.3} {max:>10.3}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_features_command() {
        let cli = Cli::try_parse_from([
            "featurelab",
            "features",
            "--start",
            "2025-01-01",
            "--end",
            "2025-01-31",
            "--export",
            "jan",
            "--overwrite",
        ])
        .unwrap();
        match cli.command {
            Commands::Features {
                start,
                export,
                overwrite,
                data_dir,
                ..
            } => {
                assert_eq!(start, "2025-01-01");
                assert_eq!(export.as_deref(), Some("jan"));
                assert!(overwrite);
                assert_eq!(data_dir, PathBuf::from("data"));
            }
            _ => panic!("expected features command"),
        }
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1_048_576), "5.0 MB");
    }

    #[test]
    fn bad_date_is_reported_with_flag() {
        let err = parse_date("01/02/2025", "start").unwrap_err();
        assert!(err.to_string().contains("--start"));
    }

    #[test]
    fn cli_flags_override_config() {
        let dir = std::env::temp_dir().join("featurelab-cli-override");
        let config = load_config(None, Some(dir.clone()), Some("AT".into())).unwrap();
        assert_eq!(config.cache.dir, dir);
        assert_eq!(config.holidays.country_code, "AT");
    }

    #[test]
    fn invalid_country_is_rejected() {
        assert!(load_config(None, None, Some("Germany".into())).is_err());
    }
}
