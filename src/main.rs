use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod clean;
mod export;
mod fuzz;
mod matcher;
mod reconcile;
mod scrape;
mod store;
mod sync;
mod types;

use matcher::{MatchConfig, DEFAULT_GEO_TOLERANCE, DEFAULT_NAME_THRESHOLD};
use store::{OrganizationStore, SqliteStore};
use sync::{PageSource, SyncOptions};

pub const DEFAULT_DB: &str = "places.db";
pub const DEFAULT_OUTPUT_DIR: &str = "./scraped-data";

#[derive(Parser)]
#[command(name = "places-sync")]
#[command(about = "Scrape Google Maps place pages and reconcile them with known organizations")]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract place pages and insert/update organizations and reviews
    Sync {
        /// SQLite database file
        #[arg(long, env = "PLACES_DB", default_value = DEFAULT_DB)]
        db: String,
        /// Directory of saved place pages (*.html)
        #[arg(long, value_name = "DIR")]
        html_dir: Option<PathBuf>,
        /// File with one place URL per line
        #[arg(long, value_name = "FILE", conflicts_with = "html_dir")]
        urls: Option<PathBuf>,
        /// Search query the pages came from (names the CSV export)
        #[arg(long, default_value = "")]
        query: String,
        /// One query per city in the database; pages under <html-dir>/<City_ST>/
        #[arg(long, requires = "html_dir", conflicts_with = "query")]
        by_city: bool,
        /// Directory for CSV exports
        #[arg(long, env = "GOOGLE_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,
        /// Skip the CSV export
        #[arg(long)]
        no_export: bool,
        /// Process at most N pages per query
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum token-set name similarity (0-100)
        #[arg(long, default_value_t = DEFAULT_NAME_THRESHOLD)]
        name_threshold: u8,
        /// Max latitude and longitude difference in degrees
        #[arg(long, default_value_t = DEFAULT_GEO_TOLERANCE)]
        geo_tolerance: f64,
    },
    /// Add a city to search with `sync --by-city`
    AddCity {
        /// SQLite database file
        #[arg(long, env = "PLACES_DB", default_value = DEFAULT_DB)]
        db: String,
        /// City name, e.g. "Des Moines"
        name: String,
        /// State abbreviation, e.g. "IA"
        state: String,
    },
    /// List known organizations
    Orgs {
        /// SQLite database file
        #[arg(long, env = "PLACES_DB", default_value = DEFAULT_DB)]
        db: String,
    },
    /// Clean generated files (default database, cache/ folder)
    Clean,
}

pub fn init_database(conn: &Connection) -> rusqlite::Result<()> {
    let schema = include_str!("../schema.sql");
    conn.execute_batch(schema)
}

/// Global fmt subscriber; `RUST_LOG` overrides the default filter
fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

fn run_orgs(db: &str) -> Result<()> {
    if !Path::new(db).exists() {
        bail!("Database {} not found. Run 'sync' first.", db);
    }
    let store = SqliteStore::open(db)?;
    let orgs = store.load_all_organizations()?;
    for org in &orgs {
        println!(
            "{:>6}  {}  [{}]  {}  {}  ({} reviews)",
            org.id,
            org.name,
            org.phones.join(", "),
            org.website.as_deref().unwrap_or("-"),
            org.addresses.address().unwrap_or("-"),
            store.count_reviews(org.id)?
        );
    }
    println!("{} organizations", orgs.len());
    Ok(())
}

fn run_add_city(db: &str, name: &str, state: &str) -> Result<()> {
    let store = SqliteStore::open(db)?;
    if store.add_city(name, state)? {
        println!("Added {} {}", name, state);
    } else {
        println!("{} {} already listed", name, state);
    }
    println!("{} cities in {}", store.cities()?.len(), db);
    Ok(())
}

fn run_clean() -> Result<()> {
    println!("Cleaning generated files...");

    let db_path = Path::new(DEFAULT_DB);
    if db_path.exists() {
        fs::remove_file(db_path)?;
        println!("  Removed {}", DEFAULT_DB);
    }

    let cache_path = Path::new("cache");
    if cache_path.exists() {
        fs::remove_dir_all(cache_path)?;
        println!("  Removed cache/");
    }

    println!("Clean complete!");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.quiet { "warn" } else { "info" })?;

    match cli.command {
        Commands::Sync {
            db,
            html_dir,
            urls,
            query,
            by_city,
            output_dir,
            no_export,
            limit,
            name_threshold,
            geo_tolerance,
        } => {
            let source = match (html_dir, urls) {
                (Some(dir), _) => PageSource::Dir(dir),
                (None, Some(file)) => PageSource::Urls(file),
                (None, None) => bail!("one of --html-dir or --urls is required"),
            };
            sync::run_sync(&SyncOptions {
                db,
                source,
                query,
                by_city,
                output_dir,
                export: !no_export,
                limit,
                config: MatchConfig {
                    name_threshold,
                    geo_tolerance,
                },
            })
        }
        Commands::AddCity { db, name, state } => run_add_city(&db, &name, &state),
        Commands::Orgs { db } => run_orgs(&db),
        Commands::Clean => run_clean(),
    }
}
