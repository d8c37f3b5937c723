use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::export::{city_query, csv_file_name, query_city, save_to_csv};
use crate::matcher::{MatchConfig, Snapshot};
use crate::reconcile::{process_observed, RunStats};
use crate::scrape::{extract_place, CachedClient};
use crate::store::{OrganizationStore, SqliteStore};

/// Where place pages come from
#[derive(Debug, Clone)]
pub enum PageSource {
    /// Saved `.html` pages, processed in file name order
    Dir(PathBuf),
    /// Text file with one place URL per line; `#` starts a comment
    Urls(PathBuf),
}

/// One search query and the pages scraped for it
#[derive(Debug, Clone)]
pub struct QueryPages {
    pub query: String,
    pub source: PageSource,
}

pub struct SyncOptions {
    pub db: String,
    pub source: PageSource,
    pub query: String,
    /// Run one query per row of the `cities` table, reading each city's
    /// pages from `<html-dir>/<City_ST>/`
    pub by_city: bool,
    pub output_dir: PathBuf,
    pub export: bool,
    /// Pages per query
    pub limit: Option<usize>,
    pub config: MatchConfig,
}

/// Page locations in processing order
fn list_pages(source: &PageSource) -> Result<Vec<String>> {
    match source {
        PageSource::Dir(dir) => {
            let mut paths: Vec<PathBuf> = fs::read_dir(dir)
                .with_context(|| format!("Failed to read page dir: {}", dir.display()))?
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().map_or(false, |e| e == "html" || e == "htm"))
                .collect();
            paths.sort();
            Ok(paths
                .into_iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect())
        }
        PageSource::Urls(file) => {
            let content = fs::read_to_string(file)
                .with_context(|| format!("Failed to read URL list: {}", file.display()))?;
            Ok(content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect())
        }
    }
}

fn load_page(source: &PageSource, location: &str, client: Option<&CachedClient>) -> Result<String> {
    match (source, client) {
        (PageSource::Urls(_), Some(client)) => client.fetch_text(location),
        _ => fs::read_to_string(Path::new(location))
            .with_context(|| format!("Failed to read page: {}", location)),
    }
}

/// Queries to run, in order. City mode skips cities with no page directory.
pub fn plan_queries(store: &SqliteStore, options: &SyncOptions) -> Result<Vec<QueryPages>> {
    if !options.by_city {
        return Ok(vec![QueryPages {
            query: options.query.clone(),
            source: options.source.clone(),
        }]);
    }

    let PageSource::Dir(root) = &options.source else {
        bail!("--by-city reads pages from --html-dir");
    };
    let cities = store.cities().context("Failed to load cities")?;
    if cities.is_empty() {
        bail!("No cities in {}. Add some with 'add-city'.", options.db);
    }

    let mut jobs = Vec::new();
    for (name, state) in &cities {
        let query = city_query(name, state);
        let dir = root.join(query_city(&query));
        if !dir.is_dir() {
            warn!(query = %query, dir = %dir.display(), "no page directory for city");
            continue;
        }
        jobs.push(QueryPages {
            query,
            source: PageSource::Dir(dir),
        });
    }
    info!(cities = cities.len(), queries = jobs.len(), "planned city queries");
    Ok(jobs)
}

/// Extract, reconcile and export the pages of one query. Returns the number
/// of pages read.
fn sync_query<S: OrganizationStore>(
    store: &S,
    snapshot: &mut Snapshot,
    job: &QueryPages,
    client: Option<&CachedClient>,
    options: &SyncOptions,
    stats: &mut RunStats,
) -> Result<usize> {
    let mut pages = list_pages(&job.source)?;
    if let Some(limit) = options.limit {
        pages.truncate(limit);
    }
    if pages.is_empty() {
        warn!(query = %job.query, "no place pages for query");
        return Ok(0);
    }

    info!(query = %job.query, pages = pages.len(), "searching");
    let total = pages.len();
    let mut scraped = Vec::new();

    for (i, location) in pages.iter().enumerate() {
        let html = match load_page(&job.source, location, client) {
            Ok(html) => html,
            Err(e) => {
                warn!(page = %location, error = %e, "failed to load page");
                stats.failed += 1;
                continue;
            }
        };

        let Some(observed) = extract_place(&html, location, &job.query) else {
            stats.skipped += 1;
            continue;
        };

        info!("[{:02}/{:02}] Processing: {}", i + 1, total, observed.name);
        process_observed(&observed, snapshot, store, &options.config, stats);
        scraped.push(observed);
    }

    if options.export && !scraped.is_empty() {
        let file_name = csv_file_name(&job.query);
        match save_to_csv(&scraped, &options.output_dir, &file_name) {
            Ok(path) => println!("Saved {} rows to {}", scraped.len(), path.display()),
            Err(e) => warn!(error = %e, "CSV save failed"),
        }
    }

    Ok(total)
}

/// Run every query against `store`, sharing one snapshot so places found by
/// an earlier query are matched by later ones
pub fn sync_queries<S: OrganizationStore>(
    store: &S,
    jobs: &[QueryPages],
    options: &SyncOptions,
) -> Result<RunStats> {
    let mut snapshot = Snapshot::new(
        store
            .load_all_organizations()
            .context("Failed to load existing organizations")?,
    );
    if snapshot.is_empty() {
        info!("no known organizations, every place will be inserted");
    } else {
        info!(organizations = snapshot.len(), "loaded snapshot");
    }

    let client = if jobs.iter().any(|j| matches!(j.source, PageSource::Urls(_))) {
        Some(CachedClient::new()?)
    } else {
        None
    };

    let mut stats = RunStats::default();
    let mut pages = 0;
    for job in jobs {
        pages += sync_query(store, &mut snapshot, job, client.as_ref(), options, &mut stats)?;
    }
    if pages == 0 {
        bail!("No place pages found in {:?}", options.source);
    }

    Ok(stats)
}

pub fn run_sync(options: &SyncOptions) -> Result<()> {
    let store = SqliteStore::open(&options.db)
        .with_context(|| format!("Failed to open database: {}", options.db))?;

    let jobs = plan_queries(&store, options)?;
    let stats = sync_queries(&store, &jobs, options)?;

    println!("Done! {}", stats.summary());
    println!("{} organizations in {}", store.count_organizations()?, options.db);
    Ok(())
}
