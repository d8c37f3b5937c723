//! CSV export of the places scraped for one search query

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::ObservedRecord;

pub const SEARCH_PREFIX: &str = "garage door repair";

const HEADERS: [&str; 20] = [
    "Search Query",
    "Name Raw",
    "Name",
    "Slug",
    "Address",
    "ZIP",
    "Phone",
    "Rating",
    "Website",
    "Website Domain",
    "Google Place URL",
    "Latitude",
    "Longitude",
    "Place ID",
    "Hours",
    "review_excerpt",
    "review_count",
    "reviews_scraped",
    "Source",
    "Exported At",
];

pub fn city_query(name: &str, state: &str) -> String {
    format!("{} {} {}", SEARCH_PREFIX, name.trim(), state.trim())
}

/// "garage door repair Springfield, IL" -> "Springfield_IL"
pub fn query_city(query: &str) -> String {
    query
        .replace(SEARCH_PREFIX, "")
        .trim()
        .replace(' ', "_")
        .replace(',', "")
}

/// "garage door repair Springfield, IL" -> "GDH_Springfield_IL.csv"
pub fn csv_file_name(query: &str) -> String {
    let city = query_city(query);
    if city.is_empty() {
        "GDH_places.csv".to_string()
    } else {
        format!("GDH_{}.csv", city)
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Write one row per record to `dir/file_name`, creating `dir` if needed.
/// Phone and ZIP are written as text so leading zeros survive.
pub fn save_to_csv(records: &[ObservedRecord], dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
    let path = dir.join(file_name);

    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    wtr.write_record(HEADERS)?;

    let exported_at = chrono::Utc::now().to_rfc3339();
    for r in records {
        wtr.write_record([
            r.query.clone(),
            r.name_raw.clone(),
            r.name.clone(),
            r.slug.clone(),
            r.address.clone(),
            opt(&r.zip),
            opt(&r.phone),
            opt(&r.rating),
            opt(&r.website),
            opt(&r.website_domain),
            opt(&r.place_url),
            r.location.map(|p| p.lat.to_string()).unwrap_or_default(),
            r.location.map(|p| p.lng.to_string()).unwrap_or_default(),
            opt(&r.place_id),
            r.hours
                .as_ref()
                .map(|h| h.to_json())
                .unwrap_or_else(|| "Unavailable".to_string()),
            opt(&r.review_excerpt),
            opt(&r.review_count),
            r.reviews.len().to_string(),
            r.source.clone(),
            exported_at.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(path)
}
