use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::clean::{
    clean_hours_text, clean_name, clean_phone, collapse_whitespace, extract_domain, extract_zip,
    normalize_address, parse_coordinates, parse_place_id, parse_review_count, slugify, to_float,
};
use crate::types::{Hours, ObservedRecord, Review};

const CACHE_DIR: &str = "cache";
pub const SOURCE: &str = "google_maps";

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static SEL_NAME: LazyLock<Selector> = LazyLock::new(|| selector("h1.DUwDvf"));
static SEL_ADDRESS: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-item-id="address"]"#));
static SEL_PHONE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"button[data-item-id^="phone:tel:"]"#));
static SEL_WEBSITE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"a[data-item-id="authority"]"#));
static SEL_RATING: LazyLock<Selector> = LazyLock::new(|| selector("div.fontDisplayLarge"));
static SEL_EXCERPT: LazyLock<Selector> = LazyLock::new(|| selector("span.wiI7pd"));
static SEL_REVIEW_COUNT: LazyLock<Selector> =
    LazyLock::new(|| selector("div.jANrlb div.fontBodySmall"));
static SEL_HOURS_ROW: LazyLock<Selector> = LazyLock::new(|| selector("table.eK4R0e tr"));
static SEL_HOURS_DAY: LazyLock<Selector> = LazyLock::new(|| selector("td.ylH6lf"));
static SEL_HOURS_TEXT: LazyLock<Selector> = LazyLock::new(|| selector("td.mxowUb"));
static SEL_REVIEW: LazyLock<Selector> = LazyLock::new(|| selector("div.jftiEf"));
static SEL_REVIEWER: LazyLock<Selector> = LazyLock::new(|| selector("div.d4r55"));
static SEL_REVIEW_RATING: LazyLock<Selector> = LazyLock::new(|| selector("span.kvMYJc"));
static SEL_REVIEW_DATE: LazyLock<Selector> = LazyLock::new(|| selector("span.rsqaWe"));
static SEL_REVIEW_TEXT: LazyLock<Selector> = LazyLock::new(|| selector("div.MyEned span.wiI7pd"));
static SEL_REVIEW_TEXT_FALLBACK: LazyLock<Selector> = LazyLock::new(|| selector("div.MyEned"));
static SEL_CANONICAL: LazyLock<Selector> = LazyLock::new(|| selector(r#"link[rel="canonical"]"#));
static SEL_OG_URL: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:url"]"#));

// Page cache, keyed by URL without scheme or query
pub struct CachedClient {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
}

impl CachedClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; PlacesSync/1.0)")
            .build()?;
        Ok(Self {
            client,
            cache_dir: PathBuf::from(CACHE_DIR),
        })
    }

    fn url_to_cache_path(&self, url: &str) -> PathBuf {
        let url = url.split('?').next().unwrap_or(url);
        let stripped = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url)
            .trim_end_matches('/');
        self.cache_dir.join(format!("{}.html", stripped))
    }

    pub fn fetch_text(&self, url: &str) -> Result<String> {
        let cache_path = self.url_to_cache_path(url);

        if cache_path.exists() {
            debug!(url, "cache hit");
            return fs::read_to_string(&cache_path)
                .with_context(|| format!("Failed to read cache: {:?}", cache_path));
        }

        let text = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to fetch: {}", url))?
            .text()
            .with_context(|| format!("Failed to read response: {}", url))?;

        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&cache_path, &text)?;

        Ok(text)
    }
}

fn text_of(el: ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn first_text(scope: ElementRef, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn first_attr<'a>(scope: ElementRef<'a>, sel: &Selector, attr: &str) -> Option<&'a str> {
    scope
        .select(sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Weekly hours table; None when the page has no hours table
fn extract_hours(root: ElementRef) -> Option<Hours> {
    let mut rows = root.select(&SEL_HOURS_ROW).peekable();
    rows.peek()?;

    let mut hours = Hours::closed_week();
    for row in rows {
        let (Some(day), Some(text)) = (
            first_text(row, &SEL_HOURS_DAY),
            first_text(row, &SEL_HOURS_TEXT),
        ) else {
            continue;
        };
        let text = clean_hours_text(&text);
        if !text.is_empty() {
            hours.set(&day, &text);
        }
    }
    Some(hours)
}

fn extract_review(el: ElementRef) -> Option<Review> {
    let reviewer = first_text(el, &SEL_REVIEWER)?;
    let rating_label = first_attr(el, &SEL_REVIEW_RATING, "aria-label")?;
    let rating = rating_label.split_whitespace().next().and_then(to_float)?;
    let body = first_text(el, &SEL_REVIEW_TEXT)
        .or_else(|| first_text(el, &SEL_REVIEW_TEXT_FALLBACK))
        .unwrap_or_default();
    Some(Review {
        reviewer,
        rating: Some(rating),
        date: first_text(el, &SEL_REVIEW_DATE),
        body,
        source_id: el.value().attr("data-review-id").map(str::to_string),
    })
}

/// All parseable reviews on the page and the number that failed to parse
pub fn extract_reviews(document: &Html) -> (Vec<Review>, usize) {
    let mut reviews = Vec::new();
    let mut failed = 0;
    for el in document.select(&SEL_REVIEW) {
        match extract_review(el) {
            Some(review) => reviews.push(review),
            None => failed += 1,
        }
    }
    (reviews, failed)
}

/// Parse a rendered place page. Returns None when the page has no usable
/// name or address.
pub fn extract_place(html: &str, page_url: &str, query: &str) -> Option<ObservedRecord> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let name_raw = first_text(root, &SEL_NAME).unwrap_or_default();
    let name = clean_name(&name_raw);
    let raw_address = first_attr(root, &SEL_ADDRESS, "aria-label")
        .map(str::to_string)
        .or_else(|| first_text(root, &SEL_ADDRESS))
        .unwrap_or_default();
    let address = normalize_address(&raw_address);

    if name.is_empty() || address.is_empty() {
        warn!(url = page_url, "place page missing name or address");
        return None;
    }

    let detail_url = first_attr(root, &SEL_CANONICAL, "href")
        .or_else(|| first_attr(root, &SEL_OG_URL, "content"))
        .unwrap_or(page_url)
        .to_string();

    let website = first_attr(root, &SEL_WEBSITE, "href").map(str::to_string);
    let (reviews, failed_reviews) = extract_reviews(&document);
    if failed_reviews > 0 {
        debug!(name = %name, failed_reviews, "some reviews could not be parsed");
    }
    let review_count = first_text(root, &SEL_REVIEW_COUNT)
        .and_then(|t| parse_review_count(&t))
        .or_else(|| (!reviews.is_empty()).then_some(reviews.len() as u32));

    Some(ObservedRecord {
        query: query.to_string(),
        slug: slugify(&name_raw),
        zip: extract_zip(&address),
        phone: first_attr(root, &SEL_PHONE, "aria-label").and_then(clean_phone),
        website_domain: website.as_deref().and_then(extract_domain),
        website,
        location: parse_coordinates(&detail_url),
        rating: first_text(root, &SEL_RATING).and_then(|t| to_float(&t)),
        review_count,
        hours: extract_hours(root),
        review_excerpt: first_text(root, &SEL_EXCERPT),
        place_id: parse_place_id(&detail_url),
        place_url: Some(detail_url),
        source: SOURCE.to_string(),
        reviews,
        name_raw,
        name,
        address,
    })
}
