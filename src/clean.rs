//! Normalization helpers for scraped place text

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::types::GeoPoint;

static RE_ZIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{5}\b").unwrap());
static RE_PARENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(.*?\)").unwrap());
static RE_HOLIDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(Holiday hours|Hours might differ|Independence Day|Christmas|New Year'?s Day|Labor Day|Easter|Thanksgiving).*",
    )
    .unwrap()
});
static RE_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*").unwrap());
static RE_COORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!3d(-?\d+\.\d+)!4d(-?\d+\.\d+)").unwrap());
static RE_PLACE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!16s%2Fg%2F([^!&]+)").unwrap());

/// Collapse every whitespace run (including NBSP and narrow NBSP) to one space
pub fn collapse_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{202f}')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display name as stored: whitespace collapsed, trailing separators dropped
pub fn clean_name(raw: &str) -> String {
    collapse_whitespace(raw)
        .trim_end_matches(|c: char| matches!(c, '-' | '|' | ',' | '·' | ':') || c.is_whitespace())
        .to_string()
}

/// Lowercase ASCII slug; apostrophes vanish, other runs become a single `-`
pub fn slugify(raw: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in raw.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Phone text from an aria-label like "Phone: (555) 123-4567".
/// Returns None when no digits remain.
pub fn clean_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("Phone:").unwrap_or(raw);
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | '.' | ' '))
        .collect();
    let phone = collapse_whitespace(&kept);
    if phone.chars().any(|c| c.is_ascii_digit()) {
        Some(phone)
    } else {
        None
    }
}

/// Address text from an aria-label like "Address: 12 Main St , Springfield"
pub fn normalize_address(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.strip_prefix("Address:").unwrap_or(raw);
    collapse_whitespace(raw)
        .replace(" ,", ",")
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

/// Last standalone 5-digit group with no digits after it
pub fn extract_zip(address: &str) -> Option<String> {
    let m = RE_ZIP.find_iter(address).last()?;
    if address[m.end()..].chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(m.as_str().to_string())
}

/// Host of a URL, lowercased and without a leading `www.`.
/// Scheme-less input ("acme.com/contact") is accepted.
pub fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = if url.contains("://") {
        Url::parse(url).ok()?
    } else {
        Url::parse(&format!("http://{}", url)).ok()?
    };
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Strip holiday notices and parenthesized notes from an hours cell
pub fn clean_hours_text(raw: &str) -> String {
    let text = RE_PARENS.replace_all(raw, "");
    let text = RE_HOLIDAY.replace_all(&text, "");
    collapse_whitespace(&text)
}

/// First number in text like "1,234 reviews"
pub fn parse_review_count(text: &str) -> Option<u32> {
    let m = RE_COUNT.find(text)?;
    m.as_str().replace(',', "").parse().ok()
}

/// Lenient float parse ("4.7", " 4,7 ")
pub fn to_float(text: &str) -> Option<f64> {
    text.trim().replace(',', ".").parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Coordinates embedded in a place URL as `!3d<lat>!4d<lng>`
pub fn parse_coordinates(url: &str) -> Option<GeoPoint> {
    let caps = RE_COORDS.captures(url)?;
    let lat = caps.get(1)?.as_str().parse().ok()?;
    let lng = caps.get(2)?.as_str().parse().ok()?;
    Some(GeoPoint::new(lat, lng))
}

/// Place id embedded in a place URL as `!16s%2Fg%2F<id>`
pub fn parse_place_id(url: &str) -> Option<String> {
    let caps = RE_PLACE_ID.captures(url)?;
    let raw = caps.get(1)?.as_str();
    let decoded = urlencoding::decode(raw).ok()?;
    let id = decoded.split('?').next().unwrap_or_default();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
