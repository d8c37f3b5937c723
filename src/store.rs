//! SQLite-backed organization and review storage

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::init_database;
use crate::types::{AddressPayload, OrganizationFields, OrganizationRecord, Review};

pub const REVIEW_SOURCE: &str = "google_maps";

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("organization {0} not found")]
    NotFound(i64),
}

/// Read and write access to known organizations and their reviews
pub trait OrganizationStore {
    /// Every organization, in id order. Called once per run.
    fn load_all_organizations(&self) -> Result<Vec<OrganizationRecord>>;

    fn organization_exists(&self, id: i64) -> Result<bool>;

    /// Insert a new organization and return its id
    fn insert_organization(&self, fields: &OrganizationFields) -> Result<i64>;

    /// Overwrite the mutable columns of an existing organization
    fn update_organization(&self, id: i64, fields: &OrganizationFields) -> Result<()>;

    /// Returns false when a review with the same source id is already stored
    /// or the review has no source id.
    fn insert_review(&self, review: &Review, org_id: i64) -> Result<bool>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_database(&conn)?;
        Ok(Self { conn })
    }

    pub fn count_reviews(&self, org_id: i64) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM reviews WHERE org_id = ?1",
            [org_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Returns false when the city is already listed
    pub fn add_city(&self, name: &str, state: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO cities (name, state) VALUES (?1, ?2)
             ON CONFLICT(name, state) DO NOTHING",
            params![name.trim(), state.trim()],
        )?;
        Ok(inserted > 0)
    }

    /// (name, state) pairs in insertion order
    pub fn cities(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("SELECT name, state FROM cities ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let cities = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cities)
    }

    pub fn count_organizations(&self) -> Result<u32> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM organizations", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Phones column: a JSON array, or legacy plain text holding one number
fn decode_phones(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(phones) => phones,
        Err(_) if raw.trim().is_empty() => Vec::new(),
        Err(_) => vec![raw.trim().to_string()],
    }
}

/// Column values shared by insert and update, in statement order
struct Columns {
    phones: String,
    addresses: String,
    source_ids: String,
    ids: String,
    hours: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl Columns {
    fn from_fields(fields: &OrganizationFields) -> Result<Self> {
        Ok(Self {
            phones: serde_json::to_string(&fields.phones)?,
            addresses: fields.addresses.serialized(),
            source_ids: json!({ "google_place_id": fields.place_id }).to_string(),
            ids: json!({ "external": fields.place_id }).to_string(),
            hours: fields.hours.as_ref().map(|h| h.to_json()),
            latitude: fields.location.map(|p| p.lat),
            longitude: fields.location.map(|p| p.lng),
        })
    }
}

impl OrganizationStore for SqliteStore {
    fn load_all_organizations(&self) -> Result<Vec<OrganizationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, phones, website, addresses FROM organizations ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let phones: Option<String> = row.get(2)?;
            let addresses: Option<String> = row.get(4)?;
            Ok(OrganizationRecord {
                id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                phones: decode_phones(phones.as_deref().unwrap_or("")),
                website: row.get(3)?,
                addresses: AddressPayload::from_column(addresses.as_deref().unwrap_or("")),
            })
        })?;
        let orgs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orgs)
    }

    fn organization_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM organizations WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_organization(&self, fields: &OrganizationFields) -> Result<i64> {
        let cols = Columns::from_fields(fields)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO organizations (
                name, name_raw, slug, phones, website, addresses,
                google_rating, review_count, avg_rating, source_ids, ids, hours,
                google_id, review_excerpt, latitude, longitude,
                google_place_url, website_domain, source, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?7, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
            params![
                fields.name,
                fields.name_raw,
                fields.slug,
                cols.phones,
                fields.website,
                cols.addresses,
                fields.rating,
                fields.review_count,
                cols.source_ids,
                cols.ids,
                cols.hours,
                fields.place_id,
                fields.review_excerpt,
                cols.latitude,
                cols.longitude,
                fields.place_url,
                fields.website_domain,
                fields.source,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_organization(&self, id: i64, fields: &OrganizationFields) -> Result<()> {
        let cols = Columns::from_fields(fields)?;
        let now = chrono::Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE organizations SET
                name = ?1, name_raw = ?2, slug = ?3, phones = ?4, website = ?5, addresses = ?6,
                google_rating = ?7, review_count = ?8, avg_rating = ?7, source_ids = ?9, ids = ?10,
                hours = ?11, google_id = ?12, review_excerpt = ?13, latitude = ?14, longitude = ?15,
                google_place_url = ?16, website_domain = ?17, source = ?18, updated_at = ?19
             WHERE id = ?20",
            params![
                fields.name,
                fields.name_raw,
                fields.slug,
                cols.phones,
                fields.website,
                cols.addresses,
                fields.rating,
                fields.review_count,
                cols.source_ids,
                cols.ids,
                cols.hours,
                fields.place_id,
                fields.review_excerpt,
                cols.latitude,
                cols.longitude,
                fields.place_url,
                fields.website_domain,
                fields.source,
                now,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn insert_review(&self, review: &Review, org_id: i64) -> Result<bool> {
        let Some(source_id) = review.source_id.as_deref().filter(|s| !s.is_empty()) else {
            debug!(org_id, reviewer = %review.reviewer, "review without source id skipped");
            return Ok(false);
        };
        let inserted = self.conn.execute(
            "INSERT INTO reviews (org_id, reviewer, rating, review_date, review, source, source_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source_id) DO NOTHING",
            params![
                org_id,
                review.reviewer,
                review.rating,
                review.date,
                review.body,
                REVIEW_SOURCE,
                source_id,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoPoint, Hours, ObservedRecord};

    fn fields(name: &str, phone: &str) -> OrganizationFields {
        let observed = ObservedRecord {
            name_raw: name.to_string(),
            name: name.to_string(),
            slug: crate::clean::slugify(name),
            address: "123 Main St, Springfield, IL 62701".to_string(),
            zip: Some("62701".to_string()),
            phone: Some(phone.to_string()),
            website: Some("https://www.joes.com".to_string()),
            website_domain: Some("joes.com".to_string()),
            location: Some(GeoPoint::new(39.78, -89.65)),
            rating: Some(4.8),
            review_count: Some(2),
            hours: Some(Hours::closed_week()),
            place_id: Some("11abc".to_string()),
            source: REVIEW_SOURCE.to_string(),
            ..Default::default()
        };
        OrganizationFields::from_observed(&observed)
    }

    fn review(source_id: Option<&str>) -> Review {
        Review {
            reviewer: "Pat".to_string(),
            rating: Some(5.0),
            date: Some("a week ago".to_string()),
            body: "Fixed our spring same day.".to_string(),
            source_id: source_id.map(str::to_string),
        }
    }

    #[test]
    fn test_insert_then_load_roundtrips_matching_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_organization(&fields("Joe's Garage Doors", "555-1234")).unwrap();

        let orgs = store.load_all_organizations().unwrap();
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].id, id);
        assert_eq!(orgs[0].phones, vec!["555-1234".to_string()]);
        assert_eq!(orgs[0].website.as_deref(), Some("https://www.joes.com"));
        assert_eq!(orgs[0].addresses.address(), Some("123 Main St, Springfield, IL 62701"));
        assert_eq!(orgs[0].addresses.coordinates(), Some(GeoPoint::new(39.78, -89.65)));
        assert!(store.organization_exists(id).unwrap());
        assert!(!store.organization_exists(id + 1).unwrap());
    }

    #[test]
    fn test_update_overwrites_and_missing_row_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_organization(&fields("Joe's Garage Doors", "555-1234")).unwrap();
        store.update_organization(id, &fields("Joe's Garage Door Co", "555-9999")).unwrap();

        let orgs = store.load_all_organizations().unwrap();
        assert_eq!(orgs[0].name, "Joe's Garage Door Co");
        assert_eq!(orgs[0].phones, vec!["555-9999".to_string()]);

        let err = store.update_organization(id + 10, &fields("x", "1")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_cities_are_unique_and_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.add_city("Peoria", "IL").unwrap());
        assert!(store.add_city("Des Moines", "IA").unwrap());
        assert!(!store.add_city(" Peoria ", "IL").unwrap());
        assert_eq!(
            store.cities().unwrap(),
            vec![
                ("Peoria".to_string(), "IL".to_string()),
                ("Des Moines".to_string(), "IA".to_string()),
            ]
        );
    }

    #[test]
    fn test_review_insert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_organization(&fields("Joe's Garage Doors", "555-1234")).unwrap();

        assert!(store.insert_review(&review(Some("ChZDSUhN")), id).unwrap());
        assert!(!store.insert_review(&review(Some("ChZDSUhN")), id).unwrap());
        assert!(!store.insert_review(&review(None), id).unwrap());
        assert_eq!(store.count_reviews(id).unwrap(), 1);
    }

    #[test]
    fn test_legacy_rows_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO organizations (name, phones, website, addresses, created_at, updated_at)
                 VALUES ('Old Co', '555-0000', NULL, '44 Pine Rd, Macon', 'x', 'x')",
                [],
            )
            .unwrap();
        let orgs = store.load_all_organizations().unwrap();
        assert_eq!(orgs[0].phones, vec!["555-0000".to_string()]);
        assert_eq!(
            orgs[0].addresses,
            AddressPayload::Text("44 Pine Rd, Macon".to_string())
        );
        assert_eq!(store.count_organizations().unwrap(), 1);
    }
}
