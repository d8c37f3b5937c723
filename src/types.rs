//! Organization and scraped-place types shared by the matcher, store and exporters

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both axes must be within `tolerance` degrees; one close axis is not enough.
    pub fn is_near(&self, other: &GeoPoint, tolerance: f64) -> bool {
        (self.lat - other.lat).abs() <= tolerance && (self.lng - other.lng).abs() <= tolerance
    }
}

/// Stored address column: legacy rows hold free text, newer ones a JSON object
/// with at least `address` and optionally `zip`, `latitude`, `longitude`.
#[derive(Debug, Clone, PartialEq)]
pub enum AddressPayload {
    Text(String),
    Structured(Map<String, Value>),
}

impl AddressPayload {
    /// Build the structured payload written for scraped places
    pub fn structured(address: &str, zip: Option<&str>, location: Option<GeoPoint>) -> Self {
        let mut map = Map::new();
        map.insert("address".to_string(), Value::from(address));
        map.insert("zip".to_string(), Value::from(zip.unwrap_or("")));
        if let Some(point) = location {
            map.insert("latitude".to_string(), Value::from(point.lat));
            map.insert("longitude".to_string(), Value::from(point.lng));
        }
        AddressPayload::Structured(map)
    }

    /// Decode the raw column value. JSON objects become `Structured`, JSON
    /// strings and anything unparseable are kept as free text.
    pub fn from_column(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => AddressPayload::Structured(map),
            Ok(Value::String(s)) => AddressPayload::Text(s),
            _ => AddressPayload::Text(raw.to_string()),
        }
    }

    /// The form persisted to the store and searched for address substrings
    pub fn serialized(&self) -> String {
        match self {
            AddressPayload::Text(s) => s.clone(),
            AddressPayload::Structured(map) => {
                serde_json::to_string(map).unwrap_or_default()
            }
        }
    }

    /// The human-readable street address, if any
    pub fn address(&self) -> Option<&str> {
        match self {
            AddressPayload::Text(s) => Some(s.as_str()),
            AddressPayload::Structured(map) => map.get("address").and_then(Value::as_str),
        }
    }

    /// Coordinates from a structured payload. Missing or malformed values
    /// (non-numeric strings, nulls, objects) yield `None`.
    pub fn coordinates(&self) -> Option<GeoPoint> {
        let AddressPayload::Structured(map) = self else {
            return None;
        };
        let lat = coordinate(map.get("latitude")?)?;
        let lng = coordinate(map.get("longitude")?)?;
        Some(GeoPoint::new(lat, lng))
    }
}

fn coordinate(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A previously known organization as held in the in-memory snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationRecord {
    pub id: i64,
    pub name: String,
    pub phones: Vec<String>,
    pub website: Option<String>,
    pub addresses: AddressPayload,
}

impl OrganizationRecord {
    /// Snapshot entry for a row just written from `fields`
    pub fn from_fields(id: i64, fields: &OrganizationFields) -> Self {
        Self {
            id,
            name: fields.name.clone(),
            phones: fields.phones.clone(),
            website: fields.website.clone(),
            addresses: fields.addresses.clone(),
        }
    }
}

/// Opening hours keyed by weekday, serialized as a JSON object in week order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hours {
    pub days: Vec<(String, String)>,
}

impl Hours {
    /// All seven days set to "Closed"
    pub fn closed_week() -> Self {
        Self {
            days: WEEKDAYS
                .iter()
                .map(|d| (d.to_string(), "Closed".to_string()))
                .collect(),
        }
    }

    /// Set the text for a known weekday; unknown day labels are ignored
    pub fn set(&mut self, day: &str, text: &str) -> bool {
        match self.days.iter_mut().find(|(d, _)| d == day) {
            Some(slot) => {
                slot.1 = text.to_string();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn get(&self, day: &str) -> Option<&str> {
        self.days
            .iter()
            .find(|(d, _)| d == day)
            .map(|(_, t)| t.as_str())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for Hours {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.days.len()))?;
        for (day, text) in &self.days {
            map.serialize_entry(day, text)?;
        }
        map.end()
    }
}

/// One review scraped from a place page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: String,
    pub rating: Option<f64>,
    pub date: Option<String>,
    pub body: String,
    /// Source-specific unique id (`data-review-id` on Google Maps)
    pub source_id: Option<String>,
}

/// A business as observed on one place page during the current run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedRecord {
    pub query: String,
    pub name_raw: String,
    pub name: String,
    pub slug: String,
    pub address: String,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub website_domain: Option<String>,
    pub location: Option<GeoPoint>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub hours: Option<Hours>,
    pub review_excerpt: Option<String>,
    pub place_id: Option<String>,
    pub place_url: Option<String>,
    pub source: String,
    pub reviews: Vec<Review>,
}

impl ObservedRecord {
    /// Records without a usable name or address never reach reconciliation
    pub fn is_usable(&self) -> bool {
        !self.name.trim().is_empty() && !self.address.trim().is_empty()
    }

    /// Observed phone, treating blank text as absent
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Observed website, treating blank text as absent
    pub fn website(&self) -> Option<&str> {
        self.website.as_deref().filter(|w| !w.trim().is_empty())
    }

    /// Observed address, treating blank text as absent
    pub fn address(&self) -> Option<&str> {
        Some(self.address.as_str()).filter(|a| !a.trim().is_empty())
    }
}

/// Mutable organization columns written on insert and overwritten on update
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationFields {
    pub name: String,
    pub name_raw: String,
    pub slug: String,
    pub phones: Vec<String>,
    pub website: Option<String>,
    pub addresses: AddressPayload,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub place_id: Option<String>,
    pub hours: Option<Hours>,
    pub review_excerpt: Option<String>,
    pub location: Option<GeoPoint>,
    pub place_url: Option<String>,
    pub website_domain: Option<String>,
    pub source: String,
}

impl OrganizationFields {
    pub fn from_observed(observed: &ObservedRecord) -> Self {
        Self {
            name: observed.name.clone(),
            name_raw: observed.name_raw.clone(),
            slug: observed.slug.clone(),
            phones: observed.phone().map(|p| vec![p.to_string()]).unwrap_or_default(),
            website: observed.website().map(str::to_string),
            addresses: AddressPayload::structured(
                &observed.address,
                observed.zip.as_deref(),
                observed.location,
            ),
            rating: observed.rating,
            review_count: observed.review_count,
            place_id: observed.place_id.clone(),
            hours: observed.hours.clone(),
            review_excerpt: observed.review_excerpt.clone(),
            location: observed.location,
            place_url: observed.place_url.clone(),
            website_domain: observed.website_domain.clone(),
            source: observed.source.clone(),
        }
    }
}

/// What reconciliation did with one observed record
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Inserted(i64),
    Updated(i64),
    NoUpdate(i64),
    /// The store rejected the write; reviews are not attached
    Failed(String),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Inserted(_) => "inserted",
            Outcome::Updated(_) => "updated",
            Outcome::NoUpdate(_) => "no_update",
            Outcome::Failed(_) => "failed",
        }
    }

    /// Organization the record's reviews should be attached to
    pub fn org_id(&self) -> Option<i64> {
        match self {
            Outcome::Inserted(id) | Outcome::Updated(id) | Outcome::NoUpdate(id) => Some(*id),
            Outcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_payload_from_column() {
        let structured = AddressPayload::from_column(r#"{"address": "1 Elm St", "zip": "02139"}"#);
        assert_eq!(structured.address(), Some("1 Elm St"));

        let text = AddressPayload::from_column("1 Elm St, Cambridge");
        assert_eq!(text, AddressPayload::Text("1 Elm St, Cambridge".to_string()));

        let quoted = AddressPayload::from_column(r#""1 Elm St""#);
        assert_eq!(quoted.address(), Some("1 Elm St"));
    }

    #[test]
    fn test_coordinates_accept_numeric_strings() {
        let payload = AddressPayload::from_column(
            r#"{"address": "x", "latitude": "42.36", "longitude": -71.09}"#,
        );
        assert_eq!(payload.coordinates(), Some(GeoPoint::new(42.36, -71.09)));
    }

    #[test]
    fn test_coordinates_malformed_are_absent() {
        let payload = AddressPayload::from_column(
            r#"{"address": "x", "latitude": "north", "longitude": -71.09}"#,
        );
        assert_eq!(payload.coordinates(), None);
        assert_eq!(AddressPayload::Text("x".into()).coordinates(), None);
    }

    #[test]
    fn test_geo_requires_both_axes() {
        let a = GeoPoint::new(40.0, -75.0);
        assert!(a.is_near(&GeoPoint::new(40.0005, -75.0009), 0.001));
        assert!(!a.is_near(&GeoPoint::new(40.0, -75.01), 0.001));
        assert!(!a.is_near(&GeoPoint::new(40.01, -75.0), 0.001));
    }

    #[test]
    fn test_hours_serialize_in_week_order() {
        let mut hours = Hours::closed_week();
        assert!(hours.set("Tuesday", "8 AM-5 PM"));
        assert!(!hours.set("Holiday", "Closed"));
        let json = hours.to_json();
        assert!(json.starts_with(r#"{"Monday":"Closed","Tuesday":"8 AM-5 PM""#));
        assert_eq!(hours.get("Sunday"), Some("Closed"));
    }

    #[test]
    fn test_fields_from_observed_skip_blank_phone() {
        let observed = ObservedRecord {
            name: "Acme".into(),
            address: "1 Elm St".into(),
            phone: Some("  ".into()),
            website: Some("https://acme.com".into()),
            ..Default::default()
        };
        let fields = OrganizationFields::from_observed(&observed);
        assert!(fields.phones.is_empty());
        assert_eq!(fields.website.as_deref(), Some("https://acme.com"));
        assert_eq!(fields.addresses.address(), Some("1 Elm St"));
    }
}
