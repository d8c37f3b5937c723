//! Matching scraped places against known organizations

use std::collections::HashMap;

use crate::clean::extract_domain;
use crate::fuzz::token_set_ratio;
use crate::types::{ObservedRecord, OrganizationRecord};

pub const DEFAULT_NAME_THRESHOLD: u8 = 85;
/// Roughly 100m at mid latitudes
pub const DEFAULT_GEO_TOLERANCE: f64 = 0.001;

/// Thresholds for the name gate and the geolocation signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub name_threshold: u8,
    pub geo_tolerance: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            name_threshold: DEFAULT_NAME_THRESHOLD,
            geo_tolerance: DEFAULT_GEO_TOLERANCE,
        }
    }
}

/// Corroborating evidence that confirmed a name-gated candidate,
/// listed in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSignal {
    Phone,
    Domain,
    Address,
    Geo,
}

impl MatchSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSignal::Phone => "phone",
            MatchSignal::Domain => "domain",
            MatchSignal::Address => "address",
            MatchSignal::Geo => "geo",
        }
    }
}

/// A snapshot entry accepted by `find_match`
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub index: usize,
    pub org: &'a OrganizationRecord,
    pub score: u8,
    pub signal: MatchSignal,
}

/// Organizations known to the current run, in load order.
///
/// Records are addressed by a stable index. The snapshot only grows: inserts
/// append, updates replace an entry in place.
#[derive(Debug, Default)]
pub struct Snapshot {
    records: Vec<OrganizationRecord>,
    by_id: HashMap<i64, usize>,
}

impl Snapshot {
    pub fn new(records: Vec<OrganizationRecord>) -> Self {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.push(record);
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn get_by_id(&self, id: i64) -> Option<&OrganizationRecord> {
        self.by_id.get(&id).and_then(|&i| self.records.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrganizationRecord> {
        self.records.iter()
    }

    /// Append a record and return its index. A record whose id is already
    /// present replaces the earlier entry so the snapshot keeps one row per id.
    pub fn push(&mut self, record: OrganizationRecord) -> usize {
        if let Some(&index) = self.by_id.get(&record.id) {
            self.records[index] = record;
            return index;
        }
        let index = self.records.len();
        self.by_id.insert(record.id, index);
        self.records.push(record);
        index
    }

    /// Overwrite the entry at `index`, keeping its position in match order
    pub fn replace(&mut self, index: usize, record: OrganizationRecord) {
        if let Some(slot) = self.records.get_mut(index) {
            self.by_id.remove(&slot.id);
            self.by_id.insert(record.id, index);
            *slot = record;
        }
    }
}

fn phone_matches(observed: &ObservedRecord, org: &OrganizationRecord) -> bool {
    observed
        .phone()
        .is_some_and(|phone| org.phones.iter().any(|p| p == phone))
}

fn domain_matches(observed: &ObservedRecord, org: &OrganizationRecord) -> bool {
    let Some(website) = observed.website() else {
        return false;
    };
    let Some(org_website) = org.website.as_deref().filter(|w| !w.trim().is_empty()) else {
        return false;
    };
    match (extract_domain(website), extract_domain(org_website)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn address_matches(observed: &ObservedRecord, org: &OrganizationRecord) -> bool {
    observed
        .address()
        .is_some_and(|address| org.addresses.serialized().contains(address))
}

fn geo_matches(observed: &ObservedRecord, org: &OrganizationRecord, tolerance: f64) -> bool {
    match (observed.location, org.addresses.coordinates()) {
        (Some(here), Some(there)) => here.is_near(&there, tolerance),
        _ => false,
    }
}

/// First corroborating signal between an observed place and an organization
pub fn corroborate(
    observed: &ObservedRecord,
    org: &OrganizationRecord,
    config: &MatchConfig,
) -> Option<MatchSignal> {
    if phone_matches(observed, org) {
        Some(MatchSignal::Phone)
    } else if domain_matches(observed, org) {
        Some(MatchSignal::Domain)
    } else if address_matches(observed, org) {
        Some(MatchSignal::Address)
    } else if geo_matches(observed, org, config.geo_tolerance) {
        Some(MatchSignal::Geo)
    } else {
        None
    }
}

/// Find the first organization, in snapshot order, whose name passes the
/// similarity gate and which shares at least one corroborating signal.
///
/// The first satisfying entry wins even if a later one scores higher.
pub fn find_match<'a>(
    observed: &ObservedRecord,
    snapshot: &'a Snapshot,
    config: &MatchConfig,
) -> Option<Match<'a>> {
    let name = observed.name.to_lowercase();
    for (index, org) in snapshot.iter().enumerate() {
        let score = token_set_ratio(&name, &org.name.to_lowercase());
        if score < config.name_threshold {
            continue;
        }
        if let Some(signal) = corroborate(observed, org, config) {
            return Some(Match {
                index,
                org,
                score,
                signal,
            });
        }
    }
    None
}

/// Whether writing `observed` over `existing` would change anything.
/// Empty observed fields never count as a change.
pub fn has_changed(existing: &OrganizationRecord, observed: &ObservedRecord) -> bool {
    if observed.name.to_lowercase() != existing.name.to_lowercase() {
        return true;
    }
    if let Some(phone) = observed.phone() {
        if !existing.phones.iter().any(|p| p == phone) {
            return true;
        }
    }
    if let Some(website) = observed.website() {
        let existing_domain = existing.website.as_deref().and_then(extract_domain);
        if extract_domain(website) != existing_domain {
            return true;
        }
    }
    if let Some(address) = observed.address() {
        if existing.addresses.address().unwrap_or("") != address {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressPayload, GeoPoint};

    fn org(id: i64, name: &str, phones: &[&str], website: Option<&str>, address: &str) -> OrganizationRecord {
        OrganizationRecord {
            id,
            name: name.to_string(),
            phones: phones.iter().map(|p| p.to_string()).collect(),
            website: website.map(str::to_string),
            addresses: AddressPayload::structured(address, None, None),
        }
    }

    fn observed(name: &str) -> ObservedRecord {
        ObservedRecord {
            name: name.to_string(),
            source: "google_maps".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_gate_blocks_identical_signals() {
        let snapshot = Snapshot::new(vec![org(
            1,
            "Acme Plumbing",
            &["555-1234"],
            Some("https://acme.com"),
            "1 Elm St",
        )]);
        let mut obs = observed("Joe's Garage Doors");
        obs.phone = Some("555-1234".into());
        obs.website = Some("https://acme.com".into());
        obs.address = "1 Elm St".into();
        assert!(find_match(&obs, &snapshot, &MatchConfig::default()).is_none());
    }

    #[test]
    fn test_phone_match() {
        let snapshot = Snapshot::new(vec![org(7, "Joe's Garage Doors", &["555-1234"], None, "")]);
        let mut obs = observed("JOES GARAGE DOORS");
        obs.phone = Some("555-1234".into());
        let m = find_match(&obs, &snapshot, &MatchConfig::default()).unwrap();
        assert_eq!(m.org.id, 7);
        assert_eq!(m.signal, MatchSignal::Phone);
    }

    #[test]
    fn test_phone_must_equal_a_known_number() {
        let snapshot = Snapshot::new(vec![org(7, "Joe's Garage Doors", &["1-555-1234"], None, "")]);
        let mut obs = observed("Joe's Garage Doors");
        obs.phone = Some("555-1234".into());
        assert!(find_match(&obs, &snapshot, &MatchConfig::default()).is_none());
    }

    #[test]
    fn test_domain_match_ignores_scheme_and_www() {
        let snapshot = Snapshot::new(vec![org(3, "Acme", &[], Some("https://www.acme.com"), "")]);
        let mut obs = observed("Acme");
        obs.website = Some("http://acme.com/path".into());
        let m = find_match(&obs, &snapshot, &MatchConfig::default()).unwrap();
        assert_eq!(m.signal, MatchSignal::Domain);
    }

    #[test]
    fn test_domain_needs_both_websites() {
        let snapshot = Snapshot::new(vec![org(3, "Acme", &[], Some(""), "")]);
        let mut obs = observed("Acme");
        obs.website = Some("https://acme.com".into());
        assert!(find_match(&obs, &snapshot, &MatchConfig::default()).is_none());
    }

    #[test]
    fn test_address_containment_is_observed_in_existing() {
        let snapshot = Snapshot::new(vec![org(4, "Acme", &[], None, "123 Main St, Springfield")]);

        let mut longer = observed("Acme");
        longer.address = "123 Main St, Springfield, IL 62701".into();
        assert!(find_match(&longer, &snapshot, &MatchConfig::default()).is_none());

        let mut shorter = observed("Acme");
        shorter.address = "123 Main St".into();
        let m = find_match(&shorter, &snapshot, &MatchConfig::default()).unwrap();
        assert_eq!(m.signal, MatchSignal::Address);
    }

    #[test]
    fn test_address_matches_free_text_payload() {
        let mut existing = org(4, "Acme", &[], None, "");
        existing.addresses = AddressPayload::Text("9 Oak Ave, Dayton, OH 45402".into());
        let snapshot = Snapshot::new(vec![existing]);
        let mut obs = observed("Acme");
        obs.address = "9 Oak Ave, Dayton".into();
        assert!(find_match(&obs, &snapshot, &MatchConfig::default()).is_some());
    }

    #[test]
    fn test_geo_requires_both_axes() {
        let mut existing = org(5, "Acme", &[], None, "");
        existing.addresses = AddressPayload::structured("elsewhere", None, Some(GeoPoint::new(40.0, -75.0)));
        let snapshot = Snapshot::new(vec![existing]);

        let mut near = observed("Acme");
        near.location = Some(GeoPoint::new(40.0008, -75.0008));
        assert_eq!(
            find_match(&near, &snapshot, &MatchConfig::default()).map(|m| m.signal),
            Some(MatchSignal::Geo)
        );

        let mut lat_only = observed("Acme");
        lat_only.location = Some(GeoPoint::new(40.0, -75.5));
        assert!(find_match(&lat_only, &snapshot, &MatchConfig::default()).is_none());
    }

    #[test]
    fn test_malformed_coordinates_skip_geo_only() {
        let mut existing = org(5, "Acme", &["555-0000"], None, "");
        existing.addresses = AddressPayload::from_column(
            r#"{"address": "elsewhere", "latitude": "bogus", "longitude": null}"#,
        );
        let snapshot = Snapshot::new(vec![existing]);

        let mut obs = observed("Acme");
        obs.location = Some(GeoPoint::new(40.0, -75.0));
        assert!(find_match(&obs, &snapshot, &MatchConfig::default()).is_none());

        obs.phone = Some("555-0000".into());
        assert!(find_match(&obs, &snapshot, &MatchConfig::default()).is_some());
    }

    #[test]
    fn test_first_match_wins_over_better_score() {
        let snapshot = Snapshot::new(vec![
            org(1, "Acme Garage Door Repair", &["555-1234"], None, ""),
            org(2, "Acme", &["555-1234"], None, ""),
        ]);
        let mut obs = observed("Acme");
        obs.phone = Some("555-1234".into());
        let m = find_match(&obs, &snapshot, &MatchConfig::default()).unwrap();
        assert_eq!(m.org.id, 1);
        assert_eq!(m.index, 0);
    }

    #[test]
    fn test_custom_threshold() {
        let snapshot = Snapshot::new(vec![org(1, "Joe's Garage Doors", &["555-1234"], None, "")]);
        let mut obs = observed("JOES GARAGE DOORS");
        obs.phone = Some("555-1234".into());
        let strict = MatchConfig {
            name_threshold: 100,
            ..Default::default()
        };
        assert!(find_match(&obs, &snapshot, &strict).is_none());
    }

    #[test]
    fn test_has_changed_ignores_absent_fields() {
        let existing = org(1, "Joe's Garage Doors", &["555-1234"], Some("https://joes.com"), "1 Elm St");
        let obs = observed("JOE'S GARAGE DOORS");
        assert!(!has_changed(&existing, &obs));
    }

    #[test]
    fn test_has_changed_detects_each_field() {
        let existing = org(1, "Acme", &["555-1234"], Some("https://www.acme.com"), "1 Elm St");

        let mut obs = observed("Acme");
        obs.phone = Some("555-1234".into());
        obs.website = Some("http://acme.com/about".into());
        obs.address = "1 Elm St".into();
        assert!(!has_changed(&existing, &obs));

        let mut renamed = obs.clone();
        renamed.name = "Acme Doors".into();
        assert!(has_changed(&existing, &renamed));

        let mut new_phone = obs.clone();
        new_phone.phone = Some("555-9999".into());
        assert!(has_changed(&existing, &new_phone));

        let mut new_site = obs.clone();
        new_site.website = Some("https://acme-doors.com".into());
        assert!(has_changed(&existing, &new_site));

        let mut moved = obs.clone();
        moved.address = "2 Elm St".into();
        assert!(has_changed(&existing, &moved));
    }

    #[test]
    fn test_has_changed_website_against_missing_existing() {
        let existing = org(1, "Acme", &[], None, "1 Elm St");
        let mut obs = observed("Acme");
        obs.website = Some("https://acme.com".into());
        assert!(has_changed(&existing, &obs));
    }

    #[test]
    fn test_snapshot_push_and_replace() {
        let mut snapshot = Snapshot::new(vec![org(1, "A", &[], None, "")]);
        assert_eq!(snapshot.push(org(2, "B", &[], None, "")), 1);
        assert_eq!(snapshot.push(org(1, "A2", &[], None, "")), 0);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get_by_id(1).map(|o| o.name.as_str()), Some("A2"));

        snapshot.replace(1, org(2, "B2", &[], None, ""));
        assert_eq!(snapshot.iter().nth(1).map(|o| o.name.as_str()), Some("B2"));
    }
}
