//! Insert / update / no-op decision for each scraped place

use tracing::{debug, info, warn};

use crate::matcher::{find_match, has_changed, MatchConfig, Snapshot};
use crate::store::OrganizationStore;
use crate::types::{ObservedRecord, OrganizationFields, OrganizationRecord, Outcome, Review};

/// Per-run counters, printed at the end of a sync
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub skipped: u32,
    pub failed: u32,
    pub reviews_inserted: u32,
    pub reviews_existing: u32,
    pub reviews_failed: u32,
}

impl RunStats {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Inserted(_) => self.inserted += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::NoUpdate(_) => self.unchanged += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} updated, {} unchanged, {} skipped, {} failed; reviews: {} new, {} existing, {} failed",
            self.inserted,
            self.updated,
            self.unchanged,
            self.skipped,
            self.failed,
            self.reviews_inserted,
            self.reviews_existing,
            self.reviews_failed
        )
    }
}

fn insert_new<S: OrganizationStore + ?Sized>(
    fields: &OrganizationFields,
    snapshot: &mut Snapshot,
    store: &S,
) -> Outcome {
    match store.insert_organization(fields) {
        Ok(id) => {
            snapshot.push(OrganizationRecord::from_fields(id, fields));
            Outcome::Inserted(id)
        }
        Err(e) => {
            warn!(name = %fields.name, error = %e, "organization insert failed");
            Outcome::Failed(e.to_string())
        }
    }
}

/// Reconcile one observed place against the snapshot and persist the result.
///
/// New organizations are appended to the snapshot so later places in the same
/// run can match them. Store errors are reported as `Outcome::Failed` and
/// never abort the run.
pub fn reconcile<S: OrganizationStore + ?Sized>(
    observed: &ObservedRecord,
    snapshot: &mut Snapshot,
    store: &S,
    config: &MatchConfig,
) -> Outcome {
    let fields = OrganizationFields::from_observed(observed);

    let Some((index, id, changed)) = find_match(observed, snapshot, config).map(|m| {
        debug!(
            org_id = m.org.id,
            score = m.score,
            signal = m.signal.as_str(),
            "matched existing organization"
        );
        (m.index, m.org.id, has_changed(m.org, observed))
    }) else {
        return insert_new(&fields, snapshot, store);
    };

    match store.organization_exists(id) {
        Ok(true) if !changed => Outcome::NoUpdate(id),
        Ok(true) => match store.update_organization(id, &fields) {
            Ok(()) => {
                snapshot.replace(index, OrganizationRecord::from_fields(id, &fields));
                Outcome::Updated(id)
            }
            Err(e) => {
                warn!(org_id = id, error = %e, "organization update failed");
                Outcome::Failed(e.to_string())
            }
        },
        // Matched a snapshot row the store does not hold
        Ok(false) => insert_new(&fields, snapshot, store),
        Err(e) => {
            warn!(org_id = id, error = %e, "organization lookup failed");
            Outcome::Failed(e.to_string())
        }
    }
}

/// Attach reviews to an organization; duplicates by source id are no-ops
pub fn attach_reviews<S: OrganizationStore + ?Sized>(
    reviews: &[Review],
    org_id: i64,
    store: &S,
    stats: &mut RunStats,
) {
    for review in reviews {
        match store.insert_review(review, org_id) {
            Ok(true) => stats.reviews_inserted += 1,
            Ok(false) => stats.reviews_existing += 1,
            Err(e) => {
                stats.reviews_failed += 1;
                warn!(org_id, error = %e, "review insert failed");
            }
        }
    }
}

/// Validate, reconcile and attach reviews for one place.
/// Returns None when the place lacks a name or address.
pub fn process_observed<S: OrganizationStore + ?Sized>(
    observed: &ObservedRecord,
    snapshot: &mut Snapshot,
    store: &S,
    config: &MatchConfig,
    stats: &mut RunStats,
) -> Option<Outcome> {
    if !observed.is_usable() {
        warn!(name = %observed.name_raw, "skipped place with missing name or address");
        stats.skipped += 1;
        return None;
    }

    let outcome = reconcile(observed, snapshot, store, config);
    stats.record(&outcome);

    if let Some(org_id) = outcome.org_id() {
        attach_reviews(&observed.reviews, org_id, store, stats);
    }

    info!(
        name = %observed.name,
        action = outcome.as_str(),
        org_id = ?outcome.org_id(),
        reviews = observed.reviews.len(),
        "reconciled"
    );
    Some(outcome)
}
