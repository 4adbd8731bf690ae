//! Listing reconciliation: merge one scrape batch against persisted state.
//!
//! Pure over its inputs; no I/O. The store applies the returned mutation set
//! in a single transaction, so a failed run never half-applies.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Listing, ListingState, RawListing, RunCounters, Snapshot, TrackedListing};

/// Mutation set computed by one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Run time; `first_seen_at`, `observed_at` and `closed_at` of every
    /// mutation in this set.
    pub observed_at: DateTime<Utc>,
    /// Identities to create, each Open with an initial snapshot in `snapshots`.
    pub new_listings: Vec<Listing>,
    /// Snapshots to append, including the first snapshot of new listings.
    pub snapshots: Vec<Snapshot>,
    /// Ad ids of previously-Open listings absent from the batch.
    pub closed: Vec<String>,
    /// Ad ids of Closed listings that reappeared in the batch.
    pub reopened: Vec<String>,
    pub counters: RunCounters,
}

impl Reconciliation {
    fn empty(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            new_listings: Vec::new(),
            snapshots: Vec::new(),
            closed: Vec::new(),
            reopened: Vec::new(),
            counters: RunCounters::default(),
        }
    }
}

/// Merge `batch` against `previous` as of `now`.
///
/// Per record, keyed by ad id: unknown ids become new listings with an
/// initial snapshot; known Closed listings are reopened; known Open listings
/// get a snapshot appended only when a compared attribute changed. After the
/// batch, every previously-Open listing whose id did not appear is closed.
/// Duplicate ids within the batch (pagination overlap) are processed once,
/// first occurrence wins.
pub fn reconcile(
    previous: &[TrackedListing],
    batch: &[RawListing],
    now: DateTime<Utc>,
) -> Reconciliation {
    let known: HashMap<&str, &TrackedListing> = previous
        .iter()
        .map(|t| (t.listing.ad_id.as_str(), t))
        .collect();

    let mut out = Reconciliation::empty(now);
    let mut seen: HashSet<&str> = HashSet::new();

    for raw in batch {
        if !seen.insert(raw.ad_id.as_str()) {
            debug!(ad_id = %raw.ad_id, "duplicate ad id in batch, ignoring");
            continue;
        }

        match known.get(raw.ad_id.as_str()) {
            None => {
                out.new_listings.push(Listing {
                    ad_id: raw.ad_id.clone(),
                    url: raw.url.clone(),
                    first_seen_at: now,
                });
                out.snapshots.push(Snapshot::observe(raw, now));
                out.counters.new_listings += 1;
            }
            Some(tracked) => {
                if tracked.status.state == ListingState::Closed {
                    debug!(ad_id = %raw.ad_id, "closed listing reappeared, reopening");
                    out.reopened.push(raw.ad_id.clone());
                    out.counters.reopened_listings += 1;
                }
                let changed = match &tracked.latest_snapshot {
                    Some(latest) => latest.differs_from(raw),
                    None => true,
                };
                if changed {
                    out.snapshots.push(Snapshot::observe(raw, now));
                    out.counters.updated_snapshots += 1;
                }
            }
        }
    }

    for tracked in previous {
        if tracked.status.state == ListingState::Open
            && !seen.contains(tracked.listing.ad_id.as_str())
        {
            out.closed.push(tracked.listing.ad_id.clone());
            out.counters.closed_listings += 1;
        }
    }

    out.counters.listings_seen = seen.len() as u32;
    out
}
