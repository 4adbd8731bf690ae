use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw listing record as produced by an extraction adapter.
///
/// Numeric fields that could not be parsed from the source page are `None`,
/// never defaulted to zero (a zero price would corrupt price statistics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    /// Stable ad id assigned by the source site. Required; records without
    /// one are dropped at the adapter boundary.
    pub ad_id: String,
    pub title: String,
    /// Price in whole euros.
    pub price: Option<i64>,
    pub location: String,
    pub rooms: Option<f64>,
    pub size_sqm: Option<f64>,
    pub url: String,
}

impl RawListing {
    /// Derived price per square meter. Absent unless both price and a
    /// positive size are known; never 0, NaN or infinity.
    pub fn price_per_sqm(&self) -> Option<f64> {
        match (self.price, self.size_sqm) {
            (Some(price), Some(size)) if size > 0.0 => Some(price as f64 / size),
            _ => None,
        }
    }
}

/// Immutable identity of a tracked listing. Created the first time an ad id
/// shows up in a scrape batch; never updated or deleted afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub ad_id: String,
    pub url: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Point-in-time observation of a listing's mutable attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ad_id: String,
    pub observed_at: DateTime<Utc>,
    pub title: String,
    pub price: Option<i64>,
    pub location: String,
    pub rooms: Option<f64>,
    pub size_sqm: Option<f64>,
    pub price_per_sqm: Option<f64>,
}

impl Snapshot {
    /// Build a snapshot from a raw record, recomputing the derived field.
    pub fn observe(raw: &RawListing, observed_at: DateTime<Utc>) -> Self {
        Self {
            ad_id: raw.ad_id.clone(),
            observed_at,
            title: raw.title.clone(),
            price: raw.price,
            location: raw.location.clone(),
            rooms: raw.rooms,
            size_sqm: raw.size_sqm,
            price_per_sqm: raw.price_per_sqm(),
        }
    }

    /// True when any compared attribute differs from the raw record.
    /// `price_per_sqm` is derived and never part of the comparison.
    pub fn differs_from(&self, raw: &RawListing) -> bool {
        self.price != raw.price
            || self.location != raw.location
            || self.rooms != raw.rooms
            || self.size_sqm != raw.size_sqm
    }
}

/// Lifecycle state of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingState {
    Open,
    Closed,
}

impl ListingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingState::Open => "open",
            ListingState::Closed => "closed",
        }
    }
}

/// Current status of a listing; exactly one per listing, created Open
/// together with the identity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingStatus {
    pub state: ListingState,
    /// Present iff `state` is `Closed`.
    pub closed_at: Option<DateTime<Utc>>,
}

impl ListingStatus {
    pub fn open() -> Self {
        Self {
            state: ListingState::Open,
            closed_at: None,
        }
    }
}

/// One tracked listing as the reconciliation engine sees it: identity plus
/// current status plus the most recent snapshot, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedListing {
    pub listing: Listing,
    pub status: ListingStatus,
    pub latest_snapshot: Option<Snapshot>,
}

/// How a scrape run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    /// The run committed, but some raw records were dropped as malformed.
    PartialFailure,
    Failure,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialFailure => "partial_failure",
            RunOutcome::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunOutcome::Success),
            "partial_failure" => Some(RunOutcome::PartialFailure),
            "failure" => Some(RunOutcome::Failure),
            _ => None,
        }
    }
}

/// Counters summarizing one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    /// Distinct ad ids in the batch after validation.
    pub listings_seen: u32,
    pub new_listings: u32,
    pub updated_snapshots: u32,
    pub closed_listings: u32,
    pub reopened_listings: u32,
}

/// Audit record of one reconciliation pass. One row per orchestrator
/// invocation, written even when extraction fails wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub counters: RunCounters,
    /// Present iff `outcome` is not `Success`.
    pub error_detail: Option<String>,
}

impl ScrapeRun {
    /// A run that failed before any reconciliation took place.
    pub fn failed(started_at: DateTime<Utc>, detail: String) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Failure,
            counters: RunCounters::default(),
            error_detail: Some(detail),
        }
    }
}
