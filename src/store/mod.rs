//! SQLite persistence for listings, snapshots, statuses and run logs.
//!
//! Single-writer model: one orchestrator run at a time holds the connection.
//! Every mutation set from a reconciliation pass is applied in one
//! transaction together with its run row, so a mid-commit failure leaves
//! prior history untouched. Readers (the dashboard) open their own
//! connection and see either the pre-run or the committed post-run state;
//! WAL mode plus a busy timeout serializes a stray second writer.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::StoreError;
use crate::models::{
    Listing, ListingState, ListingStatus, RunCounters, RunOutcome, ScrapeRun, Snapshot,
    TrackedListing,
};
use crate::reconcile::Reconciliation;

const SCHEMA: &str = r#"
-- Listings: immutable ad identity
CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ad_id TEXT UNIQUE NOT NULL,
    url TEXT NOT NULL,
    first_seen_at TIMESTAMP NOT NULL
);

-- Snapshots: append-only point-in-time data per listing
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id INTEGER NOT NULL REFERENCES listings(id),
    observed_at TIMESTAMP NOT NULL,
    title TEXT NOT NULL,
    price INTEGER,
    location TEXT NOT NULL,
    rooms REAL,
    size_sqm REAL,
    price_per_sqm REAL,
    UNIQUE(listing_id, observed_at)
);

-- Listing status: open/closed state, exactly one row per listing
CREATE TABLE IF NOT EXISTS listing_status (
    listing_id INTEGER PRIMARY KEY REFERENCES listings(id),
    status TEXT NOT NULL DEFAULT 'open' CHECK(status IN ('open', 'closed')),
    closed_at TIMESTAMP
);

-- Scrape run log, one row per orchestrator invocation
CREATE TABLE IF NOT EXISTS scrape_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TIMESTAMP NOT NULL,
    finished_at TIMESTAMP NOT NULL,
    outcome TEXT NOT NULL CHECK(outcome IN ('success', 'partial_failure', 'failure')),
    listings_seen INTEGER NOT NULL,
    new_listings INTEGER NOT NULL,
    updated_snapshots INTEGER NOT NULL,
    closed_listings INTEGER NOT NULL,
    reopened_listings INTEGER NOT NULL,
    error_detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_snapshots_listing_id ON snapshots(listing_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_observed_at ON snapshots(observed_at);
CREATE INDEX IF NOT EXISTS idx_listing_status_status ON listing_status(status);
"#;

/// One point in a listing's price history.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub observed_at: DateTime<Utc>,
    pub price: Option<i64>,
    pub price_per_sqm: Option<f64>,
}

/// Per-district aggregates over each listing's latest snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictStats {
    pub location: String,
    pub avg_price: f64,
    pub avg_price_per_sqm: Option<f64>,
    pub listings: u32,
}

/// An open listing ranked by price per square meter.
#[derive(Debug, Clone, PartialEq)]
pub struct BestValueListing {
    pub ad_id: String,
    pub url: String,
    pub title: String,
    pub location: String,
    pub price: i64,
    pub size_sqm: f64,
    pub price_per_sqm: f64,
}

/// Price statistics for one calendar day of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyPriceStats {
    pub day: NaiveDate,
    pub avg_price: f64,
    pub min_price: i64,
    pub max_price: i64,
    pub snapshots: u32,
}

/// Market-wide price statistics over latest snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceStats {
    pub median_price: f64,
    pub avg_price: f64,
    pub avg_price_per_sqm: Option<f64>,
    pub listings: u32,
}

/// SQLite-backed store. Owns the single writer connection.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// WAL journal mode for concurrent readers, `synchronous = FULL` so an
    /// acknowledged commit survives power loss, busy timeout to serialize a
    /// competing writer instead of failing immediately.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source: e,
                })?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "database ready");
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Every tracked listing with its current status and latest snapshot.
    /// Closed listings are included so a reappearing ad id reopens instead
    /// of being double-created.
    pub fn previous_state(&self) -> Result<Vec<TrackedListing>, StoreError> {
        self.tracked_listings("l.id")
    }

    /// The dashboard's listing table: everything tracked, most recently
    /// observed first.
    pub fn listings_with_latest_snapshot(&self) -> Result<Vec<TrackedListing>, StoreError> {
        self.tracked_listings("s.observed_at IS NULL, s.observed_at DESC")
    }

    fn tracked_listings(&self, order_by: &str) -> Result<Vec<TrackedListing>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT l.ad_id, l.url, l.first_seen_at,
                    st.status, st.closed_at,
                    s.observed_at, s.title, s.price, s.location, s.rooms,
                    s.size_sqm, s.price_per_sqm
             FROM listings l
             JOIN listing_status st ON st.listing_id = l.id
             LEFT JOIN snapshots s ON s.listing_id = l.id
                  AND s.observed_at = (SELECT MAX(observed_at)
                                       FROM snapshots
                                       WHERE listing_id = l.id)
             ORDER BY {order_by}"
        ))?;
        let rows = stmt.query_map([], |row| {
            let ad_id: String = row.get(0)?;
            let status: String = row.get(3)?;
            let latest_observed: Option<DateTime<Utc>> = row.get(5)?;
            let latest_snapshot = match latest_observed {
                Some(observed_at) => Some(Snapshot {
                    ad_id: ad_id.clone(),
                    observed_at,
                    title: row.get(6)?,
                    price: row.get(7)?,
                    location: row.get(8)?,
                    rooms: row.get(9)?,
                    size_sqm: row.get(10)?,
                    price_per_sqm: row.get(11)?,
                }),
                None => None,
            };
            Ok(TrackedListing {
                listing: Listing {
                    ad_id,
                    url: row.get(1)?,
                    first_seen_at: row.get(2)?,
                },
                status: ListingStatus {
                    state: if status == "closed" {
                        ListingState::Closed
                    } else {
                        ListingState::Open
                    },
                    closed_at: row.get(4)?,
                },
                latest_snapshot,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Apply one reconciliation pass plus its run row as a single
    /// all-or-nothing transaction.
    pub fn apply(&mut self, rec: &Reconciliation, run: &ScrapeRun) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        for listing in &rec.new_listings {
            tx.execute(
                "INSERT INTO listings (ad_id, url, first_seen_at) VALUES (?1, ?2, ?3)",
                params![listing.ad_id, listing.url, listing.first_seen_at],
            )?;
            tx.execute(
                "INSERT INTO listing_status (listing_id, status) VALUES (?1, 'open')",
                params![tx.last_insert_rowid()],
            )?;
        }

        for ad_id in &rec.reopened {
            tx.execute(
                "UPDATE listing_status SET status = 'open', closed_at = NULL
                 WHERE listing_id = (SELECT id FROM listings WHERE ad_id = ?1)",
                params![ad_id],
            )?;
        }

        for snapshot in &rec.snapshots {
            tx.execute(
                "INSERT INTO snapshots
                     (listing_id, observed_at, title, price, location, rooms,
                      size_sqm, price_per_sqm)
                 VALUES ((SELECT id FROM listings WHERE ad_id = ?1),
                         ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    snapshot.ad_id,
                    snapshot.observed_at,
                    snapshot.title,
                    snapshot.price,
                    snapshot.location,
                    snapshot.rooms,
                    snapshot.size_sqm,
                    snapshot.price_per_sqm,
                ],
            )?;
        }

        for ad_id in &rec.closed {
            tx.execute(
                "UPDATE listing_status SET status = 'closed', closed_at = ?2
                 WHERE listing_id = (SELECT id FROM listings WHERE ad_id = ?1)",
                params![ad_id, rec.observed_at],
            )?;
        }

        Self::insert_run(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    /// Record a run that did not commit any mutations (extraction failure,
    /// or a best-effort audit row after a failed apply). Own minimal
    /// transaction, separate from the mutation path.
    pub fn record_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        Self::insert_run(&self.conn, run)?;
        Ok(())
    }

    fn insert_run(conn: &Connection, run: &ScrapeRun) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO scrape_runs
                 (started_at, finished_at, outcome, listings_seen, new_listings,
                  updated_snapshots, closed_listings, reopened_listings, error_detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.started_at,
                run.finished_at,
                run.outcome.as_str(),
                run.counters.listings_seen,
                run.counters.new_listings,
                run.counters.updated_snapshots,
                run.counters.closed_listings,
                run.counters.reopened_listings,
                run.error_detail,
            ],
        )?;
        Ok(())
    }

    // --- read-only query surface for the dashboard ---

    pub fn open_count(&self) -> Result<u32, StoreError> {
        self.status_count(ListingState::Open)
    }

    pub fn closed_count(&self) -> Result<u32, StoreError> {
        self.status_count(ListingState::Closed)
    }

    fn status_count(&self, state: ListingState) -> Result<u32, StoreError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM listing_status WHERE status = ?1",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Full price history of one listing, oldest first. Empty when the ad id
    /// is unknown; the dashboard renders that as "no data".
    pub fn price_history(&self, ad_id: &str) -> Result<Vec<PricePoint>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.observed_at, s.price, s.price_per_sqm
             FROM snapshots s
             JOIN listings l ON l.id = s.listing_id
             WHERE l.ad_id = ?1
             ORDER BY s.observed_at",
        )?;
        let rows = stmt.query_map(params![ad_id], |row| {
            Ok(PricePoint {
                observed_at: row.get(0)?,
                price: row.get(1)?,
                price_per_sqm: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Average price and price per sqm by district over each listing's
    /// latest snapshot, optionally restricted to snapshots observed since
    /// `since`. Highest average price first.
    pub fn district_aggregates(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DistrictStats>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.location,
                    AVG(s.price) AS avg_price,
                    AVG(s.price_per_sqm) AS avg_price_per_sqm,
                    COUNT(*) AS listings
             FROM snapshots s
             JOIN (SELECT listing_id, MAX(observed_at) AS max_observed
                   FROM snapshots GROUP BY listing_id) latest
                  ON s.listing_id = latest.listing_id
                 AND s.observed_at = latest.max_observed
             WHERE s.price IS NOT NULL
               AND (?1 IS NULL OR s.observed_at >= ?1)
             GROUP BY s.location
             ORDER BY avg_price DESC",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(DistrictStats {
                location: row.get(0)?,
                avg_price: row.get(1)?,
                avg_price_per_sqm: row.get(2)?,
                listings: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Most recent runs, newest first.
    pub fn recent_runs(&self, limit: u32) -> Result<Vec<ScrapeRun>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT started_at, finished_at, outcome, listings_seen, new_listings,
                    updated_snapshots, closed_listings, reopened_listings, error_detail
             FROM scrape_runs
             ORDER BY started_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let outcome: String = row.get(2)?;
            Ok(ScrapeRun {
                started_at: row.get(0)?,
                finished_at: row.get(1)?,
                outcome: RunOutcome::parse(&outcome).unwrap_or(RunOutcome::Failure),
                counters: RunCounters {
                    listings_seen: row.get(3)?,
                    new_listings: row.get(4)?,
                    updated_snapshots: row.get(5)?,
                    closed_listings: row.get(6)?,
                    reopened_listings: row.get(7)?,
                },
                error_detail: row.get(8)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Open listings with the lowest price per square meter.
    pub fn best_value_listings(&self, limit: u32) -> Result<Vec<BestValueListing>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT l.ad_id, l.url, s.title, s.location, s.price, s.size_sqm,
                    s.price_per_sqm
             FROM listings l
             JOIN listing_status st ON st.listing_id = l.id AND st.status = 'open'
             JOIN snapshots s ON s.listing_id = l.id
                  AND s.observed_at = (SELECT MAX(observed_at)
                                       FROM snapshots
                                       WHERE listing_id = l.id)
             WHERE s.price_per_sqm IS NOT NULL
             ORDER BY s.price_per_sqm ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(BestValueListing {
                ad_id: row.get(0)?,
                url: row.get(1)?,
                title: row.get(2)?,
                location: row.get(3)?,
                price: row.get(4)?,
                size_sqm: row.get(5)?,
                price_per_sqm: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Median/average price over each listing's latest snapshot. `None`
    /// when no priced snapshot exists yet.
    pub fn overall_price_stats(&self) -> Result<Option<PriceStats>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.price, s.price_per_sqm
             FROM snapshots s
             JOIN (SELECT listing_id, MAX(observed_at) AS max_observed
                   FROM snapshots GROUP BY listing_id) latest
                  ON s.listing_id = latest.listing_id
                 AND s.observed_at = latest.max_observed
             WHERE s.price IS NOT NULL
             ORDER BY s.price",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<f64>>(1)?))
        })?;
        let mut prices: Vec<i64> = Vec::new();
        let mut per_sqm: Vec<f64> = Vec::new();
        for row in rows {
            let (price, ppsqm) = row?;
            prices.push(price);
            if let Some(v) = ppsqm {
                per_sqm.push(v);
            }
        }
        if prices.is_empty() {
            return Ok(None);
        }

        let n = prices.len();
        let median_price = if n % 2 == 0 {
            (prices[n / 2 - 1] + prices[n / 2]) as f64 / 2.0
        } else {
            prices[n / 2] as f64
        };
        let avg_price = prices.iter().sum::<i64>() as f64 / n as f64;
        let avg_price_per_sqm = if per_sqm.is_empty() {
            None
        } else {
            Some(per_sqm.iter().sum::<f64>() / per_sqm.len() as f64)
        };
        Ok(Some(PriceStats {
            median_price,
            avg_price,
            avg_price_per_sqm,
            listings: n as u32,
        }))
    }

    /// Average, minimum and maximum observed price per calendar day, over
    /// every priced snapshot. Timestamps are stored as text with the date
    /// in the first ten characters, so `substr` groups by day.
    pub fn price_stats_over_time(&self) -> Result<Vec<DailyPriceStats>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(observed_at, 1, 10) AS day,
                    AVG(price), MIN(price), MAX(price), COUNT(*)
             FROM snapshots
             WHERE price IS NOT NULL
             GROUP BY day
             ORDER BY day",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DailyPriceStats {
                day: row.get(0)?,
                avg_price: row.get(1)?,
                min_price: row.get(2)?,
                max_price: row.get(3)?,
                snapshots: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Status of one listing, `None` when untracked.
    pub fn listing_status(&self, ad_id: &str) -> Result<Option<ListingStatus>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT st.status, st.closed_at
                 FROM listing_status st
                 JOIN listings l ON l.id = st.listing_id
                 WHERE l.ad_id = ?1",
                params![ad_id],
                |row| {
                    let status: String = row.get(0)?;
                    Ok(ListingStatus {
                        state: if status == "closed" {
                            ListingState::Closed
                        } else {
                            ListingState::Open
                        },
                        closed_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawListing;
    use crate::reconcile::reconcile;

    fn raw(ad_id: &str, price: Option<i64>, size_sqm: Option<f64>) -> RawListing {
        RawListing {
            ad_id: ad_id.to_string(),
            title: format!("Wohnung {ad_id}"),
            price,
            location: "1020 Wien, Leopoldstadt".to_string(),
            rooms: Some(2.0),
            size_sqm,
            url: format!("https://www.willhaben.at/iad/object/{ad_id}"),
        }
    }

    fn success_run(counters: RunCounters) -> ScrapeRun {
        let now = Utc::now();
        ScrapeRun {
            started_at: now,
            finished_at: now,
            outcome: RunOutcome::Success,
            counters,
            error_detail: None,
        }
    }

    fn commit_batch(store: &mut Store, batch: &[RawListing]) -> Reconciliation {
        let previous = store.previous_state().unwrap();
        let rec = reconcile(&previous, batch, Utc::now());
        let run = success_run(rec.counters);
        store.apply(&rec, &run).unwrap();
        rec
    }

    #[test]
    fn apply_then_previous_state_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        commit_batch(
            &mut store,
            &[raw("A1", Some(300_000), Some(60.0)), raw("A2", None, None)],
        );

        let state = store.previous_state().unwrap();
        assert_eq!(state.len(), 2);
        let a1 = state.iter().find(|t| t.listing.ad_id == "A1").unwrap();
        assert_eq!(a1.status.state, ListingState::Open);
        assert_eq!(a1.status.closed_at, None);
        let snap = a1.latest_snapshot.as_ref().unwrap();
        assert_eq!(snap.price, Some(300_000));
        assert_eq!(snap.price_per_sqm, Some(5000.0));

        let a2 = state.iter().find(|t| t.listing.ad_id == "A2").unwrap();
        let snap = a2.latest_snapshot.as_ref().unwrap();
        assert_eq!(snap.price, None);
        assert_eq!(snap.price_per_sqm, None);
    }

    #[test]
    fn close_and_reopen_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);

        // A1 absent: closed.
        let rec = commit_batch(&mut store, &[]);
        assert_eq!(rec.counters.closed_listings, 1);
        let status = store.listing_status("A1").unwrap().unwrap();
        assert_eq!(status.state, ListingState::Closed);
        assert!(status.closed_at.is_some());
        assert_eq!(store.open_count().unwrap(), 0);
        assert_eq!(store.closed_count().unwrap(), 1);

        // A1 back: reopened, closed_at cleared.
        let rec = commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);
        assert_eq!(rec.counters.reopened_listings, 1);
        assert_eq!(rec.counters.new_listings, 0);
        let status = store.listing_status("A1").unwrap().unwrap();
        assert_eq!(status.state, ListingState::Open);
        assert_eq!(status.closed_at, None);
    }

    #[test]
    fn snapshot_history_is_appended_not_rewritten() {
        let mut store = Store::open_in_memory().unwrap();
        commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);
        // Unchanged run appends nothing.
        commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);
        commit_batch(&mut store, &[raw("A1", Some(290_000), Some(60.0))]);

        let history = store.price_history("A1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].price, Some(300_000));
        assert_eq!(history[1].price, Some(290_000));
        assert!(history[0].observed_at <= history[1].observed_at);
    }

    #[test]
    fn failed_apply_rolls_back_everything() {
        let mut store = Store::open_in_memory().unwrap();
        commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);
        let before = store.previous_state().unwrap();

        // A snapshot for an id with no identity row violates NOT NULL on
        // listing_id, killing the transaction partway through.
        let now = Utc::now();
        let mut rec = reconcile(&before, &[raw("A1", Some(250_000), Some(60.0))], now);
        rec.snapshots.push(Snapshot::observe(&raw("GHOST", Some(1), Some(1.0)), now));

        let runs_before = store.recent_runs(10).unwrap().len();
        let run = success_run(rec.counters);
        assert!(store.apply(&rec, &run).is_err());

        // Nothing from the failed transaction stuck, not even the run row.
        assert_eq!(store.previous_state().unwrap(), before);
        assert_eq!(store.recent_runs(10).unwrap().len(), runs_before);

        // The failure audit row still lands through the separate path.
        store
            .record_run(&ScrapeRun::failed(now, "storage error".to_string()))
            .unwrap();
        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), runs_before + 1);
        assert_eq!(runs[0].outcome, RunOutcome::Failure);
    }

    #[test]
    fn recent_runs_newest_first_with_counters() {
        let mut store = Store::open_in_memory().unwrap();
        commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);
        commit_batch(&mut store, &[raw("A1", Some(290_000), Some(60.0))]);

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].counters.updated_snapshots, 1);
        assert_eq!(runs[1].counters.new_listings, 1);
        assert!(runs[0].started_at >= runs[1].started_at);

        assert_eq!(store.recent_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn best_value_ranks_open_listings_by_price_per_sqm() {
        let mut store = Store::open_in_memory().unwrap();
        commit_batch(
            &mut store,
            &[
                raw("CHEAP", Some(240_000), Some(80.0)),  // 3000/sqm
                raw("DEAR", Some(500_000), Some(50.0)),   // 10000/sqm
                raw("NOSIZE", Some(400_000), None),       // excluded
            ],
        );
        // DEAR disappears -> closed -> excluded from best value.
        commit_batch(
            &mut store,
            &[
                raw("CHEAP", Some(240_000), Some(80.0)),
                raw("NOSIZE", Some(400_000), None),
            ],
        );

        let best = store.best_value_listings(10).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].ad_id, "CHEAP");
        assert_eq!(best[0].price_per_sqm, 3000.0);
    }

    #[test]
    fn district_aggregates_use_latest_snapshot_per_listing() {
        let mut store = Store::open_in_memory().unwrap();
        let mut a1 = raw("A1", Some(300_000), Some(60.0));
        a1.location = "1040 Wien, Wieden".to_string();
        let mut a2 = raw("A2", Some(200_000), Some(50.0));
        a2.location = "1100 Wien, Favoriten".to_string();
        commit_batch(&mut store, &[a1.clone(), a2.clone()]);

        // Price drop for A1; aggregates must reflect the latest value only.
        a1.price = Some(280_000);
        commit_batch(&mut store, &[a1.clone(), a2.clone()]);

        let stats = store.district_aggregates(None).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].location, "1040 Wien, Wieden");
        assert_eq!(stats[0].avg_price, 280_000.0);
        assert_eq!(stats[0].listings, 1);
        assert_eq!(stats[1].avg_price, 200_000.0);
    }

    #[test]
    fn overall_price_stats_median_and_empty_case() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.overall_price_stats().unwrap(), None);

        let mut store = store;
        commit_batch(
            &mut store,
            &[
                raw("A1", Some(100_000), Some(50.0)),
                raw("A2", Some(200_000), Some(50.0)),
                raw("A3", Some(600_000), None),
            ],
        );

        let stats = store.overall_price_stats().unwrap().unwrap();
        assert_eq!(stats.listings, 3);
        assert_eq!(stats.median_price, 200_000.0);
        assert_eq!(stats.avg_price, 300_000.0);
        // Only A1 and A2 have a size, 2000 and 4000 per sqm.
        assert_eq!(stats.avg_price_per_sqm, Some(3000.0));
    }

    #[test]
    fn history_survives_reopening_the_database() {
        let path = std::env::temp_dir().join(format!(
            "apartment-tracker-durability-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let mut store = Store::open(&path).unwrap();
            commit_batch(&mut store, &[raw("A1", Some(300_000), Some(60.0))]);
        }

        let store = Store::open(&path).unwrap();
        let state = store.previous_state().unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(
            state[0].latest_snapshot.as_ref().unwrap().price,
            Some(300_000)
        );
        drop(store);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(path.with_extension(format!("db{suffix}")));
        }
        let _ = std::fs::remove_file(&path);
    }

    fn commit_batch_at(
        store: &mut Store,
        batch: &[RawListing],
        at: DateTime<Utc>,
    ) -> Reconciliation {
        let previous = store.previous_state().unwrap();
        let rec = reconcile(&previous, batch, at);
        let run = success_run(rec.counters);
        store.apply(&rec, &run).unwrap();
        rec
    }

    #[test]
    fn price_stats_over_time_groups_by_day() {
        use chrono::TimeZone;

        let mut store = Store::open_in_memory().unwrap();
        let day1 = Utc.with_ymd_and_hms(2026, 1, 2, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();

        commit_batch_at(
            &mut store,
            &[
                raw("A1", Some(300_000), Some(60.0)),
                raw("A2", Some(400_000), Some(80.0)),
                raw("A3", None, None),
            ],
            day1,
        );
        // Only A1 changes, so day two records a single priced snapshot.
        commit_batch_at(
            &mut store,
            &[
                raw("A1", Some(320_000), Some(60.0)),
                raw("A2", Some(400_000), Some(80.0)),
                raw("A3", None, None),
            ],
            day2,
        );

        let stats = store.price_stats_over_time().unwrap();
        assert_eq!(stats.len(), 2);

        assert_eq!(stats[0].day, day1.date_naive());
        assert_eq!(stats[0].avg_price, 350_000.0);
        assert_eq!(stats[0].min_price, 300_000);
        assert_eq!(stats[0].max_price, 400_000);
        assert_eq!(stats[0].snapshots, 2);

        assert_eq!(stats[1].day, day2.date_naive());
        assert_eq!(stats[1].avg_price, 320_000.0);
        assert_eq!(stats[1].min_price, 320_000);
        assert_eq!(stats[1].max_price, 320_000);
        assert_eq!(stats[1].snapshots, 1);
    }

    #[test]
    fn listings_with_latest_snapshot_orders_newest_first() {
        use chrono::TimeZone;

        let mut store = Store::open_in_memory().unwrap();
        let day1 = Utc.with_ymd_and_hms(2026, 1, 2, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();

        commit_batch_at(
            &mut store,
            &[
                raw("A1", Some(300_000), Some(60.0)),
                raw("A2", Some(400_000), Some(80.0)),
            ],
            day1,
        );
        commit_batch_at(
            &mut store,
            &[
                raw("A1", Some(320_000), Some(60.0)),
                raw("A2", Some(400_000), Some(80.0)),
            ],
            day2,
        );

        let listings = store.listings_with_latest_snapshot().unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].listing.ad_id, "A1");
        assert_eq!(
            listings[0].latest_snapshot.as_ref().unwrap().observed_at,
            day2
        );
        assert_eq!(listings[1].listing.ad_id, "A2");
        assert_eq!(
            listings[1].latest_snapshot.as_ref().unwrap().price,
            Some(400_000)
        );
    }
}
