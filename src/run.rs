//! Run orchestrator: one reconciliation pass per scheduled invocation.
//!
//! One sequential pass: read previous state, fetch the batch, reconcile,
//! apply atomically. Every invocation leaves a run row behind, whatever
//! happened; a failed run commits nothing else. Retry belongs to the
//! external scheduler, not to this process.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::models::{RunOutcome, ScrapeRun};
use crate::reconcile::reconcile;
use crate::scrapers::ListingSource;
use crate::store::Store;

pub async fn run_once(source: &dyn ListingSource, store: &mut Store) -> ScrapeRun {
    let started_at = Utc::now();
    info!(source = source.source_name(), "starting scrape run");

    let previous = match store.previous_state() {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "could not read previous state");
            let run = ScrapeRun::failed(started_at, format!("read previous state: {e}"));
            best_effort_record(store, &run);
            return run;
        }
    };
    info!(tracked = previous.len(), "loaded previous state");

    let batch = match source.fetch().await {
        Ok(batch) => batch,
        Err(e) => {
            error!(error = %e, "extraction failed, no mutations applied");
            let run = ScrapeRun::failed(started_at, e.to_string());
            best_effort_record(store, &run);
            return run;
        }
    };

    let rec = reconcile(&previous, &batch.records, Utc::now());
    info!(
        seen = rec.counters.listings_seen,
        new = rec.counters.new_listings,
        updated = rec.counters.updated_snapshots,
        closed = rec.counters.closed_listings,
        reopened = rec.counters.reopened_listings,
        "reconciled batch"
    );

    let (outcome, error_detail) = if batch.dropped > 0 {
        (
            RunOutcome::PartialFailure,
            Some(format!(
                "{} raw records dropped (missing ad id)",
                batch.dropped
            )),
        )
    } else {
        (RunOutcome::Success, None)
    };
    let run = ScrapeRun {
        started_at,
        finished_at: Utc::now(),
        outcome,
        counters: rec.counters,
        error_detail,
    };

    match store.apply(&rec, &run) {
        Ok(()) => {
            info!(outcome = run.outcome.as_str(), "scrape run committed");
            run
        }
        Err(e) => {
            error!(error = %e, "atomic apply failed, run discarded");
            let mut failed = ScrapeRun::failed(started_at, format!("persistence: {e}"));
            // The batch was seen even though nothing committed.
            failed.counters.listings_seen = rec.counters.listings_seen;
            best_effort_record(store, &failed);
            failed
        }
    }
}

/// The audit row for a failed run must not itself abort the process.
fn best_effort_record(store: &Store, run: &ScrapeRun) {
    if let Err(e) = store.record_run(run) {
        warn!(error = %e, "could not record failed run");
    }
}
