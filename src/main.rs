mod config;
mod error;
mod models;
mod reconcile;
mod run;
mod scrapers;
mod store;

use config::TrackerConfig;
use models::RunOutcome;
use run::run_once;
use scrapers::{ListingSource, SearchParams, WillhabenBrowserScraper, WillhabenScraper};
use store::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🏠 Apartment Price Tracker - Willhaben");
    info!("======================================");

    let config = TrackerConfig::from_env();
    info!(url = %config.scrape_url, db = %config.database_path.display(), "configuration loaded");

    let mut store = Store::open(&config.database_path)?;

    let params = SearchParams {
        base_url: config.scrape_url.clone(),
        max_pages: config.max_pages,
        ..SearchParams::default()
    };
    let source: Box<dyn ListingSource> = if config.use_browser {
        Box::new(WillhabenBrowserScraper::with_params(params)?)
    } else {
        Box::new(WillhabenScraper::with_params(params)?)
    };

    let run = run_once(source.as_ref(), &mut store).await;

    println!();
    println!(
        "Run {}: {} seen, {} new, {} updated, {} closed, {} reopened",
        run.outcome.as_str(),
        run.counters.listings_seen,
        run.counters.new_listings,
        run.counters.updated_snapshots,
        run.counters.closed_listings,
        run.counters.reopened_listings,
    );

    let open = store.open_count()?;
    let closed = store.closed_count()?;
    println!("Tracked listings: {open} open, {closed} closed");

    if let Some(stats) = store.overall_price_stats()? {
        println!(
            "Market: median € {:.0}, average € {:.0} over {} listings",
            stats.median_price, stats.avg_price, stats.listings
        );
        if let Some(ppsqm) = stats.avg_price_per_sqm {
            println!("Average price per m²: € {ppsqm:.0}");
        }
    }

    let best = store.best_value_listings(5)?;
    if !best.is_empty() {
        println!();
        println!("Best value (€/m²):");
        for (i, listing) in best.iter().enumerate() {
            println!(
                "{}. {} | € {} for {} m² ({:.0} €/m²)",
                i + 1,
                listing.title,
                listing.price,
                listing.size_sqm,
                listing.price_per_sqm
            );
            println!("   {} | {}", listing.location, listing.url);
        }
    }

    if run.outcome == RunOutcome::Failure {
        anyhow::bail!(
            "scrape run failed: {}",
            run.error_detail.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}
