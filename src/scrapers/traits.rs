use async_trait::async_trait;

use crate::error::ExtractionError;
use crate::scrapers::types::ScrapedBatch;

/// Common trait for all listing sources.
/// The orchestrator only sees this seam, so the plain-HTTP adapter, the
/// browser adapter and test fakes are interchangeable.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one full, validated batch of raw listings. A truncated or
    /// unreadable result set must fail rather than return partial data.
    async fn fetch(&self) -> Result<ScrapedBatch, ExtractionError>;

    /// Name of the source, for logs and the run summary.
    fn source_name(&self) -> &'static str;
}
