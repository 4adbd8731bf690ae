use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SCRAPE_URL;
use crate::models::RawListing;

/// Search parameters for a scrape run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Willhaben search results URL.
    pub base_url: String,
    /// Cap on result pages to fetch (None for all).
    pub max_pages: Option<u32>,
    /// Expected rows per results page, used when the payload does not
    /// report `rowsRequested`.
    pub rows_per_page: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SCRAPE_URL.to_string(),
            max_pages: None,
            rows_per_page: 30,
        }
    }
}

/// One validated batch from an extraction adapter.
#[derive(Debug, Clone, Default)]
pub struct ScrapedBatch {
    pub records: Vec<RawListing>,
    /// Raw records dropped at the adapter boundary for lacking an ad id.
    pub dropped: u32,
}
