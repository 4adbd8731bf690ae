//! Browser-based Willhaben adapter using headless Chrome.
//!
//! The site serves a bot wall to plain HTTP clients often enough that the
//! scheduled run goes through a real browser by default. The page hydrates
//! `window.__NEXT_DATA__` on load; the payload is read straight out of the
//! JS context instead of re-parsing the markup.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ExtractionError;
use crate::scrapers::traits::ListingSource;
use crate::scrapers::types::{ScrapedBatch, SearchParams};
use crate::scrapers::willhaben::{page_url, PagerStep, ResultPager};

const NEXT_DATA_EXPR: &str =
    "JSON.stringify((window.__NEXT_DATA__ && window.__NEXT_DATA__.props \
     && window.__NEXT_DATA__.props.pageProps \
     && window.__NEXT_DATA__.props.pageProps.searchResult) || null)";

/// How long to wait for `__NEXT_DATA__` to hydrate before giving up on a page.
const HYDRATION_ATTEMPTS: u32 = 20;
const HYDRATION_POLL: Duration = Duration::from_millis(500);

/// Browser-based scraper for Willhaben search results.
pub struct WillhabenBrowserScraper {
    browser: Browser,
    params: SearchParams,
}

impl WillhabenBrowserScraper {
    /// Launch headless Chrome for the given search.
    pub fn with_params(params: SearchParams) -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self { browser, params })
    }

    /// Navigate to one results page and read its `searchResult` payload out
    /// of the hydrated page. `Ok(None)` when the payload never appears.
    fn fetch_search_result(&self, page: u32) -> Result<Option<Value>, ExtractionError> {
        let url = page_url(&self.params.base_url, page);
        debug!(%url, "navigating to results page");

        let tab = self
            .browser
            .new_tab()
            .map_err(|e| ExtractionError::Browser(e.to_string()))?;
        let result = self.read_payload(&tab, &url);
        if let Err(e) = tab.close(true) {
            debug!(error = %e, "could not close tab");
        }
        result
    }

    fn read_payload(
        &self,
        tab: &headless_chrome::Tab,
        url: &str,
    ) -> Result<Option<Value>, ExtractionError> {
        tab.navigate_to(url)
            .map_err(|e| ExtractionError::Browser(e.to_string()))?;
        tab.wait_until_navigated()
            .map_err(|e| ExtractionError::Browser(e.to_string()))?;

        // Hydration lags navigation; poll instead of one long sleep.
        for _ in 0..HYDRATION_ATTEMPTS {
            let evaluated = tab
                .evaluate(NEXT_DATA_EXPR, false)
                .map_err(|e| ExtractionError::Browser(e.to_string()))?;
            if let Some(Value::String(payload)) = evaluated.value {
                if payload != "null" {
                    let parsed: Value = serde_json::from_str(&payload).map_err(|e| {
                        ExtractionError::Payload(format!("search result not valid JSON: {e}"))
                    })?;
                    return Ok(Some(parsed));
                }
            }
            thread::sleep(HYDRATION_POLL);
        }

        debug!(%url, "page never hydrated a search result");
        Ok(None)
    }
}

#[async_trait]
impl ListingSource for WillhabenBrowserScraper {
    // CDP calls block, but a scheduled run is the only thing on the runtime.
    async fn fetch(&self) -> Result<ScrapedBatch, ExtractionError> {
        info!(url = %self.params.base_url, "starting browser-based Willhaben scrape");

        let mut pager = ResultPager::new(&self.params);
        while let Some(page) = pager.next_page() {
            let payload = self.fetch_search_result(page)?;
            if pager.ingest(page, payload)? == PagerStep::Done {
                break;
            }
        }

        let batch = pager.finish();
        info!(listings = batch.records.len(), "browser scrape finished");
        Ok(batch)
    }

    fn source_name(&self) -> &'static str {
        "willhaben-browser"
    }
}
