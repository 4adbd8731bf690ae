//! Plain-HTTP Willhaben adapter.
//!
//! Willhaben is a Next.js site: every search results page embeds the full
//! `searchResult` payload in a `__NEXT_DATA__` script tag, so listings are
//! extracted from that JSON rather than from the rendered markup. The
//! parsing helpers here are shared with the browser adapter.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;
use crate::models::RawListing;
use crate::scrapers::traits::ListingSource;
use crate::scrapers::types::{ScrapedBatch, SearchParams};

/// Base for resolving the relative SEO_URL attribute into a listing URL.
pub const WILLHABEN_BASE_URL: &str = "https://www.willhaben.at/iad/";

/// Willhaben scraper going through reqwest. The site intermittently serves
/// a bot wall to plain clients; the browser adapter is the fallback.
pub struct WillhabenScraper {
    client: Client,
    params: SearchParams,
}

impl WillhabenScraper {
    pub fn with_params(params: SearchParams) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, params })
    }

    /// Fetch one results page and pull out its `searchResult` payload.
    /// `Ok(None)` means the page rendered without one (past the last page,
    /// or the bot wall).
    async fn fetch_search_result(&self, page: u32) -> Result<Option<Value>, ExtractionError> {
        let url = page_url(&self.params.base_url, page);
        debug!(%url, "fetching results page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ExtractionError::Http { page, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Payload(format!(
                "page {page} returned status {status}"
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|source| ExtractionError::Http { page, source })?;
        debug!(bytes = html.len(), page, "downloaded results page");

        Ok(next_data_search_result(&html))
    }
}

#[async_trait]
impl ListingSource for WillhabenScraper {
    async fn fetch(&self) -> Result<ScrapedBatch, ExtractionError> {
        info!(url = %self.params.base_url, "starting Willhaben scrape");

        let mut pager = ResultPager::new(&self.params);
        while let Some(page) = pager.next_page() {
            let payload = self.fetch_search_result(page).await?;
            if pager.ingest(page, payload)? == PagerStep::Done {
                break;
            }
        }

        let batch = pager.finish();
        info!(listings = batch.records.len(), "Willhaben scrape finished");
        Ok(batch)
    }

    fn source_name(&self) -> &'static str {
        "willhaben"
    }
}

/// Drives pagination over search results. Both adapters feed every page's
/// payload (or its absence) into a pager, which decides between carrying on,
/// stopping cleanly and failing the run over a truncated result set.
#[derive(Debug)]
pub(crate) struct ResultPager {
    max_pages: Option<u32>,
    rows_per_page: u32,
    total_pages: Option<u32>,
    next: u32,
    batch: ScrapedBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PagerStep {
    Continue,
    Done,
}

impl ResultPager {
    pub(crate) fn new(params: &SearchParams) -> Self {
        Self {
            max_pages: params.max_pages,
            rows_per_page: params.rows_per_page,
            total_pages: None,
            next: 1,
            batch: ScrapedBatch::default(),
        }
    }

    /// Page to fetch next, `None` once the run is complete.
    pub(crate) fn next_page(&self) -> Option<u32> {
        if let Some(max) = self.max_pages {
            if self.next > max {
                return None;
            }
        }
        if let Some(total) = self.total_pages {
            if self.next > total {
                return None;
            }
        }
        Some(self.next)
    }

    /// Feed the `searchResult` payload of `page`; `None` when the page
    /// rendered without one. A page that yields no records while the
    /// reported result size promises more is a truncated result set and
    /// fails hard: committing the partial batch would falsely close every
    /// listing on the unfetched pages.
    pub(crate) fn ingest(
        &mut self,
        page: u32,
        payload: Option<Value>,
    ) -> Result<PagerStep, ExtractionError> {
        let Some(result) = payload else {
            return match (page, self.total_pages) {
                (1, _) => Err(ExtractionError::Payload(
                    "first results page carried no search result".to_string(),
                )),
                (_, Some(total)) if page <= total => Err(ExtractionError::Truncated {
                    fetched: page - 1,
                    expected: total,
                }),
                _ => Ok(PagerStep::Done),
            };
        };

        if self.total_pages.is_none() {
            self.total_pages = page_count(&result, self.rows_per_page);
            if let Some(total) = self.total_pages {
                info!(total_pages = total, "search reports result size");
            }
        }

        let (records, dropped) = extract_listings(&result);
        info!(page, listings = records.len(), "extracted results page");
        self.batch.dropped += dropped;

        if records.is_empty() {
            if let Some(total) = self.total_pages {
                if page <= total {
                    return Err(ExtractionError::Truncated {
                        fetched: page - 1,
                        expected: total,
                    });
                }
            }
            return Ok(PagerStep::Done);
        }

        self.batch.records.extend(records);
        self.next = page + 1;
        Ok(PagerStep::Continue)
    }

    pub(crate) fn finish(self) -> ScrapedBatch {
        if self.batch.dropped > 0 {
            warn!(dropped = self.batch.dropped, "dropped raw records without ad id");
        }
        self.batch
    }
}

/// URL of results page `page`, appending the `page` query parameter.
pub(crate) fn page_url(base_url: &str, page: u32) -> String {
    if page <= 1 {
        base_url.to_string()
    } else if base_url.contains('?') {
        format!("{base_url}&page={page}")
    } else {
        format!("{base_url}?page={page}")
    }
}

/// Locate the `__NEXT_DATA__` script tag and descend to the `searchResult`
/// object. `None` when the tag or the payload is absent.
pub(crate) fn next_data_search_result(html: &str) -> Option<Value> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&selector).next()?;
    let payload: Value = serde_json::from_str(&script.inner_html()).ok()?;
    payload
        .pointer("/props/pageProps/searchResult")
        .filter(|v| !v.is_null())
        .cloned()
}

/// Page count the payload implies: ceil(rowsFound / rowsRequested).
pub(crate) fn page_count(search_result: &Value, default_rows: u32) -> Option<u32> {
    let found = search_result.get("rowsFound").and_then(Value::as_u64)?;
    let requested = search_result
        .get("rowsRequested")
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(default_rows));
    if requested == 0 {
        return None;
    }
    Some(((found + requested - 1) / requested) as u32)
}

/// Extract validated raw listings from one `searchResult` payload.
/// Returns the records plus the count of summaries dropped for missing
/// the ad id.
pub(crate) fn extract_listings(search_result: &Value) -> (Vec<RawListing>, u32) {
    let mut records = Vec::new();
    let mut dropped = 0u32;

    let Some(items) = search_result
        .pointer("/advertSummaryList/advertSummary")
        .and_then(Value::as_array)
    else {
        return (records, dropped);
    };

    for item in items {
        let ad_id = match item.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if ad_id.is_empty() {
            warn!("advert summary without id, dropping record");
            dropped += 1;
            continue;
        }

        let attrs = attributes_to_map(item.get("attributes"));
        let title = attr(&attrs, &["HEADING", "UNIT_TITLE"]).unwrap_or_default();
        let location = attr(&attrs, &["LOCATION", "ADDRESS"]).unwrap_or_default();
        // Unparseable numbers stay absent; zero would poison the statistics.
        let price = attr(&attrs, &["PRICE"])
            .as_deref()
            .and_then(parse_price)
            .or_else(|| {
                attr(&attrs, &["PRICE_FOR_DISPLAY"])
                    .as_deref()
                    .and_then(parse_price)
            });
        let rooms = attr(&attrs, &["NUMBER_OF_ROOMS", "ROOMS"])
            .as_deref()
            .and_then(parse_number);
        let size_sqm = attr(&attrs, &["ESTATE_SIZE", "LIVING_AREA"])
            .as_deref()
            .and_then(parse_number);
        let url = attr(&attrs, &["SEO_URL"])
            .map(|seo| join_listing_url(&seo))
            .unwrap_or_default();

        records.push(RawListing {
            ad_id,
            title,
            price,
            location,
            rooms,
            size_sqm,
            url,
        });
    }

    (records, dropped)
}

/// Flatten Willhaben's `{"attribute": [{"name": ..., "values": [...]}]}`
/// structure into name -> first value.
fn attributes_to_map(attributes: Option<&Value>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(entries) = attributes
        .and_then(|a| a.get("attribute"))
        .and_then(Value::as_array)
    else {
        return map;
    };
    for entry in entries {
        let name = entry.get("name").and_then(Value::as_str);
        let value = entry
            .get("values")
            .and_then(Value::as_array)
            .and_then(|v| v.first())
            .and_then(Value::as_str);
        if let (Some(name), Some(value)) = (name, value) {
            map.insert(name.to_string(), value.to_string());
        }
    }
    map
}

fn attr(attrs: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| attrs.get(*n))
        .filter(|v| !v.is_empty())
        .cloned()
}

/// Numeric price out of a display string like `€ 448.400`, European
/// thousands separators stripped.
pub(crate) fn parse_price(price: &str) -> Option<i64> {
    if price.is_empty() {
        return None;
    }
    let cleaned: String = price
        .chars()
        .filter(|c| !matches!(c, '€' | ' ' | '\u{a0}' | '.' | ','))
        .collect();
    cleaned.parse().ok()
}

/// Numeric size/rooms out of a string like `80` or `80,5`.
pub(crate) fn parse_number(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    value.trim().replace(',', ".").parse().ok()
}

fn join_listing_url(seo_url: &str) -> String {
    format!("{}{}", WILLHABEN_BASE_URL, seo_url.trim_start_matches('/'))
}
