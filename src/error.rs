use thiserror::Error;

/// Failures upstream of reconciliation: the fetch or the page payload.
/// The orchestrator records these as a Failure run without touching state;
/// recovery is the next scheduled invocation.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to fetch search page {page}: {source}")]
    Http {
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("browser automation failed: {0}")]
    Browser(String),

    #[error("search result payload missing or malformed: {0}")]
    Payload(String),

    /// Pagination ended before the page count the first page promised.
    /// Surfaced as a hard error: silently reconciling a truncated batch
    /// would close every listing on the missing pages.
    #[error("pagination truncated: fetched {fetched} of {expected} pages")]
    Truncated { fetched: u32, expected: u32 },
}

/// Storage failures. A failed atomic apply discards the whole mutation set.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
