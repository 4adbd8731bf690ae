use std::env;
use std::path::PathBuf;

/// Default Willhaben search: Vienna apartment sale listings.
pub const DEFAULT_SCRAPE_URL: &str =
    "https://www.willhaben.at/iad/immobilien/eigentumswohnung/eigentumswohnung-angebote";

const DEFAULT_DATABASE_PATH: &str = "data/listings.db";

/// Runtime configuration, resolved once at startup and passed explicitly.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Willhaben search URL to scrape (`SCRAPE_URL`).
    pub scrape_url: String,
    /// SQLite database file (`DATABASE_PATH`).
    pub database_path: PathBuf,
    /// Page cap for a single run, unset means all pages (`MAX_PAGES`).
    pub max_pages: Option<u32>,
    /// Fetch through headless Chrome instead of plain HTTP (`USE_BROWSER`,
    /// default true; the site serves a bot wall to plain clients).
    pub use_browser: bool,
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        Self {
            scrape_url: env::var("SCRAPE_URL").unwrap_or_else(|_| DEFAULT_SCRAPE_URL.to_string()),
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH)),
            max_pages: env::var("MAX_PAGES").ok().and_then(|v| v.parse().ok()),
            use_browser: env::var("USE_BROWSER")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(true),
        }
    }
}
