pub mod browser;
pub mod traits;
pub mod types;
pub mod willhaben;

pub use browser::WillhabenBrowserScraper;
pub use traits::ListingSource;
pub use types::{ScrapedBatch, SearchParams};
pub use willhaben::WillhabenScraper;
