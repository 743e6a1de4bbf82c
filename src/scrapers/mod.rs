//! Page fetching and HTML extraction for the admission statistics site.

pub mod extract;
pub mod fetcher;
pub mod table;

pub use extract::{clean_options, extract_filter_options};
pub use fetcher::{filter_url, FetchError, HttpPageFetcher, PageFetcher, USER_AGENT};
pub use table::{HtmlTableParser, TableParser};
