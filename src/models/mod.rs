//! Data models for the admission crawler.

mod filter;
mod statistics;

pub use filter::{AppliedFilters, FilterCombination, FilterField, FilterOption, StoredCombination};
pub use statistics::{StatisticsRecord, StoredStatistics};
