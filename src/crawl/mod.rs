//! The two scheduled refresh operations and the tree walk behind them.

mod batch;
mod enumerator;
mod refresh;

pub use batch::{BatchReport, BatchScrapePipeline};
pub use enumerator::CombinationEnumerator;
pub use refresh::{CombinationRefresh, RefreshReport};
