//! Interactive automation: blocking browser sessions behind a bounded pool.

#[cfg(feature = "browser")]
mod chrome;
mod executor;
mod pool;
mod resource;
mod session;

#[cfg(feature = "browser")]
pub use chrome::{ChromeSession, ChromeSessionFactory};
pub use executor::{BlockingExecutor, ExecutorError};
pub use pool::{Lease, PoolError, PoolStatus, ResourcePool};
pub use resource::{AutomationError, AutomationResource, FailureKind, ResourceFactory};
pub use session::{FilterSession, FilterStep};
