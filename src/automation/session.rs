//! Step-by-step filter selection for a live user.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::pool::{Lease, ResourcePool};
use super::resource::{AutomationError, FailureKind};
use crate::models::{AppliedFilters, FilterField, FilterOption, StatisticsRecord};
use crate::scrapers::TableParser;

/// Outcome of one filter step.
#[derive(Debug)]
pub enum FilterStep {
    /// Filter applied; `applied` includes it. Keep the lease for the next step.
    Ok { lease: Lease, applied: AppliedFilters },
    /// Filter could not be applied. The caller should release the lease.
    Failed {
        lease: Lease,
        kind: FailureKind,
        error: AutomationError,
    },
    /// No session came free within the acquire timeout.
    Unavailable,
}

/// Interactive path through the session pool.
#[derive(Clone)]
pub struct FilterSession {
    pool: ResourcePool,
    acquire_timeout: Duration,
    parser: Arc<dyn TableParser>,
}

impl FilterSession {
    pub fn new(pool: ResourcePool, acquire_timeout: Duration, parser: Arc<dyn TableParser>) -> Self {
        Self {
            pool,
            acquire_timeout,
            parser,
        }
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Apply `field=value`, acquiring a session first when `lease` is `None`.
    pub async fn apply_filter(
        &self,
        lease: Option<Lease>,
        applied: AppliedFilters,
        field: FilterField,
        value: &str,
    ) -> FilterStep {
        let lease = match lease {
            Some(lease) => lease,
            None => match self.pool.acquire(self.acquire_timeout).await {
                Some(lease) => lease,
                None => return FilterStep::Unavailable,
            },
        };

        let (lease, result) = self
            .pool
            .run_filter_step(lease, applied.clone(), field, value.to_string())
            .await;

        match result {
            Ok(()) => {
                info!("Filter {}={} applied on session #{}", field, value, lease.id());
                FilterStep::Ok {
                    lease,
                    applied: applied.with(field, value),
                }
            }
            Err(e) => {
                error!("Filter {}={} failed: {}", field, value, e);
                FilterStep::Failed {
                    lease,
                    kind: e.kind(),
                    error: e,
                }
            }
        }
    }

    /// Options the session currently offers for `field`.
    pub async fn options(
        &self,
        lease: Lease,
        field: FilterField,
    ) -> (Lease, Result<Vec<FilterOption>, AutomationError>) {
        self.pool.run_with(lease, move |resource| resource.options(field)).await
    }

    /// Rows of the page the session is on, for the analysis side.
    pub async fn dataset(&self, lease: Lease) -> (Lease, Result<Vec<StatisticsRecord>, AutomationError>) {
        let (lease, html) = self.pool.run_with(lease, |resource| resource.page_html()).await;
        let rows = html.map(|html| self.parser.parse(&html));
        (lease, rows)
    }

    /// Hand the session back.
    pub fn finish(&self, lease: Option<Lease>) {
        self.pool.release(lease);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::pool::tests::fake_pool;

    struct EchoParser;

    impl TableParser for EchoParser {
        fn parse(&self, html: &str) -> Vec<StatisticsRecord> {
            vec![StatisticsRecord {
                note: Some(html.to_string()),
                ..Default::default()
            }]
        }
    }

    async fn session(size: usize) -> FilterSession {
        let (pool, _factory) = fake_pool(size).await;
        FilterSession::new(pool, Duration::from_millis(100), Arc::new(EchoParser))
    }

    #[tokio::test]
    async fn test_walk_two_levels_and_read_dataset() {
        let session = session(1).await;

        let FilterStep::Ok { lease, applied } = session
            .apply_filter(None, AppliedFilters::new(), FilterField::Level, "1")
            .await
        else {
            panic!("level step failed");
        };
        assert_eq!(applied.get(FilterField::Level), Some("1"));

        let (lease, options) = session.options(lease, FilterField::Institute).await;
        assert_eq!(options.unwrap().len(), 2);

        let FilterStep::Ok { lease, applied } = session
            .apply_filter(Some(lease), applied, FilterField::Institute, "1")
            .await
        else {
            panic!("institute step failed");
        };
        assert_eq!(applied.len(), 2);

        let (lease, rows) = session.dataset(lease).await;
        let rows = rows.unwrap();
        assert_eq!(rows[0].note.as_deref(), Some("<p>{level=1, inst=1}</p>"));

        session.finish(Some(lease));
        assert_eq!(session.pool().status().idle, 1);
    }

    #[tokio::test]
    async fn test_unavailable_when_pool_exhausted() {
        let session = session(1).await;
        let held = session.pool().acquire(Duration::from_millis(50)).await;
        assert!(held.is_some());

        let step = session
            .apply_filter(None, AppliedFilters::new(), FilterField::Level, "1")
            .await;
        assert!(matches!(step, FilterStep::Unavailable));
        session.finish(held);
    }

    #[tokio::test]
    async fn test_failures_carry_user_facing_kind() {
        let session = session(1).await;

        let step = session
            .apply_filter(None, AppliedFilters::new(), FilterField::Level, "missing")
            .await;
        let FilterStep::Failed { lease, kind, .. } = step else {
            panic!("expected failure");
        };
        assert_eq!(kind, FailureKind::ElementNotFound);
        assert!(lease.is_poisoned());
        session.finish(Some(lease));

        let step = session
            .apply_filter(None, AppliedFilters::new(), FilterField::Level, "disconnect")
            .await;
        match step {
            FilterStep::Failed { kind, lease, .. } => {
                assert_eq!(kind, FailureKind::ConnectionLost);
                session.finish(Some(lease));
            }
            // The replacement may still be in flight
            FilterStep::Unavailable => {}
            FilterStep::Ok { .. } => panic!("expected failure"),
        }
    }
}
