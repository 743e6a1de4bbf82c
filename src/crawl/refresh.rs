//! Discover combinations and upsert them into the store.

use tracing::{error, info};

use super::enumerator::CombinationEnumerator;
use crate::repository::CombinationRepository;

/// Outcome of one combination refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub discovered: usize,
    pub stored: usize,
    pub failed: usize,
}

/// Enumerates the filter tree and records every leaf.
pub struct CombinationRefresh {
    enumerator: CombinationEnumerator,
    repo: CombinationRepository,
}

impl CombinationRefresh {
    pub fn new(enumerator: CombinationEnumerator, repo: CombinationRepository) -> Self {
        Self { enumerator, repo }
    }

    /// Run discovery and upsert each combination.
    ///
    /// A combination that fails to persist is logged and counted; the rest
    /// are still written.
    pub async fn run(&self) -> RefreshReport {
        info!("Refreshing filter combinations");
        let combinations = self.enumerator.discover().await;
        let total = combinations.len();

        let mut report = RefreshReport {
            discovered: total,
            ..Default::default()
        };

        for (i, combination) in combinations.iter().enumerate() {
            match self.repo.get_or_create(combination).await {
                Ok(_) => report.stored += 1,
                Err(e) => {
                    error!("Failed to store combination {}: {}", combination.applied(), e);
                    report.failed += 1;
                }
            }

            if (i + 1) % 100 == 0 {
                info!("Stored {}/{} combinations", i + 1, total);
            }
        }

        info!(
            "Combination refresh finished: {} discovered, {} stored, {} failed",
            report.discovered, report.stored, report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::enumerator::tests::{select_html, FakeFetcher};
    use crate::models::{AppliedFilters, FilterField};
    use crate::repository::{DbContext, DbPool};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fetcher(institutes: &[(&str, &str)]) -> Arc<FakeFetcher> {
        let root = format!(
            "{}{}",
            select_html(FilterField::Level, &[("1", "Bachelor")]),
            select_html(FilterField::Category, &[("0", "Budget"), ("3", "Paid")])
        );
        Arc::new(
            FakeFetcher::default()
                .page(AppliedFilters::new(), root)
                .page(
                    AppliedFilters::new().with(FilterField::Level, "1"),
                    select_html(FilterField::Institute, institutes),
                ),
        )
    }

    fn two_level_enumerator(fetcher: Arc<FakeFetcher>) -> CombinationEnumerator {
        CombinationEnumerator::new(
            fetcher,
            vec![FilterField::Level, FilterField::Institute],
            vec![FilterField::Category],
        )
    }

    #[tokio::test]
    async fn test_incomplete_combinations_are_counted_as_failed() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(DbPool::sqlite_from_path(&dir.path().join("test.db")));
        ctx.init_schema().await.unwrap();

        let refresh = CombinationRefresh::new(
            two_level_enumerator(fetcher(&[("0", "Main"), ("1", "Branch")])),
            ctx.combinations(),
        );
        let report = refresh.run().await;

        // Two-level combinations lack faculty and below
        assert_eq!(report.discovered, 4);
        assert_eq!(report.stored, 0);
        assert_eq!(report.failed, 4);
        assert_eq!(ctx.combinations().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeated_refresh_does_not_duplicate() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(DbPool::sqlite_from_path(&dir.path().join("test.db")));
        ctx.init_schema().await.unwrap();

        let level = AppliedFilters::new().with(FilterField::Level, "1");
        let main = level.clone().with(FilterField::Institute, "0");
        let cs = main.clone().with(FilterField::Faculty, "5");
        let math = cs.clone().with(FilterField::Speciality, "166");
        let root = format!(
            "{}{}",
            select_html(FilterField::Level, &[("1", "Bachelor")]),
            select_html(FilterField::Category, &[("0", "Budget"), ("x", "Broken")])
        );
        let fetcher = Arc::new(
            FakeFetcher::default()
                .page(AppliedFilters::new(), root)
                .page(level, select_html(FilterField::Institute, &[("0", "Main")]))
                .page(main, select_html(FilterField::Faculty, &[("5", "CS")]))
                .page(cs, select_html(FilterField::Speciality, &[("166", "Applied Math")]))
                .page(math, select_html(FilterField::StudyForm, &[("1", "Full-time")])),
        );

        let refresh = CombinationRefresh::new(
            CombinationEnumerator::standard(fetcher),
            ctx.combinations(),
        );

        let first = refresh.run().await;
        assert_eq!(first.discovered, 2);
        assert_eq!(first.stored, 1);
        // Non-integer category value
        assert_eq!(first.failed, 1);

        let second = refresh.run().await;
        assert_eq!(second, first);
        assert_eq!(ctx.combinations().count().await.unwrap(), 1);
    }
}
