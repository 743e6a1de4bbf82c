//! Daily statistics refresh over every stored combination.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::repository::{CombinationRepository, RepositoryError};
use crate::scrapers::{PageFetcher, TableParser};

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
    pub rows_saved: usize,
}

/// Fetches each stored combination's page and replaces its statistics.
pub struct BatchScrapePipeline {
    repo: CombinationRepository,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn TableParser>,
    delay: Duration,
}

impl BatchScrapePipeline {
    pub fn new(
        repo: CombinationRepository,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn TableParser>,
        delay: Duration,
    ) -> Self {
        Self {
            repo,
            fetcher,
            parser,
            delay,
        }
    }

    /// Refresh statistics for all stored combinations.
    ///
    /// Only failing to list the combinations is an error. Per-combination
    /// failures are logged and counted, and an empty table leaves the stored
    /// rows alone.
    pub async fn run_full(&self) -> Result<BatchReport, RepositoryError> {
        let combinations = self.repo.get_all().await?;
        let total = combinations.len();
        let mut report = BatchReport::default();

        if combinations.is_empty() {
            warn!("No stored combinations, run refresh-combinations first");
            return Ok(report);
        }

        info!("Refreshing statistics for {} combinations", total);

        for (i, combination) in combinations.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            report.attempted += 1;

            let applied = combination.applied();
            let html = self.fetcher.fetch_page(&applied).await;
            let rows = self.parser.parse(&html);

            if rows.is_empty() {
                warn!("No statistics rows for combination {} {}", combination.id, applied);
                report.empty += 1;
                continue;
            }

            match self.repo.replace_statistics(combination.id, &rows).await {
                Ok(saved) => {
                    report.succeeded += 1;
                    report.rows_saved += saved;
                }
                Err(e) => {
                    error!("Failed to save statistics for combination {}: {}", combination.id, e);
                    report.failed += 1;
                }
            }

            if (i + 1) % 100 == 0 {
                info!("Processed {}/{} combinations", i + 1, total);
            }
        }

        info!(
            "Statistics refresh finished: {} attempted, {} succeeded, {} empty, {} failed, {} rows",
            report.attempted, report.succeeded, report.empty, report.failed, report.rows_saved
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppliedFilters, FilterCombination, FilterField, FilterOption, StatisticsRecord};
    use crate::repository::pool::SqlitePool;
    use crate::repository::{DbContext, DbPool};
    use async_trait::async_trait;
    use diesel_async::SimpleAsyncConnection;
    use tempfile::{tempdir, TempDir};

    /// Echoes the speciality value back as the page body.
    struct SpecialityFetcher;

    #[async_trait]
    impl PageFetcher for SpecialityFetcher {
        async fn fetch_page(&self, filters: &AppliedFilters) -> String {
            filters
                .get(FilterField::Speciality)
                .unwrap_or_default()
                .to_string()
        }
    }

    /// "empty" parses to nothing, "fail" to a row the trigger rejects,
    /// anything else to two rows.
    struct MarkerParser;

    impl TableParser for MarkerParser {
        fn parse(&self, html: &str) -> Vec<StatisticsRecord> {
            let note = match html {
                "200" => return Vec::new(),
                "300" => "boom",
                _ => "ok",
            };
            (0..2)
                .map(|i| StatisticsRecord {
                    applicant_id: Some(format!("{}-{}", html, i)),
                    score: Some(200 + i),
                    note: Some(note.to_string()),
                    ..Default::default()
                })
                .collect()
        }
    }

    fn combination(speciality: &str) -> FilterCombination {
        let values = ["1", "0", "5", speciality, "1", "0"];
        FilterCombination::new(
            FilterField::ALL
                .iter()
                .zip(values)
                .map(|(field, value)| (*field, FilterOption::new(value, format!("{} {}", field, value))))
                .collect(),
        )
    }

    async fn setup() -> (DbContext, TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let ctx = DbContext::new(DbPool::sqlite_from_path(&path));
        ctx.init_schema().await.unwrap();

        let mut conn = SqlitePool::from_path(&path).get().await.unwrap();
        conn.batch_execute(
            r#"CREATE TRIGGER fail_marked_insert BEFORE INSERT ON statistics
               WHEN NEW.note = 'boom'
               BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"#,
        )
        .await
        .unwrap();

        (ctx, dir)
    }

    fn pipeline(ctx: &DbContext) -> BatchScrapePipeline {
        BatchScrapePipeline::new(
            ctx.combinations(),
            Arc::new(SpecialityFetcher),
            Arc::new(MarkerParser),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_continues_past_failing_combination() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.combinations();
        let mut ids = Vec::new();
        for speciality in ["100", "200", "300", "400"] {
            ids.push(repo.get_or_create(&combination(speciality)).await.unwrap().id);
        }

        let report = pipeline(&ctx).run_full().await.unwrap();
        assert_eq!(
            report,
            BatchReport {
                attempted: 4,
                succeeded: 2,
                empty: 1,
                failed: 1,
                rows_saved: 4,
            }
        );

        assert_eq!(repo.statistics_for(ids[0]).await.unwrap().len(), 2);
        assert!(repo.statistics_for(ids[1]).await.unwrap().is_empty());
        assert!(repo.statistics_for(ids[2]).await.unwrap().is_empty());
        assert_eq!(repo.statistics_for(ids[3]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_table_keeps_previous_rows() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.combinations();
        let combo = repo.get_or_create(&combination("200")).await.unwrap();
        repo.replace_statistics(
            combo.id,
            &[StatisticsRecord {
                applicant_id: Some("old".to_string()),
                ..Default::default()
            }],
        )
        .await
        .unwrap();

        let report = pipeline(&ctx).run_full().await.unwrap();
        assert_eq!(report.empty, 1);

        let stored = repo.statistics_for(combo.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.applicant_id.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_empty_store_is_not_an_error() {
        let (ctx, _dir) = setup().await;
        let report = pipeline(&ctx).run_full().await.unwrap();
        assert_eq!(report, BatchReport::default());
    }
}
