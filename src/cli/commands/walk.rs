//! Interactive filter walk through the browser session pool.

use crate::config::Settings;

#[cfg(feature = "browser")]
mod browser {
    use std::sync::Arc;

    use anyhow::Context;
    use console::style;
    use url::Url;

    use crate::automation::{
        BlockingExecutor, ChromeSessionFactory, FilterSession, FilterStep, Lease, ResourcePool,
    };
    use crate::cli::helpers::{next_field, parse_assignments};
    use crate::config::Settings;
    use crate::models::{AppliedFilters, FilterField};
    use crate::scrapers::HtmlTableParser;

    pub async fn cmd_walk(settings: &Settings, filters: &[String], limit: usize) -> anyhow::Result<()> {
        let steps = parse_assignments(filters)?;
        anyhow::ensure!(!steps.is_empty(), "Give at least one filter, e.g. level=1");

        let base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("Invalid base URL {}", settings.base_url))?;
        let factory = Arc::new(ChromeSessionFactory::new(
            settings.browser.clone(),
            base_url,
            tokio::runtime::Handle::current(),
        ));
        let executor = BlockingExecutor::new(settings.max_workers);

        println!("{} Starting browser session", style("→").cyan());
        // One user, one session
        let pool = ResourcePool::start(1, executor.clone(), factory).await?;
        let session = FilterSession::new(
            pool.clone(),
            settings.acquire_timeout(),
            Arc::new(HtmlTableParser::new()),
        );

        let result = walk(&session, steps, limit).await;

        pool.close_all().await;
        executor.close();
        result
    }

    async fn walk(
        session: &FilterSession,
        steps: Vec<(FilterField, String)>,
        limit: usize,
    ) -> anyhow::Result<()> {
        let mut lease: Option<Lease> = None;
        let mut applied = AppliedFilters::new();

        for (field, value) in steps {
            match session
                .apply_filter(lease.take(), applied.clone(), field, &value)
                .await
            {
                FilterStep::Ok {
                    lease: next,
                    applied: now,
                } => {
                    println!("  {} {}={}", style("✓").green(), field, value);
                    lease = Some(next);
                    applied = now;
                }
                FilterStep::Failed { lease, kind, error } => {
                    session.finish(Some(lease));
                    anyhow::bail!("{} ({})", kind.user_message(), error);
                }
                FilterStep::Unavailable => {
                    anyhow::bail!("No browser session became available, try again later")
                }
            }
        }

        let Some(mut current) = lease else {
            return Ok(());
        };

        if let Some(field) = next_field(&applied) {
            let (returned, options) = session.options(current, field).await;
            current = returned;
            match options {
                Ok(options) if !options.is_empty() => {
                    println!("{} Next {} options:", style("→").cyan(), field);
                    for option in options {
                        println!("  {:>6}  {}", style(&option.value).cyan(), option.label);
                    }
                }
                Ok(_) => println!("{} No {} options offered", style("!").yellow(), field),
                Err(e) => println!("{} {}", style("!").yellow(), e.kind().user_message()),
            }
        }

        let (returned, rows) = session.dataset(current).await;
        session.finish(Some(returned));
        let rows = rows.map_err(|e| anyhow::anyhow!("{} ({})", e.kind().user_message(), e))?;

        for record in rows.iter().take(limit) {
            println!(
                "  {:<24} {:<16} {:>5}  {}",
                record.admission_category.as_deref().unwrap_or("-"),
                record
                    .epgu_id
                    .as_deref()
                    .or(record.applicant_id.as_deref())
                    .unwrap_or("-"),
                record
                    .score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                record.status.as_deref().unwrap_or("")
            );
        }
        println!(
            "{} {} rows on the page for {}",
            style("✓").green(),
            rows.len(),
            applied
        );
        Ok(())
    }
}

/// Apply `filters` in order through a pooled browser session and print what
/// the final page offers.
#[cfg(feature = "browser")]
pub async fn cmd_walk(settings: &Settings, filters: &[String], limit: usize) -> anyhow::Result<()> {
    browser::cmd_walk(settings, filters, limit).await
}

#[cfg(not(feature = "browser"))]
pub async fn cmd_walk(_settings: &Settings, _filters: &[String], _limit: usize) -> anyhow::Result<()> {
    anyhow::bail!("Browser support not compiled. Rebuild with: cargo build --features browser")
}
