//! Scheduled refresh commands.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use tokio::time::Instant;
use tracing::error;

use crate::config::Settings;
use crate::crawl::{BatchScrapePipeline, CombinationEnumerator, CombinationRefresh};
use crate::scrapers::HtmlTableParser;

use crate::cli::helpers::{create_fetcher, open_store};

/// Discover all combinations and upsert them.
pub async fn cmd_refresh_combinations(settings: &Settings) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    let fetcher = create_fetcher(settings)?;

    println!(
        "{} Discovering filter combinations on {}",
        style("→").cyan(),
        settings.base_url
    );

    let refresh = CombinationRefresh::new(CombinationEnumerator::standard(fetcher), ctx.combinations());
    let report = refresh.run().await;

    let mark = if report.failed == 0 {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    println!(
        "{} {} discovered, {} stored, {} failed",
        mark, report.discovered, report.stored, report.failed
    );
    if report.discovered == 0 {
        println!(
            "  {} Nothing found; check the base URL and your connection",
            style("!").yellow()
        );
    }

    Ok(())
}

/// Fetch and replace statistics for every stored combination.
pub async fn cmd_refresh_statistics(settings: &Settings) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    let fetcher = create_fetcher(settings)?;

    let total = ctx.combinations().count().await?;
    println!(
        "{} Refreshing statistics for {} combinations",
        style("→").cyan(),
        total
    );

    let pipeline = BatchScrapePipeline::new(
        ctx.combinations(),
        fetcher,
        Arc::new(HtmlTableParser::new()),
        settings.request_delay(),
    );
    let report = pipeline.run_full().await?;

    let mark = if report.failed == 0 {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    println!(
        "{} {} attempted, {} succeeded, {} empty, {} failed, {} rows saved",
        mark, report.attempted, report.succeeded, report.empty, report.failed, report.rows_saved
    );

    Ok(())
}

fn describe(interval: Duration) -> String {
    let hours = interval.as_secs() / 3600;
    if hours >= 24 && hours % 24 == 0 {
        format!("{}d", hours / 24)
    } else {
        format!("{}h", hours)
    }
}

/// Run both refreshes on their intervals until Ctrl-C.
///
/// A failing run is logged and retried at its next slot.
pub async fn cmd_daemon(settings: &Settings, run_immediately: bool) -> anyhow::Result<()> {
    let combinations_every = settings.combinations_interval();
    let statistics_every = settings.statistics_interval();
    anyhow::ensure!(
        !combinations_every.is_zero() && !statistics_every.is_zero(),
        "Refresh intervals must be non-zero"
    );

    println!(
        "{} Running in daemon mode (combinations every {}, statistics every {})",
        style("→").cyan(),
        describe(combinations_every),
        describe(statistics_every)
    );

    let start = Instant::now();
    let (mut next_combinations, mut next_statistics) = if run_immediately {
        (start, start)
    } else {
        (
            next_run(start, combinations_every),
            next_run(start, statistics_every),
        )
    };

    loop {
        if Instant::now() >= next_combinations {
            match until_interrupted(cmd_refresh_combinations(settings)).await {
                Some(Err(e)) => error!("Combination refresh failed: {:#}", e),
                Some(Ok(())) => {}
                None => return stop(),
            }
            next_combinations = next_run(Instant::now(), combinations_every);
        }

        // Statistics follow a fresh combination list when both are due
        if Instant::now() >= next_statistics {
            match until_interrupted(cmd_refresh_statistics(settings)).await {
                Some(Err(e)) => error!("Statistics refresh failed: {:#}", e),
                Some(Ok(())) => {}
                None => return stop(),
            }
            next_statistics = next_run(Instant::now(), statistics_every);
        }

        let wake = next_combinations.min(next_statistics);
        if until_interrupted(tokio::time::sleep_until(wake)).await.is_none() {
            return stop();
        }
    }
}

/// Drive `job` to completion unless Ctrl-C arrives first.
async fn until_interrupted<F: Future>(job: F) -> Option<F::Output> {
    tokio::select! {
        output = job => Some(output),
        _ = tokio::signal::ctrl_c() => None,
    }
}

fn stop() -> anyhow::Result<()> {
    println!("{} Interrupted, stopping", style("■").dim());
    Ok(())
}

/// `from + every`, clamped far into the future instead of overflowing.
fn next_run(from: Instant, every: Duration) -> Instant {
    from.checked_add(every)
        .unwrap_or_else(|| from + Duration::from_secs(86_400 * 365 * 30))
}
