//! Shared helpers for CLI commands.

use std::sync::Arc;

use anyhow::Context;

use crate::config::Settings;
use crate::models::{AppliedFilters, FilterField};
use crate::repository::util::redact_url_password;
use crate::repository::DbContext;
use crate::scrapers::HttpPageFetcher;

/// Open the configured store and make sure its schema exists.
pub async fn open_store(settings: &Settings) -> anyhow::Result<DbContext> {
    settings.ensure_directories()?;
    let url = settings.database_url();
    let ctx = DbContext::from_url(&url)
        .with_context(|| format!("Failed to open database {}", redact_url_password(&url)))?;
    ctx.init_schema().await?;
    Ok(ctx)
}

/// HTTP fetcher for the configured filter page.
pub fn create_fetcher(settings: &Settings) -> anyhow::Result<Arc<HttpPageFetcher>> {
    let fetcher = HttpPageFetcher::new(&settings.base_url, settings.request_timeout())
        .with_context(|| format!("Invalid base URL {}", settings.base_url))?;
    Ok(Arc::new(fetcher))
}

/// Parse `field=value` pairs given on the command line, keeping their order.
pub fn parse_assignments(args: &[String]) -> anyhow::Result<Vec<(FilterField, String)>> {
    args.iter()
        .map(|arg| {
            let (name, value) = arg
                .split_once('=')
                .with_context(|| format!("Expected field=value, got '{}'", arg))?;
            let field = FilterField::from_str(name)
                .with_context(|| format!("Unknown filter field '{}'", name))?;
            let value = value.trim();
            anyhow::ensure!(!value.is_empty(), "Empty value for {}", field);
            Ok((field, value.to_string()))
        })
        .collect()
}

/// First field in dependency order that `applied` leaves unset.
pub fn next_field(applied: &AppliedFilters) -> Option<FilterField> {
    FilterField::ALL
        .into_iter()
        .find(|field| applied.get(*field).is_none())
}
