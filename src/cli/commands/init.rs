//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::util::redact_url_password;

use crate::cli::helpers::open_store;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    let combinations = ctx.combinations().count().await?;

    println!(
        "{} Initialized database {}",
        style("✓").green(),
        redact_url_password(&settings.database_url())
    );
    println!("  Filter page: {}", settings.base_url);
    if combinations == 0 {
        println!(
            "  {} No combinations yet. Run 'admissions refresh-combinations' next",
            style("!").yellow()
        );
    } else {
        println!("  {} stored combinations", combinations);
    }

    Ok(())
}
