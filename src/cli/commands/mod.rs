//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod init;
mod query;
mod refresh;
mod walk;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;

#[derive(Parser)]
#[command(name = "admissions")]
#[command(about = "Admission statistics crawler")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Discover every filter combination and store it
    RefreshCombinations,

    /// Fetch statistics for every stored combination
    RefreshStatistics,

    /// Run both refreshes on their intervals until interrupted
    Daemon {
        /// Days between combination refreshes (default from config: 30)
        #[arg(long)]
        combinations_days: Option<u64>,
        /// Hours between statistics refreshes (default from config: 24)
        #[arg(long)]
        statistics_hours: Option<u64>,
        /// Wait one interval before the first run instead of starting immediately
        #[arg(long)]
        no_initial_run: bool,
    },

    /// List stored options for a filter field
    Options {
        /// Field: level, inst, faculty, speciality, typeofstudy or category
        field: String,
        #[arg(long)]
        level: Option<i32>,
        #[arg(long)]
        inst: Option<i32>,
        #[arg(long)]
        faculty: Option<i32>,
        #[arg(long)]
        speciality: Option<i32>,
    },

    /// Show stored statistics for the first matching combination
    Query {
        #[arg(long)]
        level: Option<i32>,
        #[arg(long)]
        inst: Option<i32>,
        #[arg(long)]
        faculty: Option<i32>,
        #[arg(long)]
        speciality: Option<i32>,
        #[arg(long)]
        study_form: Option<i32>,
        #[arg(long)]
        category: Option<i32>,
        /// Maximum rows to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply filters step by step in a browser session (e.g. level=1 inst=0)
    Walk {
        /// Filters to apply, in order, as field=value
        filters: Vec<String>,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        /// Remote browser URL (e.g., ws://localhost:9222)
        #[arg(long)]
        browser_url: Option<String>,
        /// Maximum rows of the final page to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut settings, _config) = load_settings(cli.config.as_deref()).await?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::RefreshCombinations => refresh::cmd_refresh_combinations(&settings).await,
        Commands::RefreshStatistics => refresh::cmd_refresh_statistics(&settings).await,
        Commands::Daemon {
            combinations_days,
            statistics_hours,
            no_initial_run,
        } => {
            if let Some(days) = combinations_days {
                settings.combinations_interval_days = days;
            }
            if let Some(hours) = statistics_hours {
                settings.statistics_interval_hours = hours;
            }
            refresh::cmd_daemon(&settings, !no_initial_run).await
        }
        Commands::Options {
            field,
            level,
            inst,
            faculty,
            speciality,
        } => {
            let scope = query::OptionScope {
                level,
                inst,
                faculty,
                speciality,
            };
            query::cmd_options(&settings, &field, scope).await
        }
        Commands::Query {
            level,
            inst,
            faculty,
            speciality,
            study_form,
            category,
            limit,
            json,
        } => {
            let filter = crate::repository::StatisticsQuery {
                level,
                institute: inst,
                faculty,
                speciality,
                study_form,
                category,
            };
            query::cmd_query(&settings, &filter, limit, json).await
        }
        Commands::Walk {
            filters,
            headed,
            browser_url,
            limit,
        } => {
            if headed {
                settings.browser.headless = false;
            }
            if browser_url.is_some() {
                settings.browser.remote_url = browser_url;
            }
            walk::cmd_walk(&settings, &filters, limit).await
        }
    }
}
