//! Read-only commands over the stored combinations.

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::models::{FilterField, FilterOption};
use crate::repository::StatisticsQuery;

use crate::cli::helpers::open_store;

/// Parent selections narrowing an option listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionScope {
    pub level: Option<i32>,
    pub inst: Option<i32>,
    pub faculty: Option<i32>,
    pub speciality: Option<i32>,
}

fn require(value: Option<i32>, flag: &str, field: FilterField) -> anyhow::Result<i32> {
    value.with_context(|| format!("Listing {} options requires --{}", field, flag))
}

/// List stored options for `field`.
pub async fn cmd_options(settings: &Settings, field: &str, scope: OptionScope) -> anyhow::Result<()> {
    let field = FilterField::from_str(field)
        .with_context(|| format!("Unknown filter field '{}'", field))?;
    let repo = open_store(settings).await?.combinations();

    let options: Vec<FilterOption> = match field {
        FilterField::Level => repo.levels().await?,
        FilterField::Institute => repo.institutes().await?,
        FilterField::Faculty => repo.faculties(require(scope.inst, "inst", field)?).await?,
        FilterField::Speciality => {
            repo.specialities(
                require(scope.level, "level", field)?,
                require(scope.inst, "inst", field)?,
                require(scope.faculty, "faculty", field)?,
            )
            .await?
        }
        FilterField::StudyForm => {
            repo.study_forms(
                require(scope.level, "level", field)?,
                require(scope.inst, "inst", field)?,
                require(scope.faculty, "faculty", field)?,
                require(scope.speciality, "speciality", field)?,
            )
            .await?
        }
        FilterField::Category => repo.categories().await?,
    };

    if options.is_empty() {
        println!("{} No stored {} options", style("!").yellow(), field);
        return Ok(());
    }

    for option in &options {
        println!("  {:>6}  {}", style(&option.value).cyan(), option.label);
    }
    println!("{} {} options", style("✓").green(), options.len());
    Ok(())
}

/// Show statistics of the first combination matching `query`.
pub async fn cmd_query(
    settings: &Settings,
    query: &StatisticsQuery,
    limit: i64,
    json: bool,
) -> anyhow::Result<()> {
    let repo = open_store(settings).await?.combinations();
    let rows = repo.find_statistics(query, limit).await?;

    if json {
        let records: Vec<_> = rows.iter().map(|row| &row.record).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let Some(first) = rows.first() else {
        println!("{} No statistics for this selection", style("!").yellow());
        return Ok(());
    };

    if let Some(combination) = repo.get(first.filter_combination_id).await? {
        println!(
            "{} {} / {} / {} / {} / {} / {}",
            style("→").cyan(),
            combination.level.1,
            combination.institute.1,
            combination.faculty.1,
            combination.speciality.1,
            combination.study_form.1,
            combination.category.1
        );
    }

    for row in &rows {
        let record = &row.record;
        let applicant = record
            .epgu_id
            .as_deref()
            .or(record.applicant_id.as_deref())
            .unwrap_or("-");
        let score = record
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<16} {:>5}  {:<4} {}",
            applicant,
            score,
            record.agreement.as_deref().unwrap_or("-"),
            record.status.as_deref().unwrap_or("")
        );
    }
    println!(
        "{} {} rows (updated {})",
        style("✓").green(),
        rows.len(),
        first.created_at.format("%Y-%m-%d %H:%M")
    );
    Ok(())
}
