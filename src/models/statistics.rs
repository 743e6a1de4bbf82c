//! Applicant statistics rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One applicant row scraped from a combination's result table.
///
/// `score` is `None` for categories admitted without examination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub admission_category: Option<String>,
    pub available_places: Option<i32>,
    pub epgu_id: Option<String>,
    pub applicant_id: Option<String>,
    pub score: Option<i32>,
    pub agreement: Option<String>,
    pub status: Option<String>,
    pub note: Option<String>,
}

/// A statistics row as stored, with its owning combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStatistics {
    pub id: i32,
    pub filter_combination_id: i32,
    pub record: StatisticsRecord,
    pub created_at: DateTime<Utc>,
}
