//! Filter combination and statistics repository.
//!
//! Combinations are keyed by their six integer filter values (unique
//! together). Statistics for a combination are only ever written as a whole:
//! `replace_statistics` swaps the complete row set inside one transaction.

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::{AsyncConnection, RunQueryDsl};
use thiserror::Error;
use tracing::{debug, info};

use super::diesel_models::{
    FilterCombinationRecord, NewFilterCombination, NewStatisticsRow, StatisticsRow,
};
use super::parse_datetime;
use super::pool::{DbError, DbPool};
use crate::models::{
    FilterCombination, FilterField, FilterOption, StatisticsRecord, StoredCombination,
    StoredStatistics,
};
use crate::schema::{filter_combinations, statistics};
use crate::with_conn;

/// Errors raised by the combination repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Combination has no {0} selection")]
    MissingField(FilterField),
    #[error("Filter {field} has non-integer value '{value}'")]
    InvalidValue { field: FilterField, value: String },
}

impl From<FilterCombinationRecord> for StoredCombination {
    fn from(record: FilterCombinationRecord) -> Self {
        StoredCombination {
            id: record.id,
            level: (record.level_value, record.level_name),
            institute: (record.inst_value, record.inst_name),
            faculty: (record.faculty_value, record.faculty_name),
            speciality: (record.speciality_value, record.speciality_name),
            study_form: (record.typeofstudy_value, record.typeofstudy_name),
            category: (record.category_value, record.category_name),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

impl From<StatisticsRow> for StoredStatistics {
    fn from(row: StatisticsRow) -> Self {
        StoredStatistics {
            id: row.id,
            filter_combination_id: row.filter_combination_id,
            record: StatisticsRecord {
                admission_category: row.admission_category,
                available_places: row.available_places,
                epgu_id: row.epgu_id,
                applicant_id: row.applicant_id,
                score: row.score,
                agreement: row.agreement,
                status: row.status,
                note: row.note,
            },
            created_at: parse_datetime(&row.created_at),
        }
    }
}

impl NewStatisticsRow {
    fn new(filter_combination_id: i32, record: &StatisticsRecord, created_at: &str) -> Self {
        Self {
            filter_combination_id,
            admission_category: record.admission_category.clone(),
            available_places: record.available_places,
            epgu_id: record.epgu_id.clone(),
            applicant_id: record.applicant_id.clone(),
            score: record.score,
            agreement: record.agreement.clone(),
            status: record.status.clone(),
            note: record.note.clone(),
            created_at: created_at.to_string(),
        }
    }
}

/// The six natural-key values of a combination with their labels.
#[derive(Debug, Clone, Copy)]
struct NaturalKey<'a> {
    level: (i32, &'a str),
    institute: (i32, &'a str),
    faculty: (i32, &'a str),
    speciality: (i32, &'a str),
    study_form: (i32, &'a str),
    category: (i32, &'a str),
}

impl<'a> NaturalKey<'a> {
    fn from_combination(combination: &'a FilterCombination) -> Result<Self, RepositoryError> {
        let part = |field: FilterField| -> Result<(i32, &'a str), RepositoryError> {
            let option = combination
                .get(field)
                .ok_or(RepositoryError::MissingField(field))?;
            let value = option
                .value
                .trim()
                .parse::<i32>()
                .map_err(|_| RepositoryError::InvalidValue {
                    field,
                    value: option.value.clone(),
                })?;
            Ok((value, option.label.as_str()))
        };

        Ok(Self {
            level: part(FilterField::Level)?,
            institute: part(FilterField::Institute)?,
            faculty: part(FilterField::Faculty)?,
            speciality: part(FilterField::Speciality)?,
            study_form: part(FilterField::StudyForm)?,
            category: part(FilterField::Category)?,
        })
    }

    fn to_insert(self, updated_at: &'a str) -> NewFilterCombination<'a> {
        NewFilterCombination {
            level_value: self.level.0,
            level_name: self.level.1,
            inst_value: self.institute.0,
            inst_name: self.institute.1,
            faculty_value: self.faculty.0,
            faculty_name: self.faculty.1,
            speciality_value: self.speciality.0,
            speciality_name: self.speciality.1,
            typeofstudy_value: self.study_form.0,
            typeofstudy_name: self.study_form.1,
            category_value: self.category.0,
            category_name: self.category.1,
            updated_at,
        }
    }
}

/// Optional filters for [`CombinationRepository::find_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsQuery {
    pub level: Option<i32>,
    pub institute: Option<i32>,
    pub faculty: Option<i32>,
    pub speciality: Option<i32>,
    pub study_form: Option<i32>,
    pub category: Option<i32>,
}

fn to_options(rows: Vec<(i32, String)>) -> Vec<FilterOption> {
    rows.into_iter()
        .map(|(value, label)| FilterOption::new(value.to_string(), label))
        .collect()
}

/// Repository for filter combinations and their statistics.
#[derive(Clone)]
pub struct CombinationRepository {
    pool: DbPool,
}

impl CombinationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up a combination by its natural key, inserting it when absent.
    ///
    /// An existing combination has its `updated_at` refreshed. A unique
    /// violation on insert means another writer got there first; the row is
    /// re-read instead of failing.
    pub async fn get_or_create(
        &self,
        combination: &FilterCombination,
    ) -> Result<StoredCombination, RepositoryError> {
        let key = NaturalKey::from_combination(combination)?;
        let now = Utc::now().to_rfc3339();

        if let Some(record) = self.find_record(&key).await? {
            let id = record.id;
            with_conn!(self.pool, conn => {
                diesel::update(filter_combinations::table.find(id))
                    .set(filter_combinations::updated_at.eq(&now))
                    .execute(&mut conn)
                    .await?
            });
            debug!("Combination found: id={}", id);
            let mut stored = StoredCombination::from(record);
            stored.updated_at = parse_datetime(&now);
            return Ok(stored);
        }

        let new_combination = key.to_insert(&now);
        let inserted = with_conn!(self.pool, conn => {
            diesel::insert_into(filter_combinations::table)
                .values(&new_combination)
                .execute(&mut conn)
                .await
        });

        match inserted {
            Ok(_) => {}
            Err(DbError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                debug!("Combination inserted by a concurrent writer, re-reading");
            }
            Err(e) => return Err(e.into()),
        }

        let record = self.find_record(&key).await?.ok_or(DbError::NotFound)?;
        debug!("New combination created: id={}", record.id);
        Ok(StoredCombination::from(record))
    }

    async fn find_record(
        &self,
        key: &NaturalKey<'_>,
    ) -> Result<Option<FilterCombinationRecord>, RepositoryError> {
        let record = with_conn!(self.pool, conn => {
            filter_combinations::table
                .filter(filter_combinations::level_value.eq(key.level.0))
                .filter(filter_combinations::inst_value.eq(key.institute.0))
                .filter(filter_combinations::faculty_value.eq(key.faculty.0))
                .filter(filter_combinations::speciality_value.eq(key.speciality.0))
                .filter(filter_combinations::typeofstudy_value.eq(key.study_form.0))
                .filter(filter_combinations::category_value.eq(key.category.0))
                .first::<FilterCombinationRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record)
    }

    /// Get a combination by ID.
    pub async fn get(&self, id: i32) -> Result<Option<StoredCombination>, RepositoryError> {
        let record = with_conn!(self.pool, conn => {
            filter_combinations::table
                .find(id)
                .first::<FilterCombinationRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(StoredCombination::from))
    }

    /// Get all combinations in insertion order.
    pub async fn get_all(&self) -> Result<Vec<StoredCombination>, RepositoryError> {
        let records = with_conn!(self.pool, conn => {
            filter_combinations::table
                .order(filter_combinations::id.asc())
                .load::<FilterCombinationRecord>(&mut conn)
                .await?
        });
        info!("Loaded {} filter combinations", records.len());
        Ok(records.into_iter().map(StoredCombination::from).collect())
    }

    /// Count stored combinations.
    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let count = with_conn!(self.pool, conn => {
            filter_combinations::table
                .count()
                .get_result::<i64>(&mut conn)
                .await?
        });
        Ok(count)
    }

    /// Delete a combination. Its statistics go with it (cascade).
    pub async fn delete(&self, id: i32) -> Result<bool, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            diesel::delete(filter_combinations::table.find(id))
                .execute(&mut conn)
                .await?
        });
        Ok(rows > 0)
    }

    /// Replace every statistics row of a combination with `rows`.
    ///
    /// Delete and inserts share one transaction: readers see either the old
    /// complete set or the new complete set.
    pub async fn replace_statistics(
        &self,
        combination_id: i32,
        rows: &[StatisticsRecord],
    ) -> Result<usize, RepositoryError> {
        let created_at = Utc::now().to_rfc3339();
        let new_rows: Vec<NewStatisticsRow> = rows
            .iter()
            .map(|row| NewStatisticsRow::new(combination_id, row, &created_at))
            .collect();

        let saved = with_conn!(self.pool, conn => {
            conn.transaction(move |conn| {
                Box::pin(async move {
                    diesel::delete(
                        statistics::table
                            .filter(statistics::filter_combination_id.eq(combination_id)),
                    )
                    .execute(conn)
                    .await?;

                    let mut count = 0usize;
                    for row in new_rows {
                        diesel::insert_into(statistics::table)
                            .values(row)
                            .execute(conn)
                            .await?;
                        count += 1;
                    }
                    Ok::<_, DbError>(count)
                })
            })
            .await?
        });

        info!("Saved {} rows for combination {}", saved, combination_id);
        Ok(saved)
    }

    /// All statistics rows of one combination.
    pub async fn statistics_for(
        &self,
        combination_id: i32,
    ) -> Result<Vec<StoredStatistics>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            statistics::table
                .filter(statistics::filter_combination_id.eq(combination_id))
                .order(statistics::id.asc())
                .load::<StatisticsRow>(&mut conn)
                .await?
        });
        Ok(rows.into_iter().map(StoredStatistics::from).collect())
    }

    /// Statistics of the first combination matching the given filter values.
    ///
    /// Unset fields match anything. No matching combination yields an empty list.
    pub async fn find_statistics(
        &self,
        query: &StatisticsQuery,
        limit: i64,
    ) -> Result<Vec<StoredStatistics>, RepositoryError> {
        let combination = with_conn!(self.pool, conn => {
            let mut q = filter_combinations::table.into_boxed();
            if let Some(v) = query.level {
                q = q.filter(filter_combinations::level_value.eq(v));
            }
            if let Some(v) = query.institute {
                q = q.filter(filter_combinations::inst_value.eq(v));
            }
            if let Some(v) = query.faculty {
                q = q.filter(filter_combinations::faculty_value.eq(v));
            }
            if let Some(v) = query.speciality {
                q = q.filter(filter_combinations::speciality_value.eq(v));
            }
            if let Some(v) = query.study_form {
                q = q.filter(filter_combinations::typeofstudy_value.eq(v));
            }
            if let Some(v) = query.category {
                q = q.filter(filter_combinations::category_value.eq(v));
            }
            q.order(filter_combinations::id.asc())
                .first::<FilterCombinationRecord>(&mut conn)
                .await
                .optional()?
        });

        let Some(combination) = combination else {
            debug!("No combination matches {:?}", query);
            return Ok(Vec::new());
        };

        let rows = with_conn!(self.pool, conn => {
            statistics::table
                .filter(statistics::filter_combination_id.eq(combination.id))
                .order(statistics::id.asc())
                .limit(limit)
                .load::<StatisticsRow>(&mut conn)
                .await?
        });
        Ok(rows.into_iter().map(StoredStatistics::from).collect())
    }

    /// Distinct education levels.
    pub async fn levels(&self) -> Result<Vec<FilterOption>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            filter_combinations::table
                .select((filter_combinations::level_value, filter_combinations::level_name))
                .distinct()
                .order(filter_combinations::level_value.asc())
                .load::<(i32, String)>(&mut conn)
                .await?
        });
        Ok(to_options(rows))
    }

    /// Distinct institutes.
    pub async fn institutes(&self) -> Result<Vec<FilterOption>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            filter_combinations::table
                .select((filter_combinations::inst_value, filter_combinations::inst_name))
                .distinct()
                .order(filter_combinations::inst_value.asc())
                .load::<(i32, String)>(&mut conn)
                .await?
        });
        Ok(to_options(rows))
    }

    /// Distinct faculties of one institute.
    pub async fn faculties(&self, institute: i32) -> Result<Vec<FilterOption>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            filter_combinations::table
                .filter(filter_combinations::inst_value.eq(institute))
                .select((filter_combinations::faculty_value, filter_combinations::faculty_name))
                .distinct()
                .order(filter_combinations::faculty_value.asc())
                .load::<(i32, String)>(&mut conn)
                .await?
        });
        Ok(to_options(rows))
    }

    /// Distinct specialities under a level, institute and faculty.
    pub async fn specialities(
        &self,
        level: i32,
        institute: i32,
        faculty: i32,
    ) -> Result<Vec<FilterOption>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            filter_combinations::table
                .filter(filter_combinations::level_value.eq(level))
                .filter(filter_combinations::inst_value.eq(institute))
                .filter(filter_combinations::faculty_value.eq(faculty))
                .select((
                    filter_combinations::speciality_value,
                    filter_combinations::speciality_name,
                ))
                .distinct()
                .order(filter_combinations::speciality_value.asc())
                .load::<(i32, String)>(&mut conn)
                .await?
        });
        Ok(to_options(rows))
    }

    /// Distinct study forms under a level, institute, faculty and speciality.
    pub async fn study_forms(
        &self,
        level: i32,
        institute: i32,
        faculty: i32,
        speciality: i32,
    ) -> Result<Vec<FilterOption>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            filter_combinations::table
                .filter(filter_combinations::level_value.eq(level))
                .filter(filter_combinations::inst_value.eq(institute))
                .filter(filter_combinations::faculty_value.eq(faculty))
                .filter(filter_combinations::speciality_value.eq(speciality))
                .select((
                    filter_combinations::typeofstudy_value,
                    filter_combinations::typeofstudy_name,
                ))
                .distinct()
                .order(filter_combinations::typeofstudy_value.asc())
                .load::<(i32, String)>(&mut conn)
                .await?
        });
        Ok(to_options(rows))
    }

    /// Distinct admission categories.
    pub async fn categories(&self) -> Result<Vec<FilterOption>, RepositoryError> {
        let rows = with_conn!(self.pool, conn => {
            filter_combinations::table
                .select((
                    filter_combinations::category_value,
                    filter_combinations::category_name,
                ))
                .distinct()
                .order(filter_combinations::category_value.asc())
                .load::<(i32, String)>(&mut conn)
                .await?
        });
        Ok(to_options(rows))
    }
}
