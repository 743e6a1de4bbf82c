//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.

use diesel::prelude::*;

use crate::schema;

/// Filter combination record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::filter_combinations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FilterCombinationRecord {
    pub id: i32,
    pub level_value: i32,
    pub level_name: String,
    pub inst_value: i32,
    pub inst_name: String,
    pub faculty_value: i32,
    pub faculty_name: String,
    pub speciality_value: i32,
    pub speciality_name: String,
    pub typeofstudy_value: i32,
    pub typeofstudy_name: String,
    pub category_value: i32,
    pub category_name: String,
    pub updated_at: String,
}

/// New filter combination for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::filter_combinations)]
pub struct NewFilterCombination<'a> {
    pub level_value: i32,
    pub level_name: &'a str,
    pub inst_value: i32,
    pub inst_name: &'a str,
    pub faculty_value: i32,
    pub faculty_name: &'a str,
    pub speciality_value: i32,
    pub speciality_name: &'a str,
    pub typeofstudy_value: i32,
    pub typeofstudy_name: &'a str,
    pub category_value: i32,
    pub category_name: &'a str,
    pub updated_at: &'a str,
}

/// Statistics record from the database.
#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = schema::statistics)]
#[diesel(belongs_to(FilterCombinationRecord, foreign_key = filter_combination_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StatisticsRow {
    pub id: i32,
    pub filter_combination_id: i32,
    pub admission_category: Option<String>,
    pub available_places: Option<i32>,
    pub epgu_id: Option<String>,
    pub applicant_id: Option<String>,
    pub score: Option<i32>,
    pub agreement: Option<String>,
    pub status: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

/// New statistics row for insertion. `None` is written as NULL.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::statistics)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewStatisticsRow {
    pub filter_combination_id: i32,
    pub admission_category: Option<String>,
    pub available_places: Option<i32>,
    pub epgu_id: Option<String>,
    pub applicant_id: Option<String>,
    pub score: Option<i32>,
    pub agreement: Option<String>,
    pub status: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}
