//! Filter axes, options and combinations.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the six cascading filter axes, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    /// Education level (bachelor, master, ...).
    Level,
    /// Institution.
    Institute,
    /// Faculty within the institution.
    Faculty,
    /// Speciality (programme).
    Speciality,
    /// Study form (full-time, part-time, ...).
    StudyForm,
    /// Admission category. Independent of the other axes.
    Category,
}

impl FilterField {
    /// All fields in dependency order.
    pub const ALL: [FilterField; 6] = [
        FilterField::Level,
        FilterField::Institute,
        FilterField::Faculty,
        FilterField::Speciality,
        FilterField::StudyForm,
        FilterField::Category,
    ];

    /// Short key used upstream and in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::Level => "level",
            FilterField::Institute => "inst",
            FilterField::Faculty => "faculty",
            FilterField::Speciality => "speciality",
            FilterField::StudyForm => "typeofstudy",
            FilterField::Category => "category",
        }
    }

    /// Query parameter (and `<select name>`) on the upstream page.
    pub fn param(&self) -> &'static str {
        match self {
            FilterField::Level => "p_level",
            FilterField::Institute => "p_inst",
            FilterField::Faculty => "p_faculty",
            FilterField::Speciality => "p_speciality",
            FilterField::StudyForm => "p_typeofstudy",
            FilterField::Category => "p_category",
        }
    }

    /// Parse from a short key, a parameter name, or a common alias.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase();
        let key = key.strip_prefix("p_").unwrap_or(&key);
        match key {
            "level" => Some(FilterField::Level),
            "inst" | "institute" => Some(FilterField::Institute),
            "faculty" => Some(FilterField::Faculty),
            "speciality" | "specialty" => Some(FilterField::Speciality),
            "typeofstudy" | "study_form" | "study-form" => Some(FilterField::StudyForm),
            "category" => Some(FilterField::Category),
            _ => None,
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An option offered by one filter on a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterOption {
    pub value: String,
    pub label: String,
}

impl FilterOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Filters applied so far, keyed by field in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedFilters {
    values: BTreeMap<FilterField, String>,
}

impl AppliedFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `field` set to `value`.
    pub fn with(mut self, field: FilterField, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: FilterField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn get(&self, field: FilterField) -> Option<&str> {
        self.values.get(&field).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Query parameters for the upstream page, in dependency order.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        self.values
            .iter()
            .map(|(field, value)| (field.param(), value.clone()))
            .collect()
    }
}

impl fmt::Display for AppliedFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// A leaf of the filter dependency tree: one selected option per level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCombination {
    selections: Vec<(FilterField, FilterOption)>,
}

impl FilterCombination {
    pub fn new(selections: Vec<(FilterField, FilterOption)>) -> Self {
        Self { selections }
    }

    pub fn selections(&self) -> &[(FilterField, FilterOption)] {
        &self.selections
    }

    pub fn get(&self, field: FilterField) -> Option<&FilterOption> {
        self.selections
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, option)| option)
    }

    /// Values as applied filters (labels dropped).
    pub fn applied(&self) -> AppliedFilters {
        let mut applied = AppliedFilters::new();
        for (field, option) in &self.selections {
            applied.insert(*field, option.value.clone());
        }
        applied
    }
}

/// A persisted combination with its natural key and labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCombination {
    pub id: i32,
    pub level: (i32, String),
    pub institute: (i32, String),
    pub faculty: (i32, String),
    pub speciality: (i32, String),
    pub study_form: (i32, String),
    pub category: (i32, String),
    pub updated_at: DateTime<Utc>,
}

impl StoredCombination {
    /// Natural key as request parameters for the stateless fetch path.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        self.applied().to_params()
    }

    pub fn applied(&self) -> AppliedFilters {
        AppliedFilters::new()
            .with(FilterField::Level, self.level.0.to_string())
            .with(FilterField::Institute, self.institute.0.to_string())
            .with(FilterField::Faculty, self.faculty.0.to_string())
            .with(FilterField::Speciality, self.speciality.0.to_string())
            .with(FilterField::StudyForm, self.study_form.0.to_string())
            .with(FilterField::Category, self.category.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_parses_keys_params_and_aliases() {
        assert_eq!(FilterField::from_str("inst"), Some(FilterField::Institute));
        assert_eq!(FilterField::from_str("p_typeofstudy"), Some(FilterField::StudyForm));
        assert_eq!(FilterField::from_str("Study_Form"), Some(FilterField::StudyForm));
        assert_eq!(FilterField::from_str("semester"), None);
        for field in FilterField::ALL {
            assert_eq!(FilterField::from_str(field.param()), Some(field));
        }
    }

    #[test]
    fn applied_filters_are_ordered_by_dependency() {
        let applied = AppliedFilters::new()
            .with(FilterField::Faculty, "5")
            .with(FilterField::Level, "1")
            .with(FilterField::Institute, "0");

        assert_eq!(
            applied.to_params(),
            vec![
                ("p_level", "1".to_string()),
                ("p_inst", "0".to_string()),
                ("p_faculty", "5".to_string()),
            ]
        );
        assert_eq!(applied.to_string(), "{level=1, inst=0, faculty=5}");
    }

    #[test]
    fn stored_combination_round_trips_to_params() {
        let combo = StoredCombination {
            id: 7,
            level: (1, "Bachelor".into()),
            institute: (0, "Main".into()),
            faculty: (5, "CS".into()),
            speciality: (166, "Applied Math".into()),
            study_form: (1, "Full-time".into()),
            category: (0, "Budget".into()),
            updated_at: Utc::now(),
        };

        let params = combo.to_params();
        assert_eq!(params.len(), 6);
        assert_eq!(params[3], ("p_speciality", "166".to_string()));
        assert_eq!(params[5], ("p_category", "0".to_string()));
    }
}
