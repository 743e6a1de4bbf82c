//! Option list extraction from filter page HTML.

use std::collections::HashSet;

use scraper::{Html, Selector};

use crate::models::{FilterField, FilterOption};

/// Options offered by the `<select>` of `field` on a fetched page.
///
/// Looks for `select[name=p_<field>]` first and falls back to the bare field
/// name. Options with an empty value or label are skipped; duplicates (by
/// value) keep their first occurrence. An empty or unparseable page yields
/// no options.
pub fn extract_filter_options(html: &str, field: FilterField) -> Vec<FilterOption> {
    if html.trim().is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(html);

    for name in [field.param(), field.as_str()] {
        let selector = match Selector::parse(&format!("select[name=\"{}\"] option", name)) {
            Ok(s) => s,
            Err(_) => continue,
        };

        let options = clean_options(document.select(&selector).filter_map(|option| {
            let value = option.value().attr("value")?;
            Some(FilterOption::new(value, option.text().collect::<String>()))
        }));

        if !options.is_empty() {
            return options;
        }
    }

    Vec::new()
}

/// Trim options, drop those with a blank value or label, and keep the first
/// occurrence of each value.
pub fn clean_options(raw: impl IntoIterator<Item = FilterOption>) -> Vec<FilterOption> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|option| {
            let value = option.value.trim().to_string();
            let label = option.label.split_whitespace().collect::<Vec<_>>().join(" ");
            if value.is_empty() || label.is_empty() || !seen.insert(value.clone()) {
                return None;
            }
            Some(FilterOption::new(value, label))
        })
        .collect()
}
