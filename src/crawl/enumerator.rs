//! Depth-first enumeration of the filter dependency tree.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::{AppliedFilters, FilterCombination, FilterField, FilterOption};
use crate::scrapers::{extract_filter_options, PageFetcher};

type Path = Vec<(FilterField, FilterOption)>;

/// Walks every valid combination of filter options.
///
/// Dependent levels are read one at a time from pages filtered by the path
/// so far. Independent levels are read once from the unfiltered page and
/// crossed with every complete dependent path.
#[derive(Clone)]
pub struct CombinationEnumerator {
    fetcher: Arc<dyn PageFetcher>,
    dependent: Vec<FilterField>,
    independent: Vec<FilterField>,
}

impl CombinationEnumerator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        dependent: Vec<FilterField>,
        independent: Vec<FilterField>,
    ) -> Self {
        Self {
            fetcher,
            dependent,
            independent,
        }
    }

    /// The upstream tree: five dependent levels with the admission category
    /// crossed at the leaves.
    pub fn standard(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::new(
            fetcher,
            vec![
                FilterField::Level,
                FilterField::Institute,
                FilterField::Faculty,
                FilterField::Speciality,
                FilterField::StudyForm,
            ],
            vec![FilterField::Category],
        )
    }

    /// Enumerate all combinations in depth-first order.
    ///
    /// A node whose page offers no options for the next level ends its
    /// branch. Failed fetches come back as empty pages and prune the same way.
    pub async fn discover(&self) -> Vec<FilterCombination> {
        info!("Discovering filter combinations");

        let root = self.fetcher.fetch_page(&AppliedFilters::new()).await;

        let mut crossings: Vec<Path> = vec![Vec::new()];
        for field in &self.independent {
            let options = extract_filter_options(&root, *field);
            debug!("{} {} options on the root page", options.len(), field);
            if options.is_empty() {
                warn!("No {} options on the root page, nothing to enumerate", field);
                return Vec::new();
            }
            crossings = crossings
                .into_iter()
                .flat_map(|prefix| {
                    options.iter().map(move |option| {
                        let mut path = prefix.clone();
                        path.push((*field, option.clone()));
                        path
                    })
                })
                .collect();
        }

        let mut combinations = Vec::new();
        let mut stack: Vec<Path> = vec![Vec::new()];

        while let Some(path) = stack.pop() {
            let Some(&field) = self.dependent.get(path.len()) else {
                for crossing in &crossings {
                    let mut selections = path.clone();
                    selections.extend(crossing.iter().cloned());
                    combinations.push(FilterCombination::new(selections));
                }
                continue;
            };

            let mut applied = AppliedFilters::new();
            for (f, option) in &path {
                applied.insert(*f, option.value.clone());
            }

            let options = if path.is_empty() {
                extract_filter_options(&root, field)
            } else {
                let html = self.fetcher.fetch_page(&applied).await;
                extract_filter_options(&html, field)
            };
            debug!("{} {} options under {}", options.len(), field, applied);

            // Reverse so the first option is expanded first
            for option in options.into_iter().rev() {
                let mut child = path.clone();
                child.push((field, option));
                stack.push(child);
            }
        }

        info!("Discovered {} filter combinations", combinations.len());
        combinations
    }
}
