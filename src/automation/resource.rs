//! Interactive automation sessions and their failure model.

use thiserror::Error;

use crate::models::{AppliedFilters, FilterField, FilterOption};

/// Failure inside an automation session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutomationError {
    #[error("Browser connection lost: {0}")]
    ConnectionLost(String),
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Automation failed: {0}")]
    Other(String),
}

/// What a user is told about a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConnectionLost,
    ElementNotFound,
    Generic,
}

impl FailureKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::ConnectionLost => {
                "Lost connection to the statistics site. Please start the selection again."
            }
            FailureKind::ElementNotFound => {
                "That option is no longer offered on the site. Please pick another one."
            }
            FailureKind::Generic => "Something went wrong while applying the filter. Please try again.",
        }
    }
}

impl AutomationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AutomationError::ConnectionLost(_) => FailureKind::ConnectionLost,
            AutomationError::ElementNotFound(_) => FailureKind::ElementNotFound,
            AutomationError::Timeout(_) | AutomationError::Other(_) => FailureKind::Generic,
        }
    }
}

/// One stateful browser-style session on the filter page.
///
/// Methods block; callers run them on the [`BlockingExecutor`](super::BlockingExecutor).
pub trait AutomationResource: Send {
    /// Open the unfiltered page, discarding any session state.
    fn load_base(&mut self) -> Result<(), AutomationError>;

    /// Options currently offered for `field`.
    fn options(&mut self, field: FilterField) -> Result<Vec<FilterOption>, AutomationError>;

    /// Commit `field=value` on top of `applied`.
    ///
    /// On success the session reflects `applied` plus the new selection.
    fn select(
        &mut self,
        field: FilterField,
        value: &str,
        applied: &AppliedFilters,
    ) -> Result<(), AutomationError>;

    /// HTML of the current page.
    fn page_html(&mut self) -> Result<String, AutomationError>;

    fn close(&mut self);
}

/// Creates sessions for the pool, at start-up and as replacements.
pub trait ResourceFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AutomationResource>, AutomationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            AutomationError::ConnectionLost("reset".into()).kind(),
            FailureKind::ConnectionLost
        );
        assert_eq!(
            AutomationError::ElementNotFound("p_inst=9".into()).kind(),
            FailureKind::ElementNotFound
        );
        assert_eq!(
            AutomationError::Timeout("p_level".into()).kind(),
            FailureKind::Generic
        );
        assert!(!FailureKind::Generic.user_message().is_empty());
    }
}
