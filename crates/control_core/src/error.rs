use std::fmt;

use shared::{
    domain::{DocumentId, PanelId},
    error::StoreError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown panel {0}")]
    UnknownPanel(PanelId),
    #[error("panel {0} is permanent and cannot be closed")]
    CannotCloseFixedPanel(PanelId),
    #[error("document store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("invalid dose request: {0}")]
    InvalidDoseRequest(String),
    #[error("invalid nutrient profile: {0}")]
    InvalidProfile(String),
    #[error("{0}")]
    PartialDoseFailure(PartialDoseFailure),
    #[error("dose computation failed: {0}")]
    Computation(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedLine {
    pub salt_name: String,
    pub grams: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryWrite {
    Appended(DocumentId),
    /// Nothing reached the store, so there was nothing truthful to record.
    Skipped,
    Failed(String),
}

/// Some writes of a dose commit did not persist. Lines listed in `committed`
/// did, and stay committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDoseFailure {
    pub failed: Vec<FailedLine>,
    pub committed: Vec<String>,
    pub history: HistoryWrite,
}

impl PartialDoseFailure {
    pub fn failed_salts(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|line| line.salt_name.as_str())
            .collect()
    }
}

impl fmt::Display for PartialDoseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed.is_empty() {
            write!(f, "dose applied but history was not recorded")?;
        } else {
            write!(f, "dose partially applied; failed salts: ")?;
            for (index, line) in self.failed.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} ({})", line.salt_name, line.reason)?;
            }
        }
        match &self.history {
            HistoryWrite::Appended(_) => Ok(()),
            HistoryWrite::Skipped => write!(f, "; no history entry written"),
            HistoryWrite::Failed(reason) => write!(f, "; history append failed: {reason}"),
        }
    }
}
