use std::fmt;

use crate::source::SourceKey;

/// A required reference that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingChild {
    pub source: SourceKey,
    /// Required fields of a field-set reference; empty for whole-object.
    pub fields: Vec<String>,
}

impl fmt::Display for MissingChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            write!(f, "{}", self.source)
        } else {
            write!(f, "{}[{}]", self.source, self.fields.join(","))
        }
    }
}

/// Every required reference that failed in one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MissingChildren(pub Vec<MissingChild>);

impl MissingChildren {
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|c| c.to_string()).collect()
    }
}

impl fmt::Display for MissingChildren {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Expected while dependencies are still being created.
    #[error("missing required children: {0}")]
    MissingChildren(MissingChildren),

    /// The store could not be reached or refused for a reason other than
    /// absence. Surfaced for retry with backoff.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("conflict persisting {0}")]
    PersistConflict(String),

    #[error("legacy migration incomplete: {failed} of {total} sources not cleaned")]
    MigrationPartialFailure { failed: usize, total: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Conditions that resolve on their own and must not hot-loop the
    /// controller's error policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MissingChildren(_)
                | Error::PersistConflict(_)
                | Error::MigrationPartialFailure { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
