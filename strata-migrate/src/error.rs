//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Declared table metadata is invalid.
    #[error("Schema error: {0}")]
    Schema(#[from] strata_schema::SchemaError),

    /// A revision script could not be read or written.
    #[error("Invalid revision script {path}: {message}")]
    Script {
        /// Script path.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid arguments for a command.
    #[error("{0}")]
    Usage(String),

    /// A revision spec that matches nothing, or more than one revision.
    #[error("Can't locate revision identified by '{0}'")]
    BadReference(String),

    /// `head` was requested while the graph has several heads.
    #[error("Multiple heads are present for given argument '{spec}'; please specify a specific target revision, '<branchname>@{spec}' to narrow to a specific head, or 'heads' for all heads ({})", .heads.join(", "))]
    AmbiguousHead {
        /// The spec that was requested.
        spec: String,
        /// The competing heads.
        heads: Vec<String>,
    },

    /// The database is not at the latest revision.
    #[error("Target database is not up to date (current: {}, heads: {})", display_ids(.current), display_ids(.heads))]
    OutOfDate {
        /// Recorded revisions.
        current: Vec<String>,
        /// Heads of the revision graph.
        heads: Vec<String>,
    },

    /// Declared models differ from the database.
    #[error("New upgrade operations detected: {}", .diffs.join("; "))]
    DriftDetected {
        /// One line per difference.
        diffs: Vec<String>,
    },

    /// A `start:end` range outside SQL emission mode.
    #[error("Range revision '{0}' is only allowed in SQL mode")]
    InvalidRange(String),

    /// A command needed a current revision and there is none.
    #[error("No current revision")]
    EmptyTarget,

    /// Two scripts declare the same revision id.
    #[error("Revision {id} is present more than once ({first} and {second})")]
    DuplicateRevision {
        /// The repeated id.
        id: String,
        /// First script.
        first: String,
        /// Second script.
        second: String,
    },

    /// The revision graph contains a cycle.
    #[error("Cycle detected in revision graph involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

pub(crate) fn display_ids(ids: &[String]) -> String {
    if ids.is_empty() {
        "<base>".to_string()
    } else {
        ids.join(", ")
    }
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a script error.
    pub fn script(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Script {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a bad reference error.
    pub fn bad_reference(spec: impl Into<String>) -> Self {
        Self::BadReference(spec.into())
    }

    /// Whether the startup check can offer an automatic fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfDate { .. } | Self::DriftDetected { .. })
    }
}

impl From<tokio_rusqlite::Error> for MigrationError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for MigrationError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_display() {
        let err = MigrationError::OutOfDate {
            current: vec!["r5".to_string()],
            heads: vec!["r7".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("r5"));
        assert!(msg.contains("r7"));
    }

    #[test]
    fn test_out_of_date_display_base() {
        let err = MigrationError::OutOfDate {
            current: vec![],
            heads: vec!["abc".to_string()],
        };
        assert!(err.to_string().contains("<base>"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::DriftDetected { diffs: vec![] }.is_recoverable());
        assert!(!MigrationError::EmptyTarget.is_recoverable());
        assert!(!MigrationError::Database("connection".to_string()).is_recoverable());
    }
}
