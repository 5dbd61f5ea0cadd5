//! CLI error types and result alias.

use miette::Diagnostic;
use strata_migrate::MigrationError;
use strata_schema::SchemaError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(strata::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(strata::config))]
    Config(String),

    /// Model file error
    #[error("Schema error: {0}")]
    #[diagnostic(code(strata::schema))]
    Schema(#[from] SchemaError),

    /// The database is behind the revision scripts
    #[error("{0}")]
    #[diagnostic(code(strata::out_of_date), help("run `strata upgrade` first"))]
    OutOfDate(String),

    /// The database differs from the declared tables
    #[error("New upgrade operations detected")]
    #[diagnostic(
        code(strata::drift),
        help("run `strata revision` to generate a revision for these changes")
    )]
    Drift {
        /// One line per difference.
        diffs: Vec<String>,
    },

    /// Migration error
    #[error("{0}")]
    #[diagnostic(code(strata::migration))]
    Migration(MigrationError),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(strata::command))]
    Command(String),
}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::DriftDetected { diffs } => CliError::Drift { diffs },
            err @ MigrationError::OutOfDate { .. } => CliError::OutOfDate(err.to_string()),
            MigrationError::Io(err) => CliError::Io(err),
            MigrationError::Config(msg) => CliError::Config(msg),
            other => CliError::Migration(other),
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}
