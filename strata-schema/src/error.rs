//! Error types for table metadata and registration.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building or registering table metadata.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a model file.
    #[error("failed to read model file: {path}")]
    #[diagnostic(code(strata::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A model file could not be parsed.
    #[error("invalid model file `{path}`: {message}")]
    #[diagnostic(code(strata::schema::parse_error))]
    ParseError { path: String, message: String },

    /// Invalid table definition.
    #[error("invalid table `{name}`: {message}")]
    #[diagnostic(code(strata::schema::invalid_table))]
    InvalidTable { name: String, message: String },

    /// A table was registered twice.
    #[error("table `{table}` is already bound to `{existing}`, cannot bind it to `{bind}`")]
    #[diagnostic(
        code(strata::schema::duplicate_table),
        help("every table belongs to exactly one bind")
    )]
    DuplicateTable {
        table: String,
        bind: String,
        existing: String,
    },
}

impl SchemaError {
    /// Create an invalid table error.
    pub fn invalid_table(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_table_display() {
        let err = SchemaError::DuplicateTable {
            table: "user".to_string(),
            bind: "".to_string(),
            existing: "secondary".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("user"));
        assert!(msg.contains("secondary"));
    }
}
