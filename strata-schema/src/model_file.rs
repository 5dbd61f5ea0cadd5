//! TOML model files.
//!
//! ```toml
//! [[tables]]
//! name = "plugin_a_user"
//! bind = "secondary"
//!
//! [[tables.columns]]
//! name = "id"
//! type = "integer"
//! primary_key = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::table::Table;

/// Tables declared by one plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFile {
    /// Declared tables.
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl ModelFile {
    /// Parse a model file from a string.
    pub fn parse(content: &str, path: &str) -> SchemaResult<Self> {
        toml::from_str(content).map_err(|e| SchemaError::ParseError {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Read and parse a model file.
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::IoError {
            path: display.clone(),
            source,
        })?;
        Self::parse(&content, &display)
    }
}
