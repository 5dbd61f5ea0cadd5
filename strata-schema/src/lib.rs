//! # strata-schema
//!
//! Declarative table metadata for Strata.
//!
//! This crate provides:
//! - Table, column and index definitions with SQL type affinity
//! - Ordered per-bind table collections ([`MetaData`])
//! - An explicit [`Registry`] that maps every table to exactly one bind
//! - TOML model files for plugins that declare tables as data
//!
//! ## Example
//!
//! ```rust
//! use strata_schema::{Column, Registry, Table};
//!
//! let mut registry = Registry::with_binds(["analytics"]);
//! let bind = registry
//!     .register(
//!         Some("analytics"),
//!         Table::new("analytics_event").column(Column::new("id", "integer").primary_key()),
//!     )
//!     .unwrap();
//! assert_eq!(bind, "analytics");
//! ```

pub mod error;
pub mod metadata;
pub mod model_file;
pub mod registry;
pub mod table;

pub use error::{SchemaError, SchemaResult};
pub use metadata::MetaData;
pub use model_file::ModelFile;
pub use registry::{DEFAULT_BIND, Registry};
pub use table::{Affinity, Column, ColumnType, Index, Table};
