//! # Strata
//!
//! Schema migrations for plugin-based, multi-database applications.
//!
//! Strata provides:
//! - Per-plugin revision scripts merged into one revision graph
//! - Explicit table registration with one bind per table
//! - Autogenerated revisions from declared tables
//! - Transactional upgrades across several databases, with optional
//!   two-phase commit
//! - SQL emission for every command that changes the database
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata::MigrationError> {
//!     let mut registry = Registry::new();
//!     registry.register(
//!         Some("blog"),
//!         Table::new("blog_post").column(Column::new("id", "integer").primary_key()),
//!     )?;
//!
//!     let session = MigrationSession::builder(MigrateConfig::new().script_location("migrations"))
//!         .plugins([PluginInfo::new("blog").migrations("plugins/blog/migrations")])
//!         .registry(registry)
//!         .engine("", create_engine("sqlite://app.db").await?)
//!         .build()
//!         .await?;
//!
//!     session.upgrade("heads", &RunOptions::default()).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Table metadata and the bind registry.
pub mod schema {
    pub use strata_schema::*;
}

/// The migration engine.
pub mod migrate {
    pub use strata_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        MigrateConfig, MigrationSession, PluginInfo, RevisionOptions, RunOptions, create_engine,
    };
    pub use crate::schema::{Column, Index, Registry, Table};
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError, MigrationSession};
pub use schema::{Registry, SchemaError};
