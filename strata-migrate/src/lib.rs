//! # strata-migrate
//!
//! Migration engine for Strata.
//!
//! This crate provides functionality for:
//! - Aggregating revision scripts shipped by many plugins into one workspace
//! - A revision graph with branches, merges, labels and dependencies
//! - Autogenerating operations by comparing declared tables with a database
//! - Upgrading, downgrading, stamping and syncing several databases at once
//! - Emitting the same work as SQL text instead of running it
//! - Moving newly written scripts back to the plugin that owns them
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ Plugins      │────▶│ Aggregator     │────▶│ Workspace    │
//! └──────────────┘     └────────────────┘     └──────────────┘
//!                                                    │
//!                                                    ▼
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ Registry     │────▶│ Autogenerate   │◀────│ Revision Map │
//! └──────────────┘     └────────────────┘     └──────────────┘
//!                              │                     │
//!                              ▼                     ▼
//!                      ┌────────────────┐     ┌──────────────┐
//!                      │ Revision File  │     │ Runner       │
//!                      └────────────────┘     └──────────────┘
//!                              │                     │
//!                              ▼                     ▼
//!                      ┌────────────────┐     ┌──────────────┐
//!                      │ Relocation     │     │ Binds (DBs)  │
//!                      └────────────────┘     └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_migrate::{MigrateConfig, MigrationSession, PluginInfo, RunOptions, create_engine};
//! use strata_schema::Registry;
//!
//! async fn migrate(registry: Registry) -> strata_migrate::MigrateResult<()> {
//!     let config = MigrateConfig::new().script_location("migrations");
//!
//!     let session = MigrationSession::builder(config)
//!         .plugins([
//!             PluginInfo::new("blog").migrations("plugins/blog/migrations"),
//!         ])
//!         .registry(registry)
//!         .engine("", create_engine("sqlite://app.db").await?)
//!         .build()
//!         .await?;
//!
//!     session.upgrade("heads", &RunOptions::default()).await?;
//!     session.close()
//! }
//! ```
//!
//! ## Revision Scripts
//!
//! A revision is a TOML file holding its place in the graph and the
//! operations for each bind:
//!
//! ```text
//! revision = "1a2b3c4d5e6f"
//! down_revision = ["0f9e8d7c6b5a"]
//! branch_labels = ["blog"]
//! message = "add posts"
//!
//! [[upgrade]]
//! bind = ""
//!
//! [[upgrade.ops]]
//! op = "create_table"
//! ...
//! ```

pub mod autogen;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ops;
pub mod plugin;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod relocate;
pub mod report;
pub mod runner;
pub mod script;
pub mod session;
pub mod sql;
pub mod sqlite;
pub mod state;
pub mod template;
pub mod version;
pub mod workspace;

// Re-exports
pub use autogen::{CompareOptions, compare_metadata};
pub use config::{ContextOptions, EnvMode, EnvSettings, MigrateConfig, VersionLocations};
pub use engine::{Connection, Engine, create_engine, obfuscate_url};
pub use error::{MigrateResult, MigrationError};
pub use graph::{DowngradeTarget, FormatOptions, RevisionMap};
pub use ops::{BindOps, DiffEntry, Operation, TableChange, UpgradeOps};
pub use plugin::{PluginInfo, PluginSet};
#[cfg(feature = "postgres")]
pub use postgres::PostgresEngine;
pub use relocate::{Relocation, relocate};
pub use report::{Reporter, TracingReporter};
pub use runner::{Bind, BindSet, OfflineScript, Runner};
pub use script::{Revision, ScriptDirectory, generate_rev_id};
pub use session::{MigrationSession, RevisionOptions, RunOptions, SessionBuilder};
pub use sql::{Dialect, PostgresDialect, SqliteDialect};
pub use sqlite::SqliteEngine;
pub use template::{Template, find_template, init, list_templates};
pub use version::VersionTable;
pub use workspace::{Aggregator, MergedWorkspace, VersionLocationMap};
