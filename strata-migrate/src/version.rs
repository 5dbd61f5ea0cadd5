//! The per-database version table.

use strata_schema::{Column, ColumnType, Table};
use tracing::debug;

use crate::config::DEFAULT_VERSION_TABLE;
use crate::engine::Connection;
use crate::error::MigrateResult;
use crate::sql::Dialect;

/// Column holding applied head revision ids.
pub const VERSION_COLUMN: &str = "version_num";

/// Records which revisions are applied to one database.
///
/// Holds one row per applied head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    name: String,
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_TABLE)
    }
}

impl VersionTable {
    /// Create a version table handle.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table definition.
    pub fn definition(&self) -> Table {
        Table::new(&self.name).column(
            Column::new(VERSION_COLUMN, ColumnType::Varchar(Some(32))).primary_key(),
        )
    }

    /// Statement creating the table.
    pub fn create_sql(&self, dialect: &dyn Dialect) -> String {
        dialect
            .create_table(&self.definition())
            .replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 1)
    }

    /// Statements replacing the recorded heads.
    pub fn write_sql(&self, dialect: &dyn Dialect, heads: &[String]) -> Vec<String> {
        let mut stmts = vec![self.purge_sql(dialect)];
        stmts.extend(heads.iter().map(|head| {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote(&self.name),
                dialect.quote(VERSION_COLUMN),
                dialect.literal(head)
            )
        }));
        stmts
    }

    /// Statement deleting every row.
    pub fn purge_sql(&self, dialect: &dyn Dialect) -> String {
        format!("DELETE FROM {}", dialect.quote(&self.name))
    }

    /// Create the table if missing.
    pub async fn ensure(&self, conn: &mut dyn Connection, dialect: &dyn Dialect) -> MigrateResult<()> {
        conn.execute(&self.create_sql(dialect)).await
    }

    /// Applied heads. Empty when the table doesn't exist.
    pub async fn current(
        &self,
        conn: &mut dyn Connection,
        dialect: &dyn Dialect,
    ) -> MigrateResult<Vec<String>> {
        if !conn.has_table(&self.name).await? {
            return Ok(Vec::new());
        }
        let mut heads = conn
            .fetch_column(&format!(
                "SELECT {} FROM {}",
                dialect.quote(VERSION_COLUMN),
                dialect.quote(&self.name)
            ))
            .await?;
        heads.sort();
        Ok(heads)
    }

    /// Replace the recorded heads, creating the table if needed.
    pub async fn write(
        &self,
        conn: &mut dyn Connection,
        dialect: &dyn Dialect,
        heads: &[String],
    ) -> MigrateResult<()> {
        self.ensure(conn, dialect).await?;
        debug!(table = %self.name, heads = ?heads, "Writing version rows");
        for stmt in self.write_sql(dialect, heads) {
            conn.execute(&stmt).await?;
        }
        Ok(())
    }

    /// Delete every row if the table exists.
    pub async fn purge(&self, conn: &mut dyn Connection, dialect: &dyn Dialect) -> MigrateResult<()> {
        if conn.has_table(&self.name).await? {
            conn.execute(&self.purge_sql(dialect)).await?;
        }
        Ok(())
    }
}
