//! SQLite engine.

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use strata_schema::{Column, ColumnType, Index, MetaData, Table};
use tokio_rusqlite::Connection as RawConnection;
use tracing::debug;

use crate::engine::{Connection, Engine};
use crate::error::MigrateResult;
use crate::sql::{Dialect, SqliteDialect};

/// A SQLite database.
///
/// All connections share one underlying handle, so an in-memory database
/// keeps its contents between connections.
pub struct SqliteEngine {
    url: String,
    conn: RawConnection,
    dialect: SqliteDialect,
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl SqliteEngine {
    /// Open a database file, creating it if needed.
    pub async fn open(path: &str) -> MigrateResult<Self> {
        let conn = RawConnection::open(path).await?;
        Ok(Self {
            url: format!("sqlite://{}", path),
            conn,
            dialect: SqliteDialect,
        })
    }

    /// Open a private in-memory database.
    pub async fn memory() -> MigrateResult<Self> {
        let conn = RawConnection::open_in_memory().await?;
        Ok(Self {
            url: "sqlite::memory:".to_string(),
            conn,
            dialect: SqliteDialect,
        })
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn display_url(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> MigrateResult<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection {
            conn: self.conn.clone(),
            in_transaction: false,
        }))
    }
}

/// A connection to a [`SqliteEngine`].
pub struct SqliteConnection {
    conn: RawConnection,
    in_transaction: bool,
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn reflect_table(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<Table> {
    let mut table = Table::new(name);

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(name)))?;
    let columns = stmt.query_map([], |row| {
        let name: String = row.get(1)?;
        let raw_type: String = row.get(2)?;
        let not_null: bool = row.get(3)?;
        let default: Option<String> = row.get(4)?;
        let pk: i64 = row.get(5)?;
        Ok(Column {
            name,
            column_type: ColumnType::from_sql(&raw_type),
            nullable: !not_null && pk == 0,
            primary_key: pk > 0,
            default,
        })
    })?;
    for column in columns {
        table.columns.push(column?);
    }

    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote(name)))?;
    let indexes: Vec<(String, bool)> = stmt
        .query_map([], |row| {
            let index: String = row.get(1)?;
            let unique: bool = row.get(2)?;
            let origin: String = row.get(3)?;
            Ok((index, unique, origin))
        })?
        .filter_map(|row| match row {
            Ok((index, unique, origin)) if origin == "c" => Some(Ok((index, unique))),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<rusqlite::Result<_>>()?;

    for (index_name, unique) in indexes {
        let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quote(&index_name)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        table.indexes.push(Index {
            name: index_name,
            columns,
            unique,
        });
    }

    Ok(table)
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn begin(&mut self) -> MigrateResult<()> {
        self.execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing statement");
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn fetch_column(&mut self, sql: &str) -> MigrateResult<Vec<String>> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing query");
        let values = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(values)
    }

    async fn reflect(&mut self) -> MigrateResult<MetaData> {
        let metadata = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut metadata = MetaData::new();
                for name in names {
                    metadata.add_table(reflect_table(conn, &name)?);
                }
                Ok(metadata)
            })
            .await?;
        debug!(tables = metadata.len(), "Reflected SQLite schema");
        Ok(metadata)
    }

    async fn has_table(&mut self, name: &str) -> MigrateResult<bool> {
        let name = name.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                        [&name],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(found)
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        if self.in_transaction {
            self.execute("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.execute("ROLLBACK").await?;
        }
        Ok(())
    }
}
