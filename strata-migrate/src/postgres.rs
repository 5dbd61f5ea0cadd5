//! PostgreSQL engine.

use async_trait::async_trait;
use strata_schema::{Column, ColumnType, Index, MetaData, Table};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::engine::{Connection, Engine, obfuscate_url};
use crate::error::{MigrateResult, MigrationError};
use crate::sql::{Dialect, PostgresDialect};

const COLUMNS_QUERY: &str = "\
SELECT c.table_name, c.column_name, c.data_type, c.character_maximum_length, \
       c.is_nullable = 'YES', c.column_default, \
       EXISTS ( \
           SELECT 1 FROM information_schema.table_constraints tc \
           JOIN information_schema.key_column_usage k \
             ON k.constraint_name = tc.constraint_name AND k.table_schema = tc.table_schema \
           WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = c.table_schema \
             AND tc.table_name = c.table_name AND k.column_name = c.column_name) \
FROM information_schema.columns c \
JOIN information_schema.tables t \
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE' \
ORDER BY c.table_name, c.ordinal_position";

const INDEXES_QUERY: &str = "\
SELECT t.relname, i.relname, ix.indisunique, \
       array_agg(a.attname::text ORDER BY k.n) \
FROM pg_index ix \
JOIN pg_class t ON t.oid = ix.indrelid \
JOIN pg_class i ON i.oid = ix.indexrelid \
JOIN pg_namespace ns ON ns.oid = t.relnamespace \
CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, n) \
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
WHERE ns.nspname = current_schema() AND NOT ix.indisprimary \
  AND NOT EXISTS (SELECT 1 FROM pg_constraint con WHERE con.conindid = ix.indexrelid) \
GROUP BY t.relname, i.relname, ix.indisunique \
ORDER BY t.relname, i.relname";

/// A PostgreSQL database.
#[derive(Debug)]
pub struct PostgresEngine {
    url: String,
    dialect: PostgresDialect,
}

impl PostgresEngine {
    /// Create an engine. No connection is made until [`Engine::connect`].
    pub fn new(url: &str) -> MigrateResult<Self> {
        url.parse::<tokio_postgres::Config>()
            .map_err(|e| MigrationError::config(format!("invalid PostgreSQL URL: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            dialect: PostgresDialect,
        })
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn display_url(&self) -> String {
        obfuscate_url(&self.url)
    }

    async fn connect(&self) -> MigrateResult<Box<dyn Connection>> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });
        Ok(Box::new(PostgresConnection {
            client,
            in_transaction: false,
            prepared: None,
        }))
    }
}

/// A connection to a [`PostgresEngine`].
pub struct PostgresConnection {
    client: Client,
    in_transaction: bool,
    prepared: Option<String>,
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn begin(&mut self) -> MigrateResult<()> {
        self.execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql = %sql, "Executing statement");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn fetch_column(&mut self, sql: &str) -> MigrateResult<Vec<String>> {
        debug!(sql = %sql, "Executing query");
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
                _ => None,
            })
            .collect())
    }

    async fn reflect(&mut self) -> MigrateResult<MetaData> {
        let mut metadata = MetaData::new();

        for row in self.client.query(COLUMNS_QUERY, &[]).await? {
            let table_name: String = row.get(0);
            let data_type: String = row.get(2);
            let length: Option<i32> = row.get(3);
            let raw_type = match length {
                Some(length) => format!("{}({})", data_type, length),
                None => data_type,
            };
            let column = Column {
                name: row.get(1),
                column_type: ColumnType::from_sql(&raw_type),
                nullable: row.get(4),
                primary_key: row.get(6),
                default: row.get(5),
            };
            if !metadata.contains(&table_name) {
                metadata.add_table(Table::new(&table_name));
            }
            if let Some(table) = metadata.table_mut(&table_name) {
                table.columns.push(column);
            }
        }

        for row in self.client.query(INDEXES_QUERY, &[]).await? {
            let table_name: String = row.get(0);
            if let Some(table) = metadata.table_mut(&table_name) {
                table.indexes.push(Index {
                    name: row.get(1),
                    unique: row.get(2),
                    columns: row.get(3),
                });
            }
        }

        debug!(tables = metadata.len(), "Reflected PostgreSQL schema");
        Ok(metadata)
    }

    async fn has_table(&mut self, name: &str) -> MigrateResult<bool> {
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[&name],
            )
            .await?;
        Ok(row.is_some())
    }

    fn supports_two_phase(&self) -> bool {
        true
    }

    async fn prepare(&mut self, xid: &str) -> MigrateResult<()> {
        self.execute(&format!("PREPARE TRANSACTION {}", literal(xid)))
            .await?;
        self.in_transaction = false;
        self.prepared = Some(xid.to_string());
        Ok(())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        if let Some(xid) = self.prepared.take() {
            self.execute(&format!("COMMIT PREPARED {}", literal(&xid)))
                .await?;
        } else if self.in_transaction {
            self.execute("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        if let Some(xid) = self.prepared.take() {
            self.execute(&format!("ROLLBACK PREPARED {}", literal(&xid)))
                .await?;
        } else if self.in_transaction {
            self.in_transaction = false;
            self.execute("ROLLBACK").await?;
        }
        Ok(())
    }
}
