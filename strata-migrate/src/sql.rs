//! SQL generation for migration operations.

use strata_schema::{Column, ColumnType, Index, Table};

use crate::error::{MigrateResult, MigrationError};
use crate::ops::{Operation, TableChange};
use crate::state::apply_changes;

/// Prefix of the scratch table used by batch rebuilds.
pub const BATCH_TEMP_PREFIX: &str = "_strata_tmp_";

/// Options that change how operations are rendered.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Rebuild tables for ALTERs the database can't do natively.
    pub render_as_batch: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            render_as_batch: true,
        }
    }
}

/// Per-database DDL rendering.
pub trait Dialect: Send + Sync {
    /// Dialect name, e.g. `"sqlite"`.
    fn name(&self) -> &'static str;

    /// Whether `ALTER TABLE` can drop and alter columns in place.
    fn supports_alter(&self) -> bool;

    /// Whether the database has `PREPARE TRANSACTION`.
    fn supports_two_phase(&self) -> bool {
        false
    }

    /// SQL spelling of a column type.
    fn column_type(&self, ty: &ColumnType) -> String {
        ty.to_string()
    }

    /// Quote an identifier.
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a string literal.
    fn literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Column definition inside CREATE TABLE / ADD COLUMN.
    fn column_definition(&self, column: &Column) -> String {
        let mut parts = vec![self.quote(&column.name), self.column_type(&column.column_type)];
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.join(" ")
    }

    /// CREATE TABLE without its indexes.
    fn create_table(&self, table: &Table) -> String {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();

        let pk = table.primary_key();
        if !pk.is_empty() {
            let cols: Vec<String> = pk.iter().map(|c| self.quote(c)).collect();
            lines.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote(&table.name),
            lines.join(",\n    ")
        )
    }

    /// DROP TABLE.
    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote(name))
    }

    /// DROP TABLE that also removes dependent objects.
    fn drop_table_cascade(&self, name: &str) -> String {
        self.drop_table(name)
    }

    /// ALTER TABLE ... RENAME TO.
    fn rename_table(&self, from: &str, to: &str) -> String {
        format!("ALTER TABLE {} RENAME TO {}", self.quote(from), self.quote(to))
    }

    /// CREATE [UNIQUE] INDEX.
    fn create_index(&self, table: &str, index: &Index) -> String {
        let cols: Vec<String> = index.columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.quote(table),
            cols.join(", ")
        )
    }

    /// DROP INDEX.
    fn drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX {}", self.quote(name))
    }

    /// ALTER TABLE ... ADD COLUMN.
    fn add_column(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition(column)
        )
    }

    /// ALTER TABLE ... DROP COLUMN.
    fn drop_column(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(name)
        )
    }

    /// ALTER TABLE ... RENAME COLUMN.
    fn rename_column(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote(table),
            self.quote(from),
            self.quote(to)
        )
    }

    /// In-place column alteration. Only called when [`supports_alter`](Self::supports_alter).
    fn alter_column(&self, table: &str, from: &Column, to: &Column) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote(table),
            self.quote(&to.name)
        );
        let mut stmts = Vec::new();
        if from.column_type != to.column_type {
            stmts.push(format!("{} TYPE {}", prefix, self.column_type(&to.column_type)));
        }
        if from.nullable != to.nullable {
            if to.nullable {
                stmts.push(format!("{} DROP NOT NULL", prefix));
            } else {
                stmts.push(format!("{} SET NOT NULL", prefix));
            }
        }
        if from.default != to.default {
            match &to.default {
                Some(default) => stmts.push(format!("{} SET DEFAULT {}", prefix, default)),
                None => stmts.push(format!("{} DROP DEFAULT", prefix)),
            }
        }
        stmts
    }
}

/// SQLite: no in-place column changes, so most ALTERs need a batch rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_alter(&self) -> bool {
        false
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn supports_alter(&self) -> bool {
        true
    }

    fn supports_two_phase(&self) -> bool {
        true
    }

    fn column_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Blob => "BYTEA".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::Float => "REAL".to_string(),
            other => other.to_string(),
        }
    }

    fn drop_table_cascade(&self, name: &str) -> String {
        format!("DROP TABLE {} CASCADE", self.quote(name))
    }
}

/// Render one operation to statements.
///
/// `current` is the definition of the altered table before the operation;
/// it is only consulted for batch rebuilds.
pub fn render_operation(
    dialect: &dyn Dialect,
    op: &Operation,
    current: Option<&Table>,
    options: RenderOptions,
) -> MigrateResult<Vec<String>> {
    match op {
        Operation::CreateTable { table } => {
            let mut stmts = vec![dialect.create_table(table)];
            stmts.extend(
                table
                    .indexes
                    .iter()
                    .map(|index| dialect.create_index(&table.name, index)),
            );
            Ok(stmts)
        }
        Operation::DropTable { name, .. } => Ok(vec![dialect.drop_table(name)]),
        Operation::AlterTable { table, changes } => {
            if dialect.supports_alter() || changes.iter().all(TableChange::is_simple) {
                return Ok(render_changes_in_place(dialect, table, changes));
            }
            if !options.render_as_batch {
                return Err(MigrationError::usage(format!(
                    "{} can't alter table '{}' in place; enable render_as_batch",
                    dialect.name(),
                    table
                )));
            }
            let current = current.ok_or_else(|| {
                MigrationError::usage(format!(
                    "batch rebuild of '{}' needs its current definition",
                    table
                ))
            })?;
            render_batch(dialect, current, changes)
        }
        Operation::Execute { sql } => Ok(vec![sql.clone()]),
    }
}

fn render_changes_in_place(dialect: &dyn Dialect, table: &str, changes: &[TableChange]) -> Vec<String> {
    let mut stmts = Vec::new();
    for change in changes {
        match change {
            TableChange::AddColumn { column } => stmts.push(dialect.add_column(table, column)),
            TableChange::DropColumn { name, .. } => stmts.push(dialect.drop_column(table, name)),
            TableChange::AlterColumn { from, to } => {
                stmts.extend(dialect.alter_column(table, from, to))
            }
            TableChange::RenameColumn { from, to } => {
                stmts.push(dialect.rename_column(table, from, to))
            }
            TableChange::AddIndex { index } => stmts.push(dialect.create_index(table, index)),
            TableChange::DropIndex { name, .. } => stmts.push(dialect.drop_index(table, name)),
        }
    }
    stmts
}

/// Rebuild `current` with `changes` applied: create a scratch table with the
/// new shape, copy surviving columns, swap it in, recreate indexes.
fn render_batch(
    dialect: &dyn Dialect,
    current: &Table,
    changes: &[TableChange],
) -> MigrateResult<Vec<String>> {
    let target = apply_changes(current, changes)?;

    // new column name -> old column name
    let mut sources: Vec<(String, String)> = current
        .columns
        .iter()
        .map(|c| (c.name.clone(), c.name.clone()))
        .collect();
    for change in changes {
        match change {
            TableChange::RenameColumn { from, to } => {
                for (new, _) in sources.iter_mut() {
                    if *new == *from {
                        *new = to.clone();
                    }
                }
            }
            TableChange::DropColumn { name, .. } => sources.retain(|(new, _)| new != name),
            TableChange::AddColumn { column } => sources.retain(|(new, _)| *new != column.name),
            _ => {}
        }
    }
    sources.retain(|(new, _)| target.get_column(new).is_some());

    let temp_name = format!("{}{}", BATCH_TEMP_PREFIX, current.name);
    let mut scratch = target.clone();
    scratch.name = temp_name.clone();

    let mut stmts = Vec::new();
    for index in &current.indexes {
        stmts.push(dialect.drop_index(&current.name, &index.name));
    }
    stmts.push(dialect.create_table(&scratch));
    if !sources.is_empty() {
        let new_cols: Vec<String> = sources.iter().map(|(new, _)| dialect.quote(new)).collect();
        let old_cols: Vec<String> = sources.iter().map(|(_, old)| dialect.quote(old)).collect();
        stmts.push(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            dialect.quote(&temp_name),
            new_cols.join(", "),
            old_cols.join(", "),
            dialect.quote(&current.name)
        ));
    }
    stmts.push(dialect.drop_table(&current.name));
    stmts.push(dialect.rename_table(&temp_name, &current.name));
    for index in &target.indexes {
        stmts.push(dialect.create_index(&target.name, index));
    }
    Ok(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_table() -> Table {
        Table::new("user")
            .column(Column::new("id", "integer").primary_key())
            .column(Column::new("name", "varchar(32)"))
            .index(Index::new("ix_user_name", vec!["name".to_string()]))
    }

    #[test]
    fn test_create_table() {
        let stmts = render_operation(
            &SqliteDialect,
            &Operation::CreateTable {
                table: user_table(),
            },
            None,
            RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE TABLE \"user\""));
        assert!(stmts[0].contains("\"id\" INTEGER NOT NULL"));
        assert!(stmts[0].contains("PRIMARY KEY (\"id\")"));
        assert!(stmts[1].contains("CREATE INDEX \"ix_user_name\" ON \"user\""));
    }

    #[test]
    fn test_sqlite_simple_add_column_is_native() {
        let op = Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![TableChange::AddColumn {
                column: Column::new("email", "text"),
            }],
        };
        let stmts = render_operation(&SqliteDialect, &op, None, RenderOptions::default()).unwrap();
        assert_eq!(stmts, vec!["ALTER TABLE \"user\" ADD COLUMN \"email\" TEXT".to_string()]);
    }

    #[test]
    fn test_sqlite_drop_column_uses_batch() {
        let op = Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![TableChange::DropColumn {
                name: "name".to_string(),
                column: None,
            }],
        };
        let current = user_table();
        let stmts =
            render_operation(&SqliteDialect, &op, Some(&current), RenderOptions::default())
                .unwrap();
        let joined = stmts.join(";\n");
        assert!(joined.contains("CREATE TABLE \"_strata_tmp_user\""));
        assert!(joined.contains("INSERT INTO \"_strata_tmp_user\" (\"id\") SELECT \"id\" FROM \"user\""));
        assert!(joined.contains("DROP TABLE \"user\""));
        assert!(joined.contains("ALTER TABLE \"_strata_tmp_user\" RENAME TO \"user\""));
        assert!(!joined.contains("CREATE INDEX"));
    }

    #[test]
    fn test_batch_follows_renames() {
        let op = Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![
                TableChange::RenameColumn {
                    from: "name".to_string(),
                    to: "nickname".to_string(),
                },
                TableChange::AlterColumn {
                    from: Column::new("nickname", "varchar(32)"),
                    to: Column::new("nickname", "text").not_null().default_value("''"),
                },
            ],
        };
        let current = user_table();
        let stmts =
            render_operation(&SqliteDialect, &op, Some(&current), RenderOptions::default())
                .unwrap();
        let insert = stmts.iter().find(|s| s.starts_with("INSERT")).unwrap();
        assert!(insert.contains("(\"id\", \"nickname\") SELECT \"id\", \"name\""));
        assert!(stmts.last().unwrap().contains("(\"nickname\")"));
    }

    #[test]
    fn test_sqlite_without_batch_fails() {
        let op = Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![TableChange::DropColumn {
                name: "name".to_string(),
                column: None,
            }],
        };
        let result = render_operation(
            &SqliteDialect,
            &op,
            Some(&user_table()),
            RenderOptions {
                render_as_batch: false,
            },
        );
        assert!(matches!(result, Err(MigrationError::Usage(_))));
    }

    #[test]
    fn test_postgres_alter_column() {
        let op = Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![TableChange::AlterColumn {
                from: Column::new("name", "varchar(32)"),
                to: Column::new("name", "text").not_null(),
            }],
        };
        let stmts = render_operation(&PostgresDialect, &op, None, RenderOptions::default()).unwrap();
        assert_eq!(
            stmts,
            vec![
                "ALTER TABLE \"user\" ALTER COLUMN \"name\" TYPE TEXT".to_string(),
                "ALTER TABLE \"user\" ALTER COLUMN \"name\" SET NOT NULL".to_string(),
            ]
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(SqliteDialect.quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqliteDialect.literal("it's"), "'it''s'");
    }
}
