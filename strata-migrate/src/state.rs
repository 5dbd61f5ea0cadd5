//! Applying operations to in-memory metadata.
//!
//! Used to know a table's shape without a live connection (SQL emission
//! mode) and to compute the target definition of a batch table rebuild.

use strata_schema::{MetaData, Table};

use crate::error::{MigrateResult, MigrationError};
use crate::ops::{Operation, TableChange};

/// Apply a top-level operation to `metadata`.
///
/// Raw SQL is opaque and leaves the metadata unchanged.
pub fn apply_operation(metadata: &mut MetaData, op: &Operation) -> MigrateResult<()> {
    match op {
        Operation::CreateTable { table } => {
            metadata.add_table(table.clone());
        }
        Operation::DropTable { name, .. } => {
            metadata.remove_table(name);
        }
        Operation::AlterTable { table, changes } => {
            let current = metadata.table(table).ok_or_else(|| {
                MigrationError::usage(format!("cannot alter unknown table '{}'", table))
            })?;
            let altered = apply_changes(current, changes)?;
            metadata.add_table(altered);
        }
        Operation::Execute { .. } => {}
    }
    Ok(())
}

/// The definition of `table` after `changes`.
pub fn apply_changes(table: &Table, changes: &[TableChange]) -> MigrateResult<Table> {
    let mut table = table.clone();
    for change in changes {
        apply_change(&mut table, change)?;
    }
    Ok(table)
}

fn apply_change(table: &mut Table, change: &TableChange) -> MigrateResult<()> {
    let table_name = table.name.clone();
    let missing = |column: &str| {
        MigrationError::usage(format!(
            "table '{}' has no column '{}'",
            table_name, column
        ))
    };

    match change {
        TableChange::AddColumn { column } => {
            table.columns.push(column.clone());
        }
        TableChange::DropColumn { name, .. } => {
            let before = table.columns.len();
            table.columns.retain(|c| &c.name != name);
            if table.columns.len() == before {
                return Err(missing(name));
            }
            for index in &mut table.indexes {
                index.columns.retain(|c| c != name);
            }
            table.indexes.retain(|i| !i.columns.is_empty());
        }
        TableChange::AlterColumn { from, to } => {
            let err = missing(&from.name);
            let column = table.get_column_mut(&from.name).ok_or(err)?;
            *column = to.clone();
        }
        TableChange::RenameColumn { from, to } => {
            let err = missing(from);
            let column = table.get_column_mut(from).ok_or(err)?;
            column.name = to.clone();
            for index in &mut table.indexes {
                for col in &mut index.columns {
                    if *col == *from {
                        *col = to.clone();
                    }
                }
            }
        }
        TableChange::AddIndex { index } => {
            table.indexes.retain(|i| i.name != index.name);
            table.indexes.push(index.clone());
        }
        TableChange::DropIndex { name, .. } => {
            table.indexes.retain(|i| &i.name != name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::{Column, Index};

    fn metadata() -> MetaData {
        vec![
            Table::new("user")
                .column(Column::new("id", "integer").primary_key())
                .column(Column::new("name", "text"))
                .index(Index::new("ix_user_name", vec!["name".to_string()])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_rename_updates_indexes() {
        let mut md = metadata();
        apply_operation(
            &mut md,
            &Operation::AlterTable {
                table: "user".to_string(),
                changes: vec![TableChange::RenameColumn {
                    from: "name".to_string(),
                    to: "nickname".to_string(),
                }],
            },
        )
        .unwrap();
        let table = md.table("user").unwrap();
        assert!(table.get_column("nickname").is_some());
        assert_eq!(table.indexes[0].columns, vec!["nickname".to_string()]);
    }

    #[test]
    fn test_drop_column_removes_empty_indexes() {
        let table = metadata().table("user").cloned().unwrap();
        let altered = apply_changes(
            &table,
            &[TableChange::DropColumn {
                name: "name".to_string(),
                column: None,
            }],
        )
        .unwrap();
        assert_eq!(altered.columns.len(), 1);
        assert!(altered.indexes.is_empty());
    }

    #[test]
    fn test_alter_unknown_table_fails() {
        let mut md = MetaData::new();
        let result = apply_operation(
            &mut md,
            &Operation::AlterTable {
                table: "ghost".to_string(),
                changes: vec![],
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_table() {
        let mut md = metadata();
        apply_operation(
            &mut md,
            &Operation::DropTable {
                name: "user".to_string(),
                table: None,
            },
        )
        .unwrap();
        assert!(md.is_empty());
    }
}
