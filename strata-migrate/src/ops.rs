//! Migration operations.
//!
//! Operations are plain data: a revision script stores them, the
//! autogenerate engine produces them, and a [`Dialect`](crate::sql::Dialect)
//! renders them to SQL for one connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_schema::{Column, ColumnType, Index, Table};

/// A top-level schema operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table.
    CreateTable {
        /// The full definition.
        table: Table,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
        /// Definition at drop time, kept so the drop can be reversed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<Table>,
    },
    /// Change an existing table.
    AlterTable {
        /// Table name.
        table: String,
        /// Changes, applied in order.
        changes: Vec<TableChange>,
    },
    /// Hand-written SQL.
    Execute {
        /// Statements to run verbatim.
        sql: String,
    },
}

/// A change inside an [`Operation::AlterTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum TableChange {
    AddColumn {
        column: Column,
    },
    DropColumn {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<Column>,
    },
    AlterColumn {
        from: Column,
        to: Column,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    AddIndex {
        index: Index,
    },
    DropIndex {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<Index>,
    },
}

impl Operation {
    /// The table this operation touches, if any.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table } => Some(&table.name),
            Self::DropTable { name, .. } => Some(name),
            Self::AlterTable { table, .. } => Some(table),
            Self::Execute { .. } => None,
        }
    }

    /// The operation that undoes this one.
    ///
    /// Returns `None` when the inverse can't be derived, e.g. a drop that
    /// did not record the dropped definition, or raw SQL.
    pub fn reverse(&self) -> Option<Operation> {
        match self {
            Self::CreateTable { table } => Some(Self::DropTable {
                name: table.name.clone(),
                table: Some(table.clone()),
            }),
            Self::DropTable { table, .. } => table
                .clone()
                .map(|table| Self::CreateTable { table }),
            Self::AlterTable { table, changes } => {
                let changes: Vec<TableChange> =
                    changes.iter().rev().filter_map(TableChange::reverse).collect();
                if changes.is_empty() {
                    None
                } else {
                    Some(Self::AlterTable {
                        table: table.clone(),
                        changes,
                    })
                }
            }
            Self::Execute { .. } => None,
        }
    }
}

impl TableChange {
    /// The change that undoes this one.
    pub fn reverse(&self) -> Option<TableChange> {
        match self {
            Self::AddColumn { column } => Some(Self::DropColumn {
                name: column.name.clone(),
                column: Some(column.clone()),
            }),
            Self::DropColumn { column, .. } => {
                column.clone().map(|column| Self::AddColumn { column })
            }
            Self::AlterColumn { from, to } => Some(Self::AlterColumn {
                from: to.clone(),
                to: from.clone(),
            }),
            Self::RenameColumn { from, to } => Some(Self::RenameColumn {
                from: to.clone(),
                to: from.clone(),
            }),
            Self::AddIndex { index } => Some(Self::DropIndex {
                name: index.name.clone(),
                index: Some(index.clone()),
            }),
            Self::DropIndex { index, .. } => index.clone().map(|index| Self::AddIndex { index }),
        }
    }

    /// Whether a database without native ALTER support can still apply this
    /// change in place.
    pub fn is_simple(&self) -> bool {
        match self {
            Self::AddColumn { column } => {
                !column.primary_key && (column.nullable || column.default.is_some())
            }
            Self::AddIndex { .. } | Self::DropIndex { .. } | Self::RenameColumn { .. } => true,
            Self::DropColumn { .. } | Self::AlterColumn { .. } => false,
        }
    }
}

/// The operations of one bind inside a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOps {
    /// Bind name, `""` for the default bind.
    #[serde(default)]
    pub bind: String,
    /// Operations in execution order.
    #[serde(default)]
    pub ops: Vec<Operation>,
}

impl BindOps {
    /// Create a group for a bind.
    pub fn new(bind: impl Into<String>, ops: Vec<Operation>) -> Self {
        Self {
            bind: bind.into(),
            ops,
        }
    }
}

/// An ordered operation tree produced by the autogenerate engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeOps {
    /// Top-level operations.
    pub ops: Vec<Operation>,
}

impl UpgradeOps {
    /// Create from a list of operations.
    pub fn new(ops: Vec<Operation>) -> Self {
        Self { ops }
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The downgrade tree: reversed order, each operation inverted.
    pub fn reverse(&self) -> UpgradeOps {
        UpgradeOps {
            ops: self.ops.iter().rev().filter_map(Operation::reverse).collect(),
        }
    }

    /// Flatten the tree into individual differences.
    pub fn as_diffs(&self) -> Vec<DiffEntry> {
        let mut diffs = Vec::new();
        for op in &self.ops {
            match op {
                Operation::CreateTable { table } => {
                    diffs.push(DiffEntry::AddTable(table.name.clone()));
                }
                Operation::DropTable { name, .. } => {
                    diffs.push(DiffEntry::RemoveTable(name.clone()));
                }
                Operation::AlterTable { table, changes } => {
                    for change in changes {
                        flatten_change(table, change, &mut diffs);
                    }
                }
                Operation::Execute { sql } => diffs.push(DiffEntry::Execute(sql.clone())),
            }
        }
        diffs
    }
}

fn flatten_change(table: &str, change: &TableChange, diffs: &mut Vec<DiffEntry>) {
    let table = table.to_string();
    match change {
        TableChange::AddColumn { column } => diffs.push(DiffEntry::AddColumn {
            table,
            column: column.name.clone(),
        }),
        TableChange::DropColumn { name, .. } => diffs.push(DiffEntry::RemoveColumn {
            table,
            column: name.clone(),
        }),
        TableChange::AlterColumn { from, to } => {
            if from.column_type != to.column_type {
                diffs.push(DiffEntry::ModifyType {
                    table: table.clone(),
                    column: to.name.clone(),
                    from: from.column_type.clone(),
                    to: to.column_type.clone(),
                });
            }
            if from.nullable != to.nullable {
                diffs.push(DiffEntry::ModifyNullable {
                    table: table.clone(),
                    column: to.name.clone(),
                    from: from.nullable,
                    to: to.nullable,
                });
            }
            if from.default != to.default {
                diffs.push(DiffEntry::ModifyDefault {
                    table,
                    column: to.name.clone(),
                    from: from.default.clone(),
                    to: to.default.clone(),
                });
            }
        }
        TableChange::RenameColumn { from, to } => diffs.push(DiffEntry::RenameColumn {
            table,
            from: from.clone(),
            to: to.clone(),
        }),
        TableChange::AddIndex { index } => diffs.push(DiffEntry::AddIndex {
            table,
            index: index.name.clone(),
        }),
        TableChange::DropIndex { name, .. } => diffs.push(DiffEntry::RemoveIndex {
            table,
            index: name.clone(),
        }),
    }
}

/// A single difference between two schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    AddTable(String),
    RemoveTable(String),
    AddColumn {
        table: String,
        column: String,
    },
    RemoveColumn {
        table: String,
        column: String,
    },
    ModifyType {
        table: String,
        column: String,
        from: ColumnType,
        to: ColumnType,
    },
    ModifyNullable {
        table: String,
        column: String,
        from: bool,
        to: bool,
    },
    ModifyDefault {
        table: String,
        column: String,
        from: Option<String>,
        to: Option<String>,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    AddIndex {
        table: String,
        index: String,
    },
    RemoveIndex {
        table: String,
        index: String,
    },
    Execute(String),
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("<none>")
        }

        match self {
            Self::AddTable(name) => write!(f, "add_table {}", name),
            Self::RemoveTable(name) => write!(f, "remove_table {}", name),
            Self::AddColumn { table, column } => write!(f, "add_column {}.{}", table, column),
            Self::RemoveColumn { table, column } => {
                write!(f, "remove_column {}.{}", table, column)
            }
            Self::ModifyType {
                table,
                column,
                from,
                to,
            } => write!(f, "modify_type {}.{}: {} -> {}", table, column, from, to),
            Self::ModifyNullable {
                table,
                column,
                from,
                to,
            } => write!(f, "modify_nullable {}.{}: {} -> {}", table, column, from, to),
            Self::ModifyDefault {
                table,
                column,
                from,
                to,
            } => write!(
                f,
                "modify_default {}.{}: {} -> {}",
                table,
                column,
                opt(from),
                opt(to)
            ),
            Self::RenameColumn { table, from, to } => {
                write!(f, "rename_column {}.{} -> {}", table, from, to)
            }
            Self::AddIndex { table, index } => write!(f, "add_index {} on {}", index, table),
            Self::RemoveIndex { table, index } => write!(f, "remove_index {} on {}", index, table),
            Self::Execute(sql) => write!(f, "execute {}", sql),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user_table() -> Table {
        Table::new("user")
            .column(Column::new("id", "integer").primary_key())
            .column(Column::new("name", "varchar(32)"))
    }

    #[test]
    fn test_reverse_create_table() {
        let ops = UpgradeOps::new(vec![Operation::CreateTable {
            table: user_table(),
        }]);
        let reversed = ops.reverse();
        assert_eq!(
            reversed.ops,
            vec![Operation::DropTable {
                name: "user".to_string(),
                table: Some(user_table()),
            }]
        );
        assert_eq!(reversed.reverse(), ops);
    }

    #[test]
    fn test_reverse_alter_table_inverts_order() {
        let op = Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![
                TableChange::AddColumn {
                    column: Column::new("email", "text"),
                },
                TableChange::RenameColumn {
                    from: "name".to_string(),
                    to: "nickname".to_string(),
                },
            ],
        };
        let Some(Operation::AlterTable { changes, .. }) = op.reverse() else {
            panic!("expected alter_table");
        };
        assert_eq!(
            changes[0],
            TableChange::RenameColumn {
                from: "nickname".to_string(),
                to: "name".to_string(),
            }
        );
        assert!(matches!(&changes[1], TableChange::DropColumn { name, .. } if name == "email"));
    }

    #[test]
    fn test_raw_sql_is_not_reversible() {
        let op = Operation::Execute {
            sql: "UPDATE user SET name = 'x'".to_string(),
        };
        assert!(op.reverse().is_none());
    }

    #[test]
    fn test_as_diffs_flattens_alter_column() {
        let from = Column::new("name", "varchar(32)");
        let to = Column::new("name", "text").not_null();
        let ops = UpgradeOps::new(vec![Operation::AlterTable {
            table: "user".to_string(),
            changes: vec![TableChange::AlterColumn { from, to }],
        }]);
        let diffs: Vec<String> = ops.as_diffs().iter().map(ToString::to_string).collect();
        assert_eq!(
            diffs,
            vec![
                "modify_type user.name: VARCHAR(32) -> TEXT".to_string(),
                "modify_nullable user.name: true -> false".to_string(),
            ]
        );
    }

    #[test]
    fn test_simple_changes() {
        assert!(
            TableChange::AddColumn {
                column: Column::new("email", "text")
            }
            .is_simple()
        );
        assert!(
            !TableChange::AddColumn {
                column: Column::new("email", "text").not_null()
            }
            .is_simple()
        );
        assert!(
            !TableChange::DropColumn {
                name: "email".to_string(),
                column: None
            }
            .is_simple()
        );
    }
}
