//! Schema comparison.
//!
//! Compares a reflected database schema with the declared model and
//! produces the operations that bring the database in line.

use strata_schema::{Column, ColumnType, MetaData, Table};
use tracing::debug;

use crate::config::ContextOptions;
use crate::ops::{Operation, TableChange, UpgradeOps};

/// Comparison options.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Detect column type changes.
    pub compare_type: bool,
    /// Detect server default changes.
    pub compare_server_default: bool,
    /// Emit drops for tables only present in the database.
    pub include_unmanaged_tables: bool,
    /// Only compare tables declared by this plugin.
    pub owner: Option<String>,
    /// Table ignored on both sides.
    pub version_table: String,
}

impl CompareOptions {
    /// Options derived from context settings.
    pub fn new(context: &ContextOptions, version_table: impl Into<String>) -> Self {
        Self {
            compare_type: context.compare_type,
            compare_server_default: context.compare_server_default,
            include_unmanaged_tables: true,
            owner: None,
            version_table: version_table.into(),
        }
    }

    /// Restrict comparison to one plugin's tables.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Whether to drop tables the model doesn't know about.
    pub fn include_unmanaged_tables(mut self, include: bool) -> Self {
        self.include_unmanaged_tables = include;
        self
    }
}

/// Whether two column types differ enough to migrate.
///
/// Unknown types compare by affinity; a varchar without a length matches any
/// varchar.
pub fn types_differ(reflected: &ColumnType, declared: &ColumnType) -> bool {
    match (reflected, declared) {
        (ColumnType::Varchar(a), ColumnType::Varchar(b)) => {
            matches!((a, b), (Some(a), Some(b)) if a != b)
        }
        (ColumnType::Other(_), _) | (_, ColumnType::Other(_)) => {
            reflected.affinity() != declared.affinity()
        }
        _ => reflected != declared,
    }
}

fn normalize_default(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|v| {
        let v = v.trim();
        v.strip_prefix('(')
            .and_then(|v| v.strip_suffix(')'))
            .unwrap_or(v)
            .to_string()
    })
}

/// Compare `reflected` against `declared`.
pub fn compare_metadata(
    reflected: &MetaData,
    declared: &MetaData,
    options: &CompareOptions,
) -> UpgradeOps {
    let scoped;
    let declared = match &options.owner {
        Some(owner) => {
            scoped = declared.owned_by(owner);
            &scoped
        }
        None => declared,
    };
    let ignored = |name: &str| name == options.version_table;

    let mut ops = Vec::new();

    for table in declared.tables() {
        if ignored(&table.name) {
            continue;
        }
        match reflected.table(&table.name) {
            None => ops.push(Operation::CreateTable {
                table: table.clone(),
            }),
            Some(existing) => {
                let changes = compare_table(existing, table, options);
                if !changes.is_empty() {
                    ops.push(Operation::AlterTable {
                        table: table.name.clone(),
                        changes,
                    });
                }
            }
        }
    }

    if options.include_unmanaged_tables && options.owner.is_none() {
        for table in reflected.tables() {
            if ignored(&table.name) || declared.contains(&table.name) {
                continue;
            }
            ops.push(Operation::DropTable {
                name: table.name.clone(),
                table: Some(table.clone()),
            });
        }
    }

    debug!(count = ops.len(), "Schema comparison finished");
    UpgradeOps::new(ops)
}

fn compare_table(reflected: &Table, declared: &Table, options: &CompareOptions) -> Vec<TableChange> {
    let mut changes = Vec::new();

    for column in &declared.columns {
        match reflected.get_column(&column.name) {
            None => changes.push(TableChange::AddColumn {
                column: column.clone(),
            }),
            Some(existing) => {
                if let Some(to) = compare_column(existing, column, options) {
                    changes.push(TableChange::AlterColumn {
                        from: existing.clone(),
                        to,
                    });
                }
            }
        }
    }

    for column in &reflected.columns {
        if declared.get_column(&column.name).is_none() {
            changes.push(TableChange::DropColumn {
                name: column.name.clone(),
                column: Some(column.clone()),
            });
        }
    }

    for index in &reflected.indexes {
        let stale = match declared.get_index(&index.name) {
            None => true,
            Some(wanted) => wanted.columns != index.columns || wanted.unique != index.unique,
        };
        if stale {
            changes.push(TableChange::DropIndex {
                name: index.name.clone(),
                index: Some(index.clone()),
            });
        }
    }

    for index in &declared.indexes {
        let missing = match reflected.get_index(&index.name) {
            None => true,
            Some(existing) => existing.columns != index.columns || existing.unique != index.unique,
        };
        if missing {
            changes.push(TableChange::AddIndex {
                index: index.clone(),
            });
        }
    }

    changes
}

/// The altered column, keeping reflected attributes that aren't compared.
fn compare_column(reflected: &Column, declared: &Column, options: &CompareOptions) -> Option<Column> {
    let mut to = reflected.clone();
    let mut changed = false;

    if reflected.nullable != declared.nullable && !declared.primary_key {
        to.nullable = declared.nullable;
        changed = true;
    }
    if options.compare_type && types_differ(&reflected.column_type, &declared.column_type) {
        to.column_type = declared.column_type.clone();
        changed = true;
    }
    if options.compare_server_default
        && normalize_default(&reflected.default) != normalize_default(&declared.default)
    {
        to.default = declared.default.clone();
        changed = true;
    }

    changed.then_some(to)
}
