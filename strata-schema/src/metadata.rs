//! Per-bind collections of tables.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::table::Table;

/// The set of tables that live on one bind, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    tables: IndexMap<String, Table>,
}

impl MetaData {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a table.
    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Remove a table, keeping the order of the rest.
    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        self.tables.shift_remove(name)
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Get a mutable table by name.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Check whether a table exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Iterate over tables in order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Table names in order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether there are no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Rename a table in place.
    pub fn rename_table(&mut self, from: &str, to: &str) -> bool {
        match self.tables.get_index_of(from) {
            Some(index) => {
                let Some((_, mut table)) = self.tables.shift_remove_index(index) else {
                    return false;
                };
                table.name = to.to_string();
                self.tables.shift_insert(index, to.to_string(), table);
                true
            }
            None => false,
        }
    }

    /// Only the tables owned by `owner`.
    pub fn owned_by(&self, owner: &str) -> MetaData {
        let mut filtered = MetaData::new();
        for table in self.tables() {
            if table.owner.as_deref() == Some(owner) {
                filtered.add_table(table.clone());
            }
        }
        filtered
    }
}

impl FromIterator<Table> for MetaData {
    fn from_iter<I: IntoIterator<Item = Table>>(iter: I) -> Self {
        let mut metadata = MetaData::new();
        for table in iter {
            metadata.add_table(table);
        }
        metadata
    }
}
