//! Table, column and index definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

/// A column type.
///
/// Types are written as SQL-ish strings (`"integer"`, `"varchar(32)"`) in
/// model and revision files. Anything unrecognised is kept verbatim as
/// [`ColumnType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    SmallInteger,
    Integer,
    BigInteger,
    Boolean,
    Float,
    Double,
    Numeric,
    Text,
    Varchar(Option<u32>),
    Blob,
    Date,
    DateTime,
    Json,
    Uuid,
    Other(String),
}

/// Coarse storage class used when comparing declared and reflected types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    Integer,
    Boolean,
    Real,
    Numeric,
    Text,
    Blob,
    Temporal,
    Json,
}

impl ColumnType {
    /// Parse a type name as it appears in DDL or in catalog tables.
    pub fn from_sql(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        let (base, args) = match normalized.find('(') {
            Some(open) => {
                let args = normalized[open + 1..].trim_end_matches(')').trim();
                (normalized[..open].trim(), Some(args))
            }
            None => (normalized.as_str(), None),
        };

        match base {
            "smallint" | "int2" | "tinyint" => Self::SmallInteger,
            "integer" | "int" | "int4" | "mediumint" => Self::Integer,
            "bigint" | "int8" => Self::BigInteger,
            "boolean" | "bool" => Self::Boolean,
            "real" | "float" | "float4" => Self::Float,
            "double" | "double precision" | "float8" => Self::Double,
            "numeric" | "decimal" => Self::Numeric,
            "text" | "clob" => Self::Text,
            "varchar" | "character varying" | "nvarchar" | "char" | "character" => {
                Self::Varchar(args.and_then(|a| a.parse().ok()))
            }
            "blob" | "bytea" | "binary" | "varbinary" => Self::Blob,
            "date" => Self::Date,
            "datetime"
            | "timestamp"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "timestamptz" => Self::DateTime,
            "json" | "jsonb" => Self::Json,
            "uuid" => Self::Uuid,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// The storage class of this type.
    pub fn affinity(&self) -> Affinity {
        match self {
            Self::SmallInteger | Self::Integer | Self::BigInteger => Affinity::Integer,
            Self::Boolean => Affinity::Boolean,
            Self::Float | Self::Double => Affinity::Real,
            Self::Numeric => Affinity::Numeric,
            Self::Text | Self::Varchar(_) | Self::Uuid => Affinity::Text,
            Self::Blob => Affinity::Blob,
            Self::Date | Self::DateTime => Affinity::Temporal,
            Self::Json => Affinity::Json,
            Self::Other(name) => {
                // Same rules SQLite uses to derive affinity from a declared type.
                let name = name.to_ascii_uppercase();
                if name.contains("INT") {
                    Affinity::Integer
                } else if name.contains("CHAR") || name.contains("CLOB") || name.contains("TEXT")
                {
                    Affinity::Text
                } else if name.contains("BLOB") || name.is_empty() {
                    Affinity::Blob
                } else if name.contains("REAL") || name.contains("FLOA") || name.contains("DOUB")
                {
                    Affinity::Real
                } else {
                    Affinity::Numeric
                }
            }
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallInteger => write!(f, "SMALLINT"),
            Self::Integer => write!(f, "INTEGER"),
            Self::BigInteger => write!(f, "BIGINT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Float => write!(f, "REAL"),
            Self::Double => write!(f, "DOUBLE PRECISION"),
            Self::Numeric => write!(f, "NUMERIC"),
            Self::Text => write!(f, "TEXT"),
            Self::Varchar(Some(len)) => write!(f, "VARCHAR({})", len),
            Self::Varchar(None) => write!(f, "VARCHAR"),
            Self::Blob => write!(f, "BLOB"),
            Self::Date => write!(f, "DATE"),
            Self::DateTime => write!(f, "DATETIME"),
            Self::Json => write!(f, "JSON"),
            Self::Uuid => write!(f, "UUID"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

impl From<String> for ColumnType {
    fn from(value: String) -> Self {
        Self::from_sql(&value)
    }
}

impl From<&str> for ColumnType {
    fn from(value: &str) -> Self {
        Self::from_sql(value)
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    /// Server-side default expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Column {
    /// Create a new nullable column.
    pub fn new(name: impl Into<String>, column_type: impl Into<ColumnType>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    /// Mark the column as the primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark the column as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a server default.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
}

impl Index {
    /// Create a new index.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    /// Make this a unique index.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Secondary indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Requested bind key. `None` means "the owner's bind, or the default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// Plugin that declared the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            bind: None,
            owner: None,
        }
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add an index.
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Request a bind key.
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get a mutable column by name.
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Primary key column names.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Check the definition is usable.
    pub fn validate(&self) -> SchemaResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::invalid_table(&self.name, "table name is empty"));
        }
        if self.columns.is_empty() {
            return Err(SchemaError::invalid_table(&self.name, "table has no columns"));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::invalid_table(
                    &self.name,
                    format!("duplicate column `{}`", column.name),
                ));
            }
        }
        for index in &self.indexes {
            if let Some(missing) = index
                .columns
                .iter()
                .find(|c| self.get_column(c).is_none())
            {
                return Err(SchemaError::invalid_table(
                    &self.name,
                    format!("index `{}` references unknown column `{}`", index.name, missing),
                ));
            }
        }
        Ok(())
    }
}
