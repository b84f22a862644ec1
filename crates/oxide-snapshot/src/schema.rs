//! Structural metadata read from a source database.
//!
//! Every dialect adapter produces these same records, so the migrators never
//! see engine-specific metadata. A [`TableDescriptor`] is read fresh on each
//! pass and is not cached across runs.

use serde::{Deserialize, Serialize};

/// Metadata for a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name, unique within its table.
    pub name: String,
    /// Source type name as reported by the engine (case-insensitive).
    pub type_name: String,
    /// Declared size. Zero, negative, or a sentinel value means unbounded.
    pub size: i64,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Raw default expression in the source dialect.
    ///
    /// `None` means no default, `Some("")` is an empty-string default.
    pub default: Option<String>,
    /// Whether the column is generated by the engine.
    pub auto_increment: bool,
}

impl ColumnDescriptor {
    /// Creates a nullable column with no declared size.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            size: 0,
            nullable: true,
            default: None,
            auto_increment: false,
        }
    }

    /// Sets the declared size.
    #[must_use]
    pub fn size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the raw default expression.
    #[must_use]
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Marks the column as auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint name.
    pub name: String,
    /// Referencing column(s).
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced column(s), positionally matched with `columns`.
    pub referenced_columns: Vec<String>,
}

impl ForeignKeyDescriptor {
    /// Creates a single-column foreign key.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: vec![column.into()],
            referenced_table: referenced_table.into(),
            referenced_columns: vec![referenced_column.into()],
        }
    }

    /// Leading local column.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    /// Leading referenced column.
    #[must_use]
    pub fn referenced_column(&self) -> Option<&str> {
        self.referenced_columns.first().map(String::as_str)
    }
}

/// An index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,
    /// Indexed column(s), in key order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
}

impl IndexDescriptor {
    /// Creates an index over `columns`.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }

    /// Leading indexed column.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }
}

/// Complete metadata for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key column(s), in key order.
    pub primary_key: Vec<String>,
    /// Declared foreign keys.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// Secondary indexes.
    pub indexes: Vec<IndexDescriptor>,
}

impl TableDescriptor {
    /// Creates an empty table descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKeyDescriptor) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Looks up a column by name, ignoring case.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether `name` is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(name))
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns flagged as auto-increment.
    pub fn auto_increment_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.auto_increment)
    }
}
