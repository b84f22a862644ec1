//! Target dialect implementations.
//!
//! Each dialect knows how to render DDL and literals for the engine that
//! receives the snapshot.

mod h2;
mod sqlite;

pub use h2::H2Dialect;
pub use sqlite::SqliteDialect;

use std::fmt::Write;

use crate::schema::{ForeignKeyDescriptor, IndexDescriptor};
use crate::value::{Row, Value};

/// A column after type mapping and default translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Target type expression.
    pub target_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Translated default expression.
    pub default: Option<String>,
    /// Whether to emit the auto-increment marker.
    pub auto_increment: bool,
}

/// Trait for target-specific SQL generation.
pub trait TargetDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Quote an identifier (table name, column name, etc.) when required.
    fn quote_identifier(&self, name: &str) -> String;

    /// Returns the auto-increment keyword for this dialect.
    fn auto_increment_keyword(&self) -> &'static str;

    /// Renders a translated default expression.
    fn render_default(&self, expr: &str) -> String {
        expr.to_string()
    }

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnDefinition) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            column.target_type.clone(),
        ];

        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", self.render_default(default)));
        }

        if column.auto_increment {
            parts.push(self.auto_increment_keyword().to_string());
        }

        parts.join(" ")
    }

    /// Whether explicit values for an auto-increment column only load once
    /// the marker is off.
    ///
    /// Dialects that accept explicit keys keep the marker for the whole run.
    fn suppresses_auto_increment(&self) -> bool {
        true
    }

    /// Whether foreign keys are declared inside `CREATE TABLE` instead of
    /// being added once every table exists.
    fn inline_foreign_keys(&self) -> bool {
        false
    }

    /// Generates a single-statement `CREATE TABLE`.
    fn create_table(
        &self,
        table: &str,
        columns: &[ColumnDefinition],
        primary_key: &[String],
        foreign_keys: &[ForeignKeyDescriptor],
    ) -> String {
        let mut clauses: Vec<String> = columns.iter().map(|c| self.column_definition(c)).collect();

        if !primary_key.is_empty() {
            clauses.push(format!("PRIMARY KEY ({})", self.column_list(primary_key)));
        }

        if self.inline_foreign_keys() {
            clauses.extend(foreign_keys.iter().map(|fk| self.foreign_key_clause(fk)));
        }

        format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            clauses.join(", ")
        )
    }

    /// Generates SQL for dropping a table.
    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }

    /// Generates SQL dropping a table that may not exist.
    fn drop_table_if_exists(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    /// Generates SQL for creating an index.
    fn create_index(&self, table: &str, index: &IndexDescriptor) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(table),
            self.column_list(&index.columns)
        )
    }

    /// `CONSTRAINT name FOREIGN KEY (...) REFERENCES table (...)`.
    fn foreign_key_clause(&self, fk: &ForeignKeyDescriptor) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.column_list(&fk.columns),
            self.quote_identifier(&fk.referenced_table),
            self.column_list(&fk.referenced_columns)
        )
    }

    /// Generates SQL adding a foreign key to an existing table.
    ///
    /// `None` when the dialect cannot add constraints after creation.
    fn add_foreign_key(&self, table: &str, fk: &ForeignKeyDescriptor) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.foreign_key_clause(fk)
        ))
    }

    /// Generates SQL turning auto-increment back on for a column.
    ///
    /// `column` is the definition the table was created with.
    fn restore_auto_increment(&self, table: &str, column: &ColumnDefinition) -> Option<String>;

    /// Generates SQL moving an auto-increment counter so the next value is `next`.
    fn restart_counter(&self, table: &str, column: &str, next: i64) -> Option<String>;

    /// Renders a value as a SQL literal.
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) if v.is_nan() => "'NaN'".to_string(),
            Value::Float(v) if v.is_infinite() => {
                if *v > 0.0 {
                    "'Infinity'".to_string()
                } else {
                    "'-Infinity'".to_string()
                }
            }
            Value::Float(v) => format!("{v:?}"),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2 + 3);
                hex.push_str("X'");
                for b in bytes {
                    let _ = write!(hex, "{b:02X}");
                }
                hex.push('\'');
                hex
            }
        }
    }

    /// Generates a multi-row `INSERT` with literal values.
    fn insert(&self, table: &str, columns: &[String], rows: &[Row]) -> String {
        let values: Vec<String> = rows
            .iter()
            .map(|row| {
                let literals: Vec<String> = row.iter().map(|v| self.literal(v)).collect();
                format!("({})", literals.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_identifier(table),
            self.column_list(columns),
            values.join(", ")
        )
    }

    /// Comma-separated quoted identifiers.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Looks up a dialect by name. Unknown names fall back to H2.
#[must_use]
pub fn for_name(name: &str) -> Box<dyn TargetDialect> {
    match name.trim().to_lowercase().as_str() {
        "sqlite" | "sqlite3" => Box::new(SqliteDialect::new()),
        _ => Box::new(H2Dialect::new()),
    }
}
