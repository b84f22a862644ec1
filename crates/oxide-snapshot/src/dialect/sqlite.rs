//! SQLite dialect.
//!
//! SQLite cannot add constraints to an existing table, so foreign keys are
//! declared inline at creation time. It does not check that the referenced
//! table exists until the constraint is enforced, which keeps creation order
//! irrelevant.

use crate::schema::ForeignKeyDescriptor;

use super::{ColumnDefinition, TargetDialect};

/// SQLite target dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The single integer auto-increment key column, if the table has one.
    ///
    /// Only that shape can be declared `INTEGER PRIMARY KEY AUTOINCREMENT`.
    fn rowid_column<'a>(
        columns: &'a [ColumnDefinition],
        primary_key: &[String],
    ) -> Option<&'a ColumnDefinition> {
        let [pk] = primary_key else {
            return None;
        };
        columns.iter().find(|c| {
            c.auto_increment
                && c.name.eq_ignore_ascii_case(pk)
                && matches!(
                    c.target_type.to_ascii_uppercase().as_str(),
                    "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT"
                )
        })
    }

    fn is_plain_literal(expr: &str) -> bool {
        let upper = expr.trim().to_ascii_uppercase();
        (upper.starts_with('\'') && upper.ends_with('\'') && upper.len() >= 2)
            || (upper.starts_with('(') && upper.ends_with(')'))
            || upper.parse::<f64>().is_ok()
            || matches!(
                upper.as_str(),
                "NULL" | "TRUE" | "FALSE" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
            )
    }
}

impl TargetDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn render_default(&self, expr: &str) -> String {
        if Self::is_plain_literal(expr) {
            expr.to_string()
        } else {
            format!("({expr})")
        }
    }

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

        parts.join(" ")
    }

    fn suppresses_auto_increment(&self) -> bool {
        // Explicit rowids load as-is and advance sqlite_sequence.
        false
    }

    fn inline_foreign_keys(&self) -> bool {
        true
    }

    fn create_table(
        &self,
        table: &str,
        columns: &[ColumnDefinition],
        primary_key: &[String],
        foreign_keys: &[ForeignKeyDescriptor],
    ) -> String {
        let rowid = Self::rowid_column(columns, primary_key);

        let mut clauses: Vec<String> = columns
            .iter()
            .map(|c| match rowid {
                Some(r) if r.name == c.name => format!(
                    "{} INTEGER PRIMARY KEY {}",
                    self.quote_identifier(&c.name),
                    self.auto_increment_keyword()
                ),
                _ => self.column_definition(c),
            })
            .collect();

        if rowid.is_none() && !primary_key.is_empty() {
            clauses.push(format!("PRIMARY KEY ({})", self.column_list(primary_key)));
        }

        clauses.extend(foreign_keys.iter().map(|fk| self.foreign_key_clause(fk)));

        format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            clauses.join(", ")
        )
    }

    fn add_foreign_key(&self, _table: &str, _fk: &ForeignKeyDescriptor) -> Option<String> {
        // Declared inline by create_table.
        None
    }

    fn restore_auto_increment(&self, _table: &str, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn restart_counter(&self, _table: &str, _column: &str, _next: i64) -> Option<String> {
        // sqlite_sequence already tracks explicit inserts.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexDescriptor;

    fn column(name: &str, ty: &str) -> ColumnDefinition {
        ColumnDefinition {
            name: name.into(),
            target_type: ty.into(),
            nullable: true,
            default: None,
            auto_increment: false,
        }
    }

    #[test]
    fn test_create_table_rowid_alias() {
        let dialect = SqliteDialect::new();
        let columns = vec![
            ColumnDefinition {
                nullable: false,
                auto_increment: true,
                ..column("id", "INT")
            },
            column("name", "VARCHAR(50)"),
        ];
        let sql = dialect.create_table("users", &columns, &["id".into()], &[]);
        assert_eq!(
            sql,
            "CREATE TABLE \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"name\" VARCHAR(50))"
        );
    }

    #[test]
    fn test_create_table_composite_key_with_foreign_key() {
        let dialect = SqliteDialect::new();
        let columns = vec![
            ColumnDefinition {
                nullable: false,
                ..column("order_id", "INT")
            },
            ColumnDefinition {
                nullable: false,
                ..column("line", "INT")
            },
        ];
        let fk = ForeignKeyDescriptor::new("fk_items_order", "order_id", "orders", "id");
        let sql = dialect.create_table(
            "items",
            &columns,
            &["order_id".into(), "line".into()],
            &[fk],
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"items\" (\"order_id\" INT NOT NULL, \"line\" INT NOT NULL, \
             PRIMARY KEY (\"order_id\", \"line\"), CONSTRAINT \"fk_items_order\" \
             FOREIGN KEY (\"order_id\") REFERENCES \"orders\" (\"id\"))"
        );
    }

    #[test]
    fn test_defaults() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.render_default("'x'"), "'x'");
        assert_eq!(dialect.render_default("0"), "0");
        assert_eq!(dialect.render_default("-1.5"), "-1.5");
        assert_eq!(dialect.render_default("CURRENT_TIMESTAMP"), "CURRENT_TIMESTAMP");
        assert_eq!(dialect.render_default("RANDOM_UUID()"), "(RANDOM_UUID())");
        assert_eq!(dialect.render_default("datetime('now')"), "(datetime('now'))");
    }

    #[test]
    fn test_no_deferred_statements() {
        let dialect = SqliteDialect::new();
        let fk = ForeignKeyDescriptor::new("fk", "a", "b", "c");
        assert!(dialect.add_foreign_key("t", &fk).is_none());
        assert!(dialect.restart_counter("t", "id", 10).is_none());
        assert!(dialect
            .restore_auto_increment("t", &column("id", "INT"))
            .is_none());
    }

    #[test]
    fn test_create_index() {
        let dialect = SqliteDialect::new();
        let idx = IndexDescriptor::new("idx_a_b", vec!["a".into(), "b".into()], true);
        assert_eq!(
            dialect.create_index("t", &idx),
            "CREATE UNIQUE INDEX \"idx_a_b\" ON \"t\" (\"a\", \"b\")"
        );
    }
}
