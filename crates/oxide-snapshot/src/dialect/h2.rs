//! H2 dialect.
//!
//! The canonical snapshot format. Identifiers are left bare unless H2 would
//! reject them, so the generated DDL reads like hand-written H2 scripts.

use super::{ColumnDefinition, TargetDialect};

/// Words H2 refuses as bare identifiers.
const RESERVED: &[&str] = &[
    "ALL", "AND", "ANY", "ARRAY", "AS", "ASYMMETRIC", "AUTHORIZATION", "BETWEEN", "BOTH", "CASE",
    "CAST", "CHECK", "CONSTRAINT", "CROSS", "CURRENT_CATALOG", "CURRENT_DATE", "CURRENT_PATH",
    "CURRENT_ROLE", "CURRENT_SCHEMA", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DAY",
    "DEFAULT", "DISTINCT", "ELSE", "END", "EXCEPT", "EXISTS", "FALSE", "FETCH", "FOR", "FOREIGN",
    "FROM", "FULL", "GROUP", "GROUPS", "HAVING", "HOUR", "IF", "ILIKE", "IN", "INNER",
    "INTERSECT", "INTERVAL", "IS", "JOIN", "KEY", "LEADING", "LEFT", "LIKE", "LIMIT",
    "LOCALTIME", "LOCALTIMESTAMP", "MINUS", "MINUTE", "MONTH", "NATURAL", "NOT", "NULL",
    "OFFSET", "ON", "OR", "ORDER", "OVER", "PARTITION", "PRIMARY", "QUALIFY", "RANGE", "REGEXP",
    "RIGHT", "ROW", "ROWNUM", "ROWS", "SECOND", "SELECT", "SESSION_USER", "SET", "SOME",
    "SYMMETRIC", "SYSTEM_USER", "TABLE", "TO", "TOP", "TRAILING", "TRUE", "UESCAPE", "UNION",
    "UNIQUE", "UNKNOWN", "USER", "USING", "VALUE", "VALUES", "WHEN", "WHERE", "WINDOW", "WITH",
    "YEAR", "_ROWID_",
];

/// H2 target dialect.
#[derive(Debug, Clone, Default)]
pub struct H2Dialect;

impl H2Dialect {
    /// Creates a new H2 dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn needs_quotes(name: &str) -> bool {
        let mut chars = name.chars();
        let plain = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        !plain || RESERVED.contains(&name.to_ascii_uppercase().as_str())
    }
}

impl TargetDialect for H2Dialect {
    fn name(&self) -> &'static str {
        "h2"
    }

    fn quote_identifier(&self, name: &str) -> String {
        if Self::needs_quotes(name) {
            format!("\"{}\"", name.replace('"', "\"\""))
        } else {
            name.to_string()
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn drop_table_if_exists(&self, table: &str) -> String {
        // Foreign keys in other tables that reference it go with it.
        format!("DROP TABLE IF EXISTS {} CASCADE", self.quote_identifier(table))
    }

    fn restore_auto_increment(&self, table: &str, column: &ColumnDefinition) -> Option<String> {
        let restored = ColumnDefinition {
            auto_increment: true,
            default: None,
            ..column.clone()
        };
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(&restored)
        ))
    }

    fn restart_counter(&self, table: &str, column: &str, next: i64) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} RESTART WITH {}",
            self.quote_identifier(table),
            self.quote_identifier(column),
            next
        ))
    }
}
