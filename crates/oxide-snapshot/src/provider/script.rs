//! Script provider.
//!
//! A write-only target that renders every statement into a SQL script, either
//! a file or stdout. This is how a snapshot is produced for engines that have
//! no native Rust driver, and it doubles as the dry-run target.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::dialect::{self, TargetDialect};
use crate::error::{Result, SnapshotError};
use crate::schema::TableDescriptor;
use crate::value::Row;

use super::MetadataProvider;

/// Writes statements as `;`-terminated lines.
pub struct ScriptProvider {
    path: Option<PathBuf>,
    dialect: Box<dyn TargetDialect>,
    out: Option<Box<dyn Write + Send>>,
    statements: u64,
}

impl ScriptProvider {
    /// Creates a provider from connection settings. Does not open the output.
    ///
    /// Without a `file` the script goes to stdout.
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            path: config.file.clone(),
            dialect: dialect::for_name(config.dialect.as_deref().unwrap_or("h2")),
            out: None,
            statements: 0,
        }
    }

    /// Number of statements written so far.
    #[must_use]
    pub fn statements(&self) -> u64 {
        self.statements
    }

    fn write_statement(&mut self, sql: &str) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| SnapshotError::NotConnected("script".to_string()))?;
        writeln!(out, "{sql};")?;
        self.statements += 1;
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for ScriptProvider {
    async fn connect(&mut self) -> Result<()> {
        if self.out.is_some() {
            return Ok(());
        }
        let mut out: Box<dyn Write + Send> = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Box::new(BufWriter::new(File::create(path)?))
            }
            None => Box::new(BufWriter::new(io::stdout())),
        };
        writeln!(out, "-- oxide-snapshot script ({})", self.dialect.name())?;
        debug!(path = ?self.path, dialect = self.dialect.name(), "Opened script output");
        self.out = Some(out);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            debug!(statements = self.statements(), "Closed script output");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.out.is_some()
    }

    fn sees_existing_tables(&self) -> bool {
        false
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn describe_table(&mut self, name: &str) -> Result<TableDescriptor> {
        Ok(TableDescriptor::new(name))
    }

    async fn row_count(&mut self, _name: &str) -> Result<u64> {
        Ok(0)
    }

    async fn fetch_page(&mut self, _name: &str, _limit: u64, _offset: u64) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.write_statement(sql)?;
        Ok(0)
    }

    async fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    async fn insert_rows(&mut self, table: &str, columns: &[String], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = self.dialect.insert(table, columns, rows);
        self.write_statement(&sql)?;
        Ok(rows.len() as u64)
    }

    fn dialect_name(&self) -> &str {
        self.dialect.name()
    }

    async fn engine_version(&mut self) -> Result<String> {
        Ok(format!("script ({})", self.dialect.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[tokio::test]
    async fn test_writes_statements_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("snapshot.sql");
        let mut provider = ScriptProvider::new(&DatabaseConfig::new("script").file(&path));

        provider.connect().await.unwrap();
        provider.execute("CREATE TABLE t (id INT)").await.unwrap();
        let n = provider
            .insert_rows("t", &["id".into()], &[vec![Value::Int(1)], vec![Value::Int(2)]])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(provider.statements(), 2);
        provider.disconnect().await.unwrap();

        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("-- oxide-snapshot script (h2)"));
        assert!(script.contains("CREATE TABLE t (id INT);\n"));
        assert!(script.contains("INSERT INTO t (id) VALUES (1), (2);\n"));
    }

    #[tokio::test]
    async fn test_reports_empty_target() {
        let mut provider = ScriptProvider::new(&DatabaseConfig::new("script"));
        assert!(provider.list_tables().await.unwrap().is_empty());
        assert!(!provider.table_exists("t").await.unwrap());
        assert!(provider.index_names("t").await.unwrap().is_empty());
        assert!(!provider.sees_existing_tables());
    }

    #[tokio::test]
    async fn test_execute_requires_connect() {
        let mut provider = ScriptProvider::new(&DatabaseConfig::new("script"));
        assert!(provider.execute("SELECT 1").await.is_err());
    }
}
