#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use oxide_snapshot::prelude::*;
use oxide_snapshot::provider::SqliteProvider;

/// Everything a [`MemoryProvider`] knows, shared with the test body.
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Tables served as a source, in listing order.
    pub tables: Vec<TableDescriptor>,
    /// Committed rows per table.
    pub rows: HashMap<String, Vec<Row>>,
    /// Every statement executed, in order.
    pub statements: Vec<String>,
    /// Tables created through `execute`.
    pub created: Vec<String>,
    /// Constraint names added per table.
    pub constraints: HashMap<String, Vec<String>>,
    /// Index names created per table.
    pub indexes: HashMap<String, Vec<String>>,
    /// Statements containing any of these fragments are rejected.
    pub fail_on: Vec<String>,
    /// Fail `connect`.
    pub unreachable: bool,
    pub connected: bool,
    pub connects: usize,
    pub rollbacks: usize,
    pending: Vec<(String, Row)>,
    in_transaction: bool,
}

/// Recording provider for engine-level tests.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    state: Arc<Mutex<MemoryState>>,
    dialect: &'static str,
}

impl MemoryProvider {
    pub fn new(dialect: &'static str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            dialect,
        }
    }

    pub fn with_table(self, table: TableDescriptor, rows: Vec<Row>) -> Self {
        {
            let mut state = self.state();
            state.rows.insert(table.name.to_lowercase(), rows);
            state.tables.push(table);
        }
        self
    }

    pub fn failing_on(self, fragment: &str) -> Self {
        self.state().fail_on.push(fragment.to_string());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state()
            .rows
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn reject(state: &MemoryState, sql: &str) -> Result<()> {
        if state.fail_on.iter().any(|f| sql.contains(f.as_str())) {
            return Err(SnapshotError::Io(std::io::Error::other(format!(
                "rejected: {sql}"
            ))));
        }
        Ok(())
    }
}

fn name_after<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = sql.strip_prefix(prefix)?;
    let end = rest.find([' ', '(']).unwrap_or(rest.len());
    Some(rest[..end].trim_matches('"'))
}

#[async_trait]
impl MetadataProvider for MemoryProvider {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.unreachable {
            return Err(SnapshotError::Io(std::io::Error::other("connection refused")));
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let state = self.state();
        let mut names: Vec<String> = state.tables.iter().map(|t| t.name.clone()).collect();
        names.extend(state.created.iter().cloned());
        Ok(names)
    }

    async fn describe_table(&mut self, name: &str) -> Result<TableDescriptor> {
        self.state()
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| SnapshotError::Schema {
                table: name.to_string(),
                message: "table not found".to_string(),
            })
    }

    async fn row_count(&mut self, name: &str) -> Result<u64> {
        Ok(self.rows(name).len() as u64)
    }

    async fn fetch_page(&mut self, name: &str, limit: u64, offset: u64) -> Result<Vec<Row>> {
        Ok(self
            .rows(name)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut state = self.state();
        state.statements.push(sql.to_string());
        Self::reject(&state, sql)?;

        if let Some(table) = name_after(sql, "CREATE TABLE ") {
            let table = table.to_string();
            state.created.push(table);
        } else if let Some(table) = name_after(sql, "DROP TABLE ") {
            let table = table.to_lowercase();
            state.created.retain(|t| t.to_lowercase() != table);
        } else if let Some(table) = name_after(sql, "ALTER TABLE ") {
            let table = table.to_string();
            if let Some(constraint) = sql
                .split_once(" ADD CONSTRAINT ")
                .and_then(|(_, rest)| rest.split_whitespace().next())
            {
                let constraint = constraint.trim_matches('"').to_string();
                state.constraints.entry(table).or_default().push(constraint);
            }
        } else if let Some(index) = name_after(sql, "CREATE INDEX ")
            .or_else(|| name_after(sql, "CREATE UNIQUE INDEX "))
        {
            let index = index.to_string();
            if let Some(table) = sql.split_once(" ON ").and_then(|(_, rest)| name_after(rest, "")) {
                let table = table.to_string();
                state.indexes.entry(table).or_default().push(index);
            }
        }
        Ok(0)
    }

    async fn begin(&mut self) -> Result<()> {
        self.state().in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        for (table, row) in pending {
            state.rows.entry(table).or_default().push(row);
        }
        state.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut state = self.state();
        state.pending.clear();
        state.in_transaction = false;
        state.rollbacks += 1;
        Ok(())
    }

    async fn insert_rows(&mut self, table: &str, _columns: &[String], rows: &[Row]) -> Result<u64> {
        let mut state = self.state();
        Self::reject(&state, &format!("INSERT INTO {table}"))?;
        let key = table.to_lowercase();
        if state.in_transaction {
            state
                .pending
                .extend(rows.iter().map(|r| (key.clone(), r.clone())));
        } else {
            state.rows.entry(key).or_default().extend(rows.iter().cloned());
        }
        Ok(rows.len() as u64)
    }

    fn dialect_name(&self) -> &str {
        self.dialect
    }

    async fn engine_version(&mut self) -> Result<String> {
        Ok("memory".to_string())
    }

    async fn index_names(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self.state().indexes.get(table).cloned().unwrap_or_default())
    }

    async fn constraint_names(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .constraints
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}

/// Configuration with a server source and a script target; the engine is
/// given the providers directly.
pub fn memory_config() -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.source = DatabaseConfig::new("postgresql").url("postgres://tester@memory/source");
    config.target = DatabaseConfig::new("script");
    config
}

/// Configuration between two SQLite files.
pub fn sqlite_config(source: &Path, target: &Path) -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.source = DatabaseConfig::new("sqlite").file(source);
    config.target = DatabaseConfig::new("sqlite").file(target);
    config
}

/// Runs statements against a SQLite file, creating it if needed.
pub async fn seed_sqlite(path: &Path, statements: &[&str]) {
    let mut db = SqliteProvider::open(path);
    db.connect().await.unwrap();
    for sql in statements {
        db.execute(sql).await.unwrap();
    }
    db.disconnect().await.unwrap();
}

/// Opens a SQLite file for assertions.
pub async fn open_sqlite(path: &Path) -> SqliteProvider {
    let mut db = SqliteProvider::open(path);
    db.connect().await.unwrap();
    db
}

/// A small shop schema: `orders` references `users` and is listed first.
pub fn shop_source() -> MemoryProvider {
    let users = TableDescriptor::new("users")
        .column(ColumnDescriptor::new("id", "int4").not_null().auto_increment())
        .column(ColumnDescriptor::new("email", "varchar").size(255).not_null())
        .column(ColumnDescriptor::new("bio", "text").size(2_147_483_647))
        .primary_key(vec!["id".into()])
        .index(IndexDescriptor::new("idx_users_email", vec!["email".into()], true))
        .index(IndexDescriptor::new("idx_users_bio", vec!["bio".into()], false));
    let orders = TableDescriptor::new("orders")
        .column(ColumnDescriptor::new("id", "int8").not_null().auto_increment())
        .column(ColumnDescriptor::new("user_id", "int4").not_null())
        .column(
            ColumnDescriptor::new("status", "varchar")
                .size(20)
                .default("'new'::character varying"),
        )
        .primary_key(vec!["id".into()])
        .foreign_key(ForeignKeyDescriptor::new(
            "fk_orders_user",
            "user_id",
            "users",
            "id",
        ));

    MemoryProvider::new("postgresql")
        .with_table(
            orders,
            vec![
                vec![Value::Int(100), Value::Int(1), Value::from("new")],
                vec![Value::Int(101), Value::Int(2), Value::from("paid")],
            ],
        )
        .with_table(
            users,
            vec![
                vec![Value::Int(1), Value::from("a@x.io"), Value::Null],
                vec![Value::Int(2), Value::from("b@x.io"), Value::from("hi")],
                vec![Value::Int(7), Value::from("c@x.io"), Value::Null],
            ],
        )
}
