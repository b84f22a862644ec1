//! Metadata providers.
//!
//! A provider is the only thing that talks to a database. Source and target
//! are accessed through the same [`MetadataProvider`] shape; dialect-specific
//! pagination and parameter binding stay behind it.

mod postgres;
mod script;
mod sqlite;

pub use postgres::PostgresProvider;
pub use script::ScriptProvider;
pub use sqlite::SqliteProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::error::{Result, SnapshotError};
use crate::schema::TableDescriptor;
use crate::value::Row;

/// Capability interface over one database endpoint.
#[async_trait]
pub trait MetadataProvider: Send {
    /// Opens the connection. Calling it again while connected is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the connection, rolling back any open transaction.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether `connect` has succeeded and `disconnect` has not been called.
    fn is_connected(&self) -> bool;

    /// Names of the user tables.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Whether `list_tables` shows what already exists where the output lands.
    ///
    /// A script cannot see the database it will later be loaded into.
    fn sees_existing_tables(&self) -> bool {
        true
    }

    /// Reads the full structure of one table.
    async fn describe_table(&mut self, name: &str) -> Result<TableDescriptor>;

    /// Number of rows in a table.
    async fn row_count(&mut self, name: &str) -> Result<u64>;

    /// Reads up to `limit` rows starting at `offset`, in a stable order.
    ///
    /// Values follow the column order of [`MetadataProvider::describe_table`].
    async fn fetch_page(&mut self, name: &str, limit: u64, offset: u64) -> Result<Vec<Row>>;

    /// Executes one DDL or DML statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Starts a transaction; statements run inside it until commit or rollback.
    async fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction. A no-op when none is open.
    async fn rollback(&mut self) -> Result<()>;

    /// Inserts rows, returning how many were written.
    async fn insert_rows(&mut self, table: &str, columns: &[String], rows: &[Row]) -> Result<u64>;

    /// Dialect of this endpoint, e.g. "postgresql", "sqlite", "h2".
    fn dialect_name(&self) -> &str;

    /// Server or library version.
    async fn engine_version(&mut self) -> Result<String>;

    /// Whether a table exists, ignoring case.
    async fn table_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self
            .list_tables()
            .await?
            .iter()
            .any(|t| t.eq_ignore_ascii_case(name)))
    }

    /// Index names present on a table.
    async fn index_names(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .describe_table(table)
            .await?
            .indexes
            .into_iter()
            .map(|i| i.name)
            .collect())
    }

    /// Foreign key constraint names present on a table.
    async fn constraint_names(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .describe_table(table)
            .await?
            .foreign_keys
            .into_iter()
            .map(|fk| fk.name)
            .collect())
    }
}

/// Builds a provider from its connection settings.
pub type ProviderFactory =
    Arc<dyn Fn(&DatabaseConfig) -> Result<Box<dyn MetadataProvider>> + Send + Sync>;

/// Maps provider type names to factories.
///
/// Populated explicitly at startup; nothing registers itself.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in providers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("sqlite", |c| Ok(Box::new(SqliteProvider::new(c))))
            .register("postgres", |c| Ok(Box::new(PostgresProvider::new(c))))
            .register("postgresql", |c| Ok(Box::new(PostgresProvider::new(c))))
            .register("script", |c| Ok(Box::new(ScriptProvider::new(c))));
        registry
    }

    /// Registers a factory. Registering a name again replaces the factory.
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&DatabaseConfig) -> Result<Box<dyn MetadataProvider>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.trim().to_lowercase(), Arc::new(factory));
        self
    }

    /// Whether a type name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_lowercase())
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Creates a provider for `config`. Does not connect.
    pub fn create(&self, config: &DatabaseConfig) -> Result<Box<dyn MetadataProvider>> {
        let factory = self.factories.get(&config.kind()).ok_or_else(|| {
            SnapshotError::Configuration(format!(
                "Unsupported database type '{}' (supported: {})",
                config.r#type,
                self.names().join(", ")
            ))
        })?;
        factory(config)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("names", &self.names())
            .finish()
    }
}
