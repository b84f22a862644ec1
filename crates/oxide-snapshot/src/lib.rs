//! Portable database snapshots for test environments.
//!
//! `oxide-snapshot` copies the schema and, optionally, the data of a
//! relational database into an embedded target, where:
//! - Source types are mapped to target types by a pure, table-driven mapper
//! - Column defaults are rewritten from the source dialect (functions, casts)
//! - Rows are copied page by page, each page in its own transaction, with
//!   optional row caps, sampling, validation and anonymization
//! - Index and foreign key failures are warnings, never fatal
//!
//! # Architecture
//!
//! - **Providers** - Async capability interface over each endpoint (SQLite,
//!   PostgreSQL, SQL script output)
//! - **Dialects** - Target-specific DDL and literal rendering (H2, SQLite)
//! - **Schema migrator** - Per-table state machine plus a deferred
//!   foreign key pass
//! - **Data migrator** - Batched, transformed row transfer
//! - **Hooks** - Pluggable stages around the schema and data phases
//! - **Engine** - Orchestrates a run and reports a [`engine::MigrationResult`]
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_snapshot::prelude::*;
//!
//! let mut config = MigrationConfig::default();
//! config.source = DatabaseConfig::new("postgresql").url("postgres://app@localhost/app");
//! config.target = DatabaseConfig::new("sqlite").file("snapshot.db");
//! config.migration.data.max_rows = Some(100);
//!
//! let result = MigrationEngine::new(config).run().await;
//! assert!(result.success, "{}", result.message);
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Snapshot from a configuration file
//! oxide-snapshot --config snapshot.json
//!
//! # Snapshot a PostgreSQL database into SQLite, 100 rows per table
//! oxide-snapshot --source-type postgresql --source-url postgres://app@localhost/app \
//!     --target-type sqlite --target-file snapshot.db --max-rows 100
//!
//! # Print the H2 script instead of writing a database
//! oxide-snapshot --config snapshot.json --dry-run
//! ```

pub mod config;
pub mod data_migrator;
pub mod defaults;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod progress;
pub mod provider;
pub mod schema;
pub mod schema_migrator;
pub mod typemap;
pub mod value;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{
        AnonymizationRule, ConstraintSettings, DataSettings, DatabaseConfig,
        ExistingTablePolicy, MigrationConfig, MigrationSettings, OutputSettings,
    };
    pub use crate::data_migrator::{effective_row_count, DataMigrator};
    pub use crate::defaults::{translate_default, DefaultTranslator};
    pub use crate::dialect::{ColumnDefinition, H2Dialect, SqliteDialect, TargetDialect};
    pub use crate::engine::{ErrorDetail, MigrationEngine, MigrationResult};
    pub use crate::error::{ErrorKind, Result, SnapshotError};
    pub use crate::filter::TableFilter;
    pub use crate::hooks::{
        AutoIncrementToggle, CounterReconciliation, HookContext, MigratedTable, MigrationHook,
    };
    pub use crate::progress::ProgressTracker;
    pub use crate::provider::{
        MetadataProvider, PostgresProvider, ProviderRegistry, ScriptProvider, SqliteProvider,
    };
    pub use crate::schema::{
        ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor,
    };
    pub use crate::schema_migrator::{SchemaMigrator, TableOutcome, TableState};
    pub use crate::typemap::{map_type, TypeMapper, TypeMapping};
    pub use crate::value::{Row, Value};
}
