//! Pluggable stages around the schema and data phases.
//!
//! A hook may adjust a table's working descriptor before its DDL is
//! generated, and may run fix-up statements once every table has been loaded.
//! Fix-up failures are collected as warnings and never fail the run.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ConstraintSettings;
use crate::dialect::{ColumnDefinition, TargetDialect};
use crate::error::{Result, SnapshotError};
use crate::provider::MetadataProvider;
use crate::schema::TableDescriptor;

/// A table that made it through the schema phase.
#[derive(Debug, Clone)]
pub struct MigratedTable {
    /// Descriptor exactly as read from the source.
    pub source: TableDescriptor,
    /// Column definitions the target table was created with.
    pub columns: Vec<ColumnDefinition>,
    /// Highest integer written to each auto-increment column, by column name.
    pub counters: HashMap<String, i64>,
}

impl MigratedTable {
    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Definition of a column, ignoring case.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// What a post-migration hook works with.
pub struct HookContext<'a> {
    /// Target endpoint.
    pub target: &'a mut dyn MetadataProvider,
    /// Target dialect.
    pub dialect: &'a dyn TargetDialect,
    /// Tables created in this run, in creation order.
    pub tables: &'a [MigratedTable],
    warnings: Vec<String>,
}

impl<'a> HookContext<'a> {
    /// Creates a context.
    pub fn new(
        target: &'a mut dyn MetadataProvider,
        dialect: &'a dyn TargetDialect,
        tables: &'a [MigratedTable],
    ) -> Self {
        Self {
            target,
            dialect,
            tables,
            warnings: Vec::new(),
        }
    }

    /// Runs a fix-up statement, recording a warning instead of failing.
    pub async fn execute_or_warn(&mut self, sql: &str) -> bool {
        match self.target.execute(sql).await {
            Ok(_) => {
                debug!(sql = %sql, "Post-migration statement applied");
                true
            }
            Err(e) => {
                let err = SnapshotError::PostMigration(format!("{sql}: {e}"));
                warn!(error = %err, "Post-migration statement failed");
                self.warnings.push(err.to_string());
                false
            }
        }
    }

    /// Records a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Consumes the context, returning its warnings.
    #[must_use]
    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}

/// A stage around table creation and loading.
#[async_trait]
pub trait MigrationHook: Send + Sync {
    /// Hook name, used in logs.
    fn name(&self) -> &'static str;

    /// Adjusts the working descriptor before DDL is generated for `dialect`.
    fn prepare_table(&self, _table: &mut TableDescriptor, _dialect: &dyn TargetDialect) {}

    /// Runs after the data phase.
    async fn after_data(&self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Creates auto-increment columns without the marker so explicit source
/// values load verbatim, then turns the marker back on.
///
/// Does nothing for dialects that load explicit keys with the marker on.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoIncrementToggle;

#[async_trait]
impl MigrationHook for AutoIncrementToggle {
    fn name(&self) -> &'static str {
        "auto-increment-toggle"
    }

    fn prepare_table(&self, table: &mut TableDescriptor, dialect: &dyn TargetDialect) {
        if !dialect.suppresses_auto_increment() {
            return;
        }
        for column in &mut table.columns {
            if column.auto_increment {
                debug!(table = %table.name, column = %column.name, "Suppressing auto-increment");
                column.auto_increment = false;
            }
        }
    }

    async fn after_data(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        let tables = ctx.tables;
        for table in tables {
            for source_column in table.source.auto_increment_columns() {
                let Some(created) = table.column(&source_column.name) else {
                    continue;
                };
                if created.auto_increment {
                    continue;
                }
                match ctx.dialect.restore_auto_increment(table.name(), created) {
                    Some(sql) => {
                        ctx.execute_or_warn(&sql).await;
                    }
                    None => {
                        let err = SnapshotError::PostMigration(format!(
                            "auto-increment on {}.{} cannot be restored in {}",
                            table.name(),
                            created.name,
                            ctx.dialect.name()
                        ));
                        warn!(error = %err, "Auto-increment left off");
                        ctx.warn(err.to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Moves each auto-increment counter past the highest value loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterReconciliation;

#[async_trait]
impl MigrationHook for CounterReconciliation {
    fn name(&self) -> &'static str {
        "counter-reconciliation"
    }

    async fn after_data(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        let tables = ctx.tables;
        for table in tables {
            let mut counters: Vec<(&String, &i64)> = table.counters.iter().collect();
            counters.sort();
            for (column, max) in counters {
                let Some(next) = max.checked_add(1) else {
                    ctx.warn(format!(
                        "Counter for {}.{column} is already at its maximum",
                        table.name()
                    ));
                    continue;
                };
                if let Some(sql) = ctx.dialect.restart_counter(table.name(), column, next) {
                    ctx.execute_or_warn(&sql).await;
                }
            }
        }
        Ok(())
    }
}

/// Hooks implied by the constraint settings, in the order they run.
#[must_use]
pub fn default_hooks(
    constraints: &ConstraintSettings,
    preserve_data: bool,
) -> Vec<Box<dyn MigrationHook>> {
    let mut hooks: Vec<Box<dyn MigrationHook>> = Vec::new();
    if constraints.disable_auto_increment_during_migration {
        hooks.push(Box::new(AutoIncrementToggle));
    }
    if constraints.preserve_sequences && preserve_data {
        hooks.push(Box::new(CounterReconciliation));
    }
    hooks
}
