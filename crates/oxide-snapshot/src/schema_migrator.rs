//! Schema migration.
//!
//! Each table walks `NotStarted -> MetadataFetched -> DdlGenerated ->
//! TableCreated -> IndexesApplied -> Done`, and any failing step leaves it
//! `Failed`. Foreign keys are added in a separate pass once every table in
//! the run exists, so creation order never matters.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{ExistingTablePolicy, MigrationSettings};
use crate::defaults::DefaultTranslator;
use crate::dialect::{ColumnDefinition, TargetDialect};
use crate::error::{Result, SnapshotError};
use crate::hooks::{MigratedTable, MigrationHook};
use crate::provider::MetadataProvider;
use crate::schema::{ForeignKeyDescriptor, TableDescriptor};
use crate::typemap::{TypeMapper, TypeMapping};

/// Progress of one table through the schema phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Nothing done yet.
    NotStarted,
    /// Source descriptor read.
    MetadataFetched,
    /// `CREATE TABLE` rendered.
    DdlGenerated,
    /// Table exists on the target.
    TableCreated,
    /// Secondary indexes attempted.
    IndexesApplied,
    /// Finished.
    Done,
    /// A step failed.
    Failed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::MetadataFetched => "metadata fetched",
            Self::DdlGenerated => "DDL generated",
            Self::TableCreated => "table created",
            Self::IndexesApplied => "indexes applied",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of running the schema phase for one table.
#[derive(Debug, Clone)]
pub enum TableOutcome {
    /// The table was created.
    Created {
        /// The created table.
        table: MigratedTable,
        /// Index and type mapping warnings.
        warnings: Vec<String>,
    },
    /// An existing target table was left alone.
    Skipped {
        /// Table name.
        name: String,
    },
}

/// Result of the deferred foreign key pass.
#[derive(Debug, Clone, Default)]
pub struct ForeignKeyReport {
    /// Constraints added.
    pub applied: usize,
    /// Constraints skipped or rejected.
    pub skipped: usize,
    /// Why constraints were skipped or rejected.
    pub warnings: Vec<String>,
}

struct TableRun<'n> {
    name: &'n str,
    state: TableState,
}

impl<'n> TableRun<'n> {
    fn new(name: &'n str) -> Self {
        Self {
            name,
            state: TableState::NotStarted,
        }
    }

    fn advance(&mut self, state: TableState) {
        debug!(table = %self.name, from = %self.state, to = %state, "Table state");
        self.state = state;
    }

    /// Moves to `Failed`, naming the last state reached in the error.
    fn fail(&mut self, err: SnapshotError) -> SnapshotError {
        let reached = self.state;
        self.state = TableState::Failed;
        match err {
            e @ SnapshotError::Connectivity { .. } => e,
            other => SnapshotError::Schema {
                table: self.name.to_string(),
                message: format!("after {reached}: {other}"),
            },
        }
    }
}

/// Creates target tables from source descriptors.
pub struct SchemaMigrator<'a> {
    settings: &'a MigrationSettings,
    mapper: TypeMapper,
    translator: DefaultTranslator,
    dialect: &'a dyn TargetDialect,
    hooks: &'a [Box<dyn MigrationHook>],
    run_tables: HashSet<String>,
}

impl<'a> SchemaMigrator<'a> {
    /// Creates a migrator translating from `source_dialect`.
    pub fn new(
        settings: &'a MigrationSettings,
        source_dialect: &str,
        dialect: &'a dyn TargetDialect,
        hooks: &'a [Box<dyn MigrationHook>],
    ) -> Self {
        Self {
            settings,
            mapper: TypeMapper::new(settings),
            translator: DefaultTranslator::new(source_dialect, &settings.function_mappings),
            dialect,
            hooks,
            run_tables: HashSet::new(),
        }
    }

    /// Sets the tables selected for this run.
    ///
    /// Inline foreign keys are only declared against these, minus any marked
    /// failed, or against tables already on the target.
    #[must_use]
    pub fn with_run_tables(mut self, tables: &[String]) -> Self {
        self.run_tables = tables.iter().map(|t| t.to_lowercase()).collect();
        self
    }

    /// Drops a table that failed from the run, so later tables no longer
    /// declare inline foreign keys against it.
    pub fn mark_failed(&mut self, name: &str) {
        self.run_tables.remove(&name.to_lowercase());
    }

    /// Maps every column of a table, returning the definitions and any
    /// mapping warnings.
    #[must_use]
    pub fn column_definitions(&self, table: &TableDescriptor) -> (Vec<ColumnDefinition>, Vec<String>) {
        let mut warnings = Vec::new();
        let columns = table
            .columns
            .iter()
            .map(|column| {
                let mapping = self.mapper.map(&column.type_name, column.size);
                if let Some(warning) = mapping.warning {
                    warn!(table = %table.name, column = %column.name, "{warning}");
                    warnings.push(format!("{}.{}: {warning}", table.name, column.name));
                }
                ColumnDefinition {
                    name: column.name.clone(),
                    target_type: mapping.target_type,
                    nullable: column.nullable && !table.is_primary_key(&column.name),
                    default: if column.auto_increment {
                        None
                    } else {
                        self.translator.translate(column.default.as_deref())
                    },
                    auto_increment: column.auto_increment,
                }
            })
            .collect();
        (columns, warnings)
    }

    /// Runs the schema phase for one table.
    pub async fn migrate_table(
        &self,
        source: &mut dyn MetadataProvider,
        target: &mut dyn MetadataProvider,
        name: &str,
    ) -> Result<TableOutcome> {
        let mut run = TableRun::new(name);

        let descriptor = source.describe_table(name).await.map_err(|e| run.fail(e))?;
        run.advance(TableState::MetadataFetched);

        let mut working = descriptor.clone();
        for hook in self.hooks {
            hook.prepare_table(&mut working, self.dialect);
        }

        let (columns, mut warnings) = self.column_definitions(&working);
        let inline_fks = self.inline_foreign_keys(target, &working).await;
        let ddl = self.dialect.create_table(
            &working.name,
            &columns,
            &working.primary_key,
            &inline_fks,
        );
        run.advance(TableState::DdlGenerated);

        let existing = self
            .existing_table(target, name)
            .await
            .map_err(|e| run.fail(e))?;
        if existing.is_none()
            && !target.sees_existing_tables()
            && self.settings.existing_tables == ExistingTablePolicy::Replace
        {
            target
                .execute(&self.dialect.drop_table_if_exists(&working.name))
                .await
                .map_err(|e| run.fail(e))?;
        }
        if let Some(existing) = existing {
            match self.settings.existing_tables {
                ExistingTablePolicy::Replace => {
                    info!(table = %name, "Replacing existing target table");
                    target
                        .execute(&self.dialect.drop_table(&existing))
                        .await
                        .map_err(|e| run.fail(e))?;
                }
                ExistingTablePolicy::Skip => {
                    info!(table = %name, "Target table exists, skipping");
                    return Ok(TableOutcome::Skipped {
                        name: name.to_string(),
                    });
                }
                ExistingTablePolicy::Fail => {
                    return Err(run.fail(SnapshotError::Schema {
                        table: name.to_string(),
                        message: "table already exists in target".to_string(),
                    }));
                }
            }
        }

        debug!(table = %name, sql = %ddl, "Creating table");
        target.execute(&ddl).await.map_err(|e| run.fail(e))?;
        run.advance(TableState::TableCreated);

        if self.settings.constraints.preserve_indexes {
            warnings.extend(self.apply_indexes(target, &working, &columns).await);
        }
        run.advance(TableState::IndexesApplied);

        run.advance(TableState::Done);
        info!(table = %name, columns = columns.len(), "Created table");

        Ok(TableOutcome::Created {
            table: MigratedTable {
                source: descriptor,
                columns,
                counters: std::collections::HashMap::new(),
            },
            warnings,
        })
    }

    /// Adds foreign keys for every created table.
    ///
    /// Nothing here fails the run: each rejected or skipped constraint
    /// becomes a warning.
    pub async fn apply_foreign_keys(
        &self,
        target: &mut dyn MetadataProvider,
        tables: &[MigratedTable],
    ) -> ForeignKeyReport {
        let mut report = ForeignKeyReport::default();
        if !self.settings.constraints.preserve_foreign_keys || self.dialect.inline_foreign_keys() {
            return report;
        }

        let created: HashSet<String> = tables.iter().map(|t| t.name().to_lowercase()).collect();

        for table in tables {
            if table.source.foreign_keys.is_empty() {
                continue;
            }
            let existing = match target.constraint_names(table.name()).await {
                Ok(names) => names,
                Err(e) => {
                    debug!(table = %table.name(), error = %e, "Could not list constraints");
                    Vec::new()
                }
            };

            for fk in &table.source.foreign_keys {
                if existing.iter().any(|n| n.eq_ignore_ascii_case(&fk.name)) {
                    debug!(table = %table.name(), constraint = %fk.name, "Constraint already present");
                    report.skipped += 1;
                    continue;
                }

                let referenced = fk.referenced_table.to_lowercase();
                let present = created.contains(&referenced)
                    || target
                        .table_exists(&fk.referenced_table)
                        .await
                        .unwrap_or(false);
                if !present {
                    let err = self.constraint_error(
                        table.name(),
                        &fk.name,
                        format!("referenced table '{}' is not in the target", fk.referenced_table),
                    );
                    warn!(error = %err, "Skipping foreign key");
                    report.warnings.push(err.to_string());
                    report.skipped += 1;
                    continue;
                }

                let Some(sql) = self.dialect.add_foreign_key(table.name(), fk) else {
                    report.skipped += 1;
                    continue;
                };
                match target.execute(&sql).await {
                    Ok(_) => {
                        debug!(table = %table.name(), constraint = %fk.name, "Added foreign key");
                        report.applied += 1;
                    }
                    Err(e) => {
                        let err = self.constraint_error(table.name(), &fk.name, e.to_string());
                        warn!(error = %err, "Foreign key rejected");
                        report.warnings.push(err.to_string());
                        report.skipped += 1;
                    }
                }
            }
        }

        info!(applied = report.applied, skipped = report.skipped, "Foreign key pass complete");
        report
    }

    async fn existing_table(
        &self,
        target: &mut dyn MetadataProvider,
        name: &str,
    ) -> Result<Option<String>> {
        Ok(target
            .list_tables()
            .await?
            .into_iter()
            .find(|t| t.eq_ignore_ascii_case(name)))
    }

    async fn inline_foreign_keys(
        &self,
        target: &mut dyn MetadataProvider,
        table: &TableDescriptor,
    ) -> Vec<ForeignKeyDescriptor> {
        if !self.dialect.inline_foreign_keys() || !self.settings.constraints.preserve_foreign_keys {
            return Vec::new();
        }

        let mut kept = Vec::with_capacity(table.foreign_keys.len());
        for fk in &table.foreign_keys {
            let known = self.run_tables.contains(&fk.referenced_table.to_lowercase())
                || fk.referenced_table.eq_ignore_ascii_case(&table.name)
                || target
                    .table_exists(&fk.referenced_table)
                    .await
                    .unwrap_or(false);
            if known {
                kept.push(fk.clone());
            } else {
                warn!(
                    table = %table.name,
                    constraint = %fk.name,
                    referenced = %fk.referenced_table,
                    "Dropping foreign key to a table outside the snapshot"
                );
            }
        }
        kept
    }

    async fn apply_indexes(
        &self,
        target: &mut dyn MetadataProvider,
        table: &TableDescriptor,
        columns: &[ColumnDefinition],
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        if table.indexes.is_empty() {
            return warnings;
        }

        let existing = match target.index_names(&table.name).await {
            Ok(names) => names,
            Err(e) => {
                debug!(table = %table.name, error = %e, "Could not list indexes");
                Vec::new()
            }
        };

        for index in &table.indexes {
            if existing.iter().any(|n| n.eq_ignore_ascii_case(&index.name)) {
                debug!(table = %table.name, index = %index.name, "Index already present");
                continue;
            }

            let unindexable = index.columns.iter().find(|name| {
                columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .is_none_or(|c| {
                        TypeMapping {
                            target_type: c.target_type.clone(),
                            warning: None,
                        }
                        .is_large_object()
                    })
            });
            if let Some(column) = unindexable {
                let err = self.constraint_error(
                    &table.name,
                    &index.name,
                    format!("column '{column}' cannot be indexed"),
                );
                warn!(error = %err, "Skipping index");
                warnings.push(err.to_string());
                continue;
            }

            let sql = self.dialect.create_index(&table.name, index);
            match target.execute(&sql).await {
                Ok(_) => debug!(table = %table.name, index = %index.name, "Created index"),
                Err(e) => {
                    let err = self.constraint_error(&table.name, &index.name, e.to_string());
                    warn!(error = %err, "Index rejected");
                    warnings.push(err.to_string());
                }
            }
        }
        warnings
    }

    fn constraint_error(&self, table: &str, name: &str, message: String) -> SnapshotError {
        SnapshotError::Constraint {
            table: table.to_string(),
            name: name.to_string(),
            message,
        }
    }
}
