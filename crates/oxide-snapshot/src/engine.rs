//! Migration engine.
//!
//! Runs one snapshot end to end: connect both endpoints, select tables, create
//! them, add foreign keys, copy rows, run post-migration hooks, and always
//! disconnect. The outcome is a [`MigrationResult`]; `run` never returns an
//! error itself.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::data_migrator::DataMigrator;
use crate::dialect::{self, TargetDialect};
use crate::error::{ErrorKind, Result, SnapshotError};
use crate::filter::TableFilter;
use crate::hooks::{default_hooks, HookContext, MigratedTable, MigrationHook};
use crate::progress::ProgressTracker;
use crate::provider::{MetadataProvider, ProviderRegistry};
use crate::schema_migrator::{SchemaMigrator, TableOutcome};

/// The failure that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl From<&SnapshotError> for ErrorDetail {
    fn from(err: &SnapshotError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    /// Whether the run finished without a fatal failure.
    pub success: bool,
    /// Summary line.
    pub message: String,
    /// Identifier of the target.
    pub target: String,
    /// Tables created and loaded.
    pub tables_migrated: usize,
    /// Tables skipped after a schema or data failure.
    pub failed_tables: Vec<String>,
    /// Rows written across all tables.
    pub rows_migrated: u64,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// Wall-clock duration.
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// The fatal failure, if any.
    pub error: Option<ErrorDetail>,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

impl MigrationResult {
    /// Renders the result as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
struct RunSummary {
    tables_migrated: usize,
    failed_tables: Vec<String>,
    rows_migrated: u64,
    warnings: Vec<String>,
}

/// Runs a snapshot from a configuration.
pub struct MigrationEngine {
    config: MigrationConfig,
    registry: ProviderRegistry,
    source: Option<Box<dyn MetadataProvider>>,
    target: Option<Box<dyn MetadataProvider>>,
    hooks: Vec<Box<dyn MigrationHook>>,
}

impl MigrationEngine {
    /// Creates an engine using the built-in providers.
    #[must_use]
    pub fn new(config: MigrationConfig) -> Self {
        Self::with_registry(config, ProviderRegistry::with_defaults())
    }

    /// Creates an engine resolving providers from `registry`.
    #[must_use]
    pub fn with_registry(config: MigrationConfig, registry: ProviderRegistry) -> Self {
        Self {
            config,
            registry,
            source: None,
            target: None,
            hooks: Vec::new(),
        }
    }

    /// Creates an engine over already-built providers.
    #[must_use]
    pub fn with_providers(
        config: MigrationConfig,
        source: Box<dyn MetadataProvider>,
        target: Box<dyn MetadataProvider>,
    ) -> Self {
        Self {
            source: Some(source),
            target: Some(target),
            ..Self::new(config)
        }
    }

    /// Adds a hook that runs after the built-in ones.
    #[must_use]
    pub fn with_hook(mut self, hook: Box<dyn MigrationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// The configuration this engine runs with.
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Runs the snapshot.
    pub async fn run(mut self) -> MigrationResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let target_id = self.config.target.identifier();
        let mut summary = RunSummary::default();

        info!(
            source = %self.config.source.identifier(),
            target = %target_id,
            "Starting migration"
        );

        let extra_hooks = std::mem::take(&mut self.hooks);
        let outcome = match self.prepare() {
            Ok((mut source, mut target)) => {
                let outcome = self
                    .execute(source.as_mut(), target.as_mut(), extra_hooks, &mut summary)
                    .await;
                disconnect(source.as_mut(), "source").await;
                disconnect(target.as_mut(), "target").await;
                outcome
            }
            Err(e) => Err(e),
        };

        let duration = clock.elapsed();
        let (success, message, error) = match &outcome {
            Ok(()) => {
                let mut message = format!(
                    "Migration completed successfully: {} tables, {} rows",
                    summary.tables_migrated, summary.rows_migrated
                );
                if !summary.failed_tables.is_empty() {
                    message.push_str(&format!(" ({} tables failed)", summary.failed_tables.len()));
                }
                info!(duration = %crate::progress::format_duration(duration), "{message}");
                (true, message, None)
            }
            Err(e) => {
                error!(error = %e, "Migration failed");
                (false, format!("Migration failed: {e}"), Some(ErrorDetail::from(e)))
            }
        };

        MigrationResult {
            success,
            message,
            target: target_id,
            tables_migrated: summary.tables_migrated,
            failed_tables: summary.failed_tables,
            rows_migrated: summary.rows_migrated,
            warnings: summary.warnings,
            duration,
            started_at,
            completed_at: Utc::now(),
            error,
        }
    }

    /// Validates the configuration and resolves both providers. No I/O.
    fn prepare(&mut self) -> Result<(Box<dyn MetadataProvider>, Box<dyn MetadataProvider>)> {
        self.config.validate()?;
        let source = match self.source.take() {
            Some(source) => source,
            None => self.registry.create(&self.config.source)?,
        };
        let target = match self.target.take() {
            Some(target) => target,
            None => self.registry.create(&self.config.target)?,
        };
        Ok((source, target))
    }

    async fn execute(
        &self,
        source: &mut dyn MetadataProvider,
        target: &mut dyn MetadataProvider,
        extra_hooks: Vec<Box<dyn MigrationHook>>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        source
            .connect()
            .await
            .map_err(|e| e.into_connectivity("source"))?;
        target
            .connect()
            .await
            .map_err(|e| e.into_connectivity("target"))?;
        if let Ok(version) = source.engine_version().await {
            info!(version = %version, "Connected to source");
        }
        if let Ok(version) = target.engine_version().await {
            info!(version = %version, "Connected to target");
        }

        let settings = &self.config.migration;
        let fail_fast = self.config.output.fail_fast;

        let available = source
            .list_tables()
            .await
            .map_err(|e| e.into_connectivity("source"))?;
        let filter = TableFilter::from_settings(settings)?;
        let tables = filter.apply(&available);
        for requested in settings.tables.iter().filter(|t| t.as_str() != "*") {
            if !available.iter().any(|t| t.eq_ignore_ascii_case(requested)) {
                let message = format!("Requested table '{requested}' not found in source");
                warn!("{message}");
                summary.warnings.push(message);
            }
        }
        info!(selected = tables.len(), available = available.len(), "Tables selected");

        let dialect = dialect::for_name(target.dialect_name());
        let mut hooks = default_hooks(&settings.constraints, settings.preserve_data);
        hooks.extend(extra_hooks);

        let mut progress = ProgressTracker::new();
        progress.start(tables.len());

        let created = {
            let mut schema =
                SchemaMigrator::new(settings, source.dialect_name(), dialect.as_ref(), &hooks)
                    .with_run_tables(&tables);
            let mut created = Vec::with_capacity(tables.len());
            for name in &tables {
                match schema.migrate_table(source, target, name).await {
                    Ok(TableOutcome::Created { table, warnings }) => {
                        summary.warnings.extend(warnings);
                        created.push(table);
                    }
                    Ok(TableOutcome::Skipped { name }) => {
                        summary
                            .warnings
                            .push(format!("Table '{name}' already exists in target, skipped"));
                    }
                    Err(e) => {
                        schema.mark_failed(name);
                        self.table_failed(name, e, fail_fast, summary)?;
                    }
                }
            }

            let report = schema.apply_foreign_keys(target, &created).await;
            summary.warnings.extend(report.warnings);
            created
        };

        let created = if settings.preserve_data {
            self.copy_data(source, target, created, &mut progress, summary)
                .await?
        } else {
            summary.tables_migrated = created.len();
            created
        };

        let warnings = run_hooks(&hooks, target, dialect.as_ref(), &created).await;
        summary.warnings.extend(warnings);

        progress.complete();
        debug!(
            tables = progress.completed_tables(),
            rows = progress.completed_rows(),
            duration = %progress.formatted_duration(),
            "Progress"
        );
        Ok(())
    }

    async fn copy_data(
        &self,
        source: &mut dyn MetadataProvider,
        target: &mut dyn MetadataProvider,
        mut created: Vec<MigratedTable>,
        progress: &mut ProgressTracker,
        summary: &mut RunSummary,
    ) -> Result<Vec<MigratedTable>> {
        let data = DataMigrator::new(&self.config.migration);
        for table in &mut created {
            match data
                .migrate_table(source, target, &table.source, progress)
                .await
            {
                Ok(report) => {
                    table.counters = report.counters;
                    summary.rows_migrated += report.rows;
                    summary.warnings.extend(report.warnings);
                    summary.tables_migrated += 1;
                    progress.table_completed();
                    info!(
                        table = %table.name(),
                        tables = %format!("{:.0}%", progress.table_percentage()),
                        "Table migrated"
                    );
                }
                Err(e) => {
                    let name = table.name().to_string();
                    self.table_failed(&name, e, self.config.output.fail_fast, summary)?;
                }
            }
        }
        Ok(created)
    }

    /// Applies the fail-fast policy to a per-table failure.
    fn table_failed(
        &self,
        name: &str,
        err: SnapshotError,
        fail_fast: bool,
        summary: &mut RunSummary,
    ) -> Result<()> {
        if fail_fast || err.kind() == ErrorKind::Connectivity {
            return Err(err);
        }
        error!(table = %name, error = %err, "Table failed, continuing");
        summary.failed_tables.push(name.to_string());
        summary.warnings.push(err.to_string());
        Ok(())
    }
}

async fn run_hooks(
    hooks: &[Box<dyn MigrationHook>],
    target: &mut dyn MetadataProvider,
    dialect: &dyn TargetDialect,
    tables: &[MigratedTable],
) -> Vec<String> {
    let mut ctx = HookContext::new(target, dialect, tables);
    for hook in hooks {
        debug!(hook = hook.name(), "Running post-migration hook");
        if let Err(e) = hook.after_data(&mut ctx).await {
            let err = SnapshotError::PostMigration(format!("{}: {e}", hook.name()));
            warn!(error = %err, "Hook failed");
            ctx.warn(err.to_string());
        }
    }
    ctx.into_warnings()
}

async fn disconnect(provider: &mut dyn MetadataProvider, endpoint: &str) {
    if let Err(e) = provider.disconnect().await {
        warn!(endpoint, error = %e, "Disconnect failed");
    }
}
