//! Configuration type definitions.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Database to read from.
    pub source: DatabaseConfig,

    /// Database to write the snapshot into.
    pub target: DatabaseConfig,

    /// Migration behavior.
    pub migration: MigrationSettings,

    /// Run-level output behavior.
    pub output: OutputSettings,
}

/// Connection parameters for one end of the migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Provider type, e.g. "postgres", "sqlite", "script".
    pub r#type: String,

    /// Server host.
    pub host: Option<String>,

    /// Server port.
    pub port: Option<u16>,

    /// Database name.
    pub database: Option<String>,

    /// Login user.
    pub username: Option<String>,

    /// Login password.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Database file for embedded engines, output file for scripts.
    pub file: Option<PathBuf>,

    /// Full connection URL, takes precedence over the discrete fields.
    pub url: Option<String>,

    /// Embedded engine mode ("file" or "memory").
    pub mode: Option<String>,

    /// Schema to read tables from (default "public" for PostgreSQL).
    pub schema: Option<String>,

    /// Whether TLS is required.
    pub ssl: bool,

    /// Dialect used to render statements for script targets.
    pub dialect: Option<String>,
}

impl DatabaseConfig {
    /// Creates a config of the given provider type.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            r#type: kind.into(),
            ..Self::default()
        }
    }

    /// Sets the database file.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Sets the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Normalized provider type.
    #[must_use]
    pub fn kind(&self) -> String {
        self.r#type.trim().to_lowercase()
    }

    /// Whether the embedded engine should run in memory.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("memory"))
    }

    /// Short identifier of this endpoint for logs and results.
    ///
    /// Never contains the password.
    #[must_use]
    pub fn identifier(&self) -> String {
        if let Some(file) = &self.file {
            return file.display().to_string();
        }
        if self.is_memory() {
            return format!("{}:memory", self.kind());
        }
        if let Some(url) = &self.url {
            return redact_url(url);
        }
        match (&self.host, &self.database) {
            (Some(host), Some(db)) => {
                let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
                format!("{}://{host}{port}/{db}", self.kind())
            }
            (None, Some(db)) => db.clone(),
            _ => self.kind(),
        }
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***{}", &url[..scheme], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// What to do with a table that already exists in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingTablePolicy {
    /// Drop it and create it again from the source.
    #[default]
    Replace,
    /// Leave it and its data untouched.
    Skip,
    /// Treat the table as failed.
    Fail,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationSettings {
    /// Tables to include; `["*"]` or empty means all.
    pub tables: Vec<String>,

    /// Glob patterns of tables to exclude (`*` and `?` wildcards).
    pub exclude_tables: Vec<String>,

    /// Rows per page.
    pub batch_size: usize,

    /// Largest declared text size kept as a bounded VARCHAR.
    pub max_varchar_size_threshold: i64,

    /// Whether to copy rows at all.
    pub preserve_data: bool,

    /// Source type name to target type overrides.
    pub data_type_mappings: HashMap<String, String>,

    /// Default-expression function substitutions, applied before the built-ins.
    pub function_mappings: HashMap<String, String>,

    /// Policy for tables already present in the target.
    pub existing_tables: ExistingTablePolicy,

    /// Constraint preservation.
    pub constraints: ConstraintSettings,

    /// Row selection and transformation.
    pub data: DataSettings,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            tables: vec!["*".to_string()],
            exclude_tables: Vec::new(),
            batch_size: 1000,
            max_varchar_size_threshold: 1_000_000,
            preserve_data: true,
            data_type_mappings: HashMap::new(),
            function_mappings: HashMap::new(),
            existing_tables: ExistingTablePolicy::default(),
            constraints: ConstraintSettings::default(),
            data: DataSettings::default(),
        }
    }
}

/// Constraint preservation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConstraintSettings {
    /// Add foreign keys in the deferred pass.
    pub preserve_foreign_keys: bool,

    /// Create secondary indexes.
    pub preserve_indexes: bool,

    /// Reconcile auto-increment counters after the data phase.
    pub preserve_sequences: bool,

    /// Suppress auto-increment during the load and restore it afterwards.
    pub disable_auto_increment_during_migration: bool,
}

impl Default for ConstraintSettings {
    fn default() -> Self {
        Self {
            preserve_foreign_keys: true,
            preserve_indexes: true,
            preserve_sequences: true,
            disable_auto_increment_during_migration: false,
        }
    }
}

/// Replacement strategy for a column under anonymization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymizationRule {
    /// Stable hash of the original value.
    Hash,
    /// Random token.
    Random,
    /// SQL NULL.
    Null,
    /// Empty string.
    Empty,
}

/// Row selection and transformation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataSettings {
    /// Hard cap on rows per table. Wins over sampling.
    pub max_rows: Option<u64>,

    /// Copy only `sample_percentage` percent of each table.
    pub sample_data: bool,

    /// Percentage used when sampling, 1 to 100.
    pub sample_percentage: u32,

    /// Truncate over-long strings and report NULLs in NOT NULL columns.
    pub validate_data: bool,

    /// Replace sensitive values.
    pub anonymize_data: bool,

    /// Per-column anonymization rules, keyed by column name.
    pub anonymization_rules: HashMap<String, AnonymizationRule>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            max_rows: None,
            sample_data: false,
            sample_percentage: 10,
            validate_data: true,
            anonymize_data: false,
            anonymization_rules: HashMap::new(),
        }
    }
}

/// Run-level output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputSettings {
    /// Abort the run on the first table failure.
    #[serde(alias = "exitOnError")]
    pub fail_fast: bool,

    /// Log level used by the CLI when not verbose.
    pub log_level: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            fail_fast: false,
            log_level: "INFO".to_string(),
        }
    }
}
