//! Configuration validation.
//!
//! Errors are collected in one pass so a broken file is reported in full.

use super::{DatabaseConfig, MigrationConfig};
use crate::error::{Result, SnapshotError};

/// Provider types that store the database in a local file.
const FILE_TYPES: &[&str] = &["sqlite", "h2"];

/// Validate the configuration.
///
/// Returns the non-fatal warnings on success.
pub fn validate(config: &MigrationConfig) -> Result<Vec<String>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    validate_endpoint(&config.source, "source", &mut errors);
    validate_endpoint(&config.target, "target", &mut errors);

    let migration = &config.migration;
    if migration.batch_size == 0 {
        errors.push("migration.batchSize must be greater than 0".to_string());
    }
    if migration.max_varchar_size_threshold <= 0 {
        errors.push("migration.maxVarcharSizeThreshold must be greater than 0".to_string());
    }

    let data = &migration.data;
    if data.max_rows == Some(0) {
        errors.push("migration.data.maxRows must be greater than 0".to_string());
    }
    if !(1..=100).contains(&data.sample_percentage) {
        errors.push("migration.data.samplePercentage must be between 1 and 100".to_string());
    }
    if data.anonymize_data && data.anonymization_rules.is_empty() {
        warnings.push(
            "Data anonymization is enabled but no anonymization rules are defined; \
             column-name heuristics apply"
                .to_string(),
        );
    }
    if data.sample_data && data.max_rows.is_some() {
        warnings.push(
            "Both data sampling and max rows are configured; max rows takes precedence".to_string(),
        );
    }

    if same_file(&config.source, &config.target) {
        errors.push("source and target cannot be the same database file".to_string());
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(SnapshotError::Configuration(errors.join("; ")))
    }
}

fn validate_endpoint(db: &DatabaseConfig, side: &str, errors: &mut Vec<String>) {
    let kind = db.kind();
    if kind.is_empty() {
        errors.push(format!("{side}.type is required"));
        return;
    }

    if let Some(mode) = &db.mode {
        let mode = mode.to_lowercase();
        if mode != "file" && mode != "memory" {
            errors.push(format!("{side}.mode must be 'file' or 'memory'"));
        }
    }
    if db.port == Some(0) {
        errors.push(format!("{side}.port must be between 1 and 65535"));
    }

    if kind == "script" {
        if side == "source" {
            errors.push("source.type cannot be 'script'".to_string());
        }
        return;
    }

    if FILE_TYPES.contains(&kind.as_str()) {
        if db.file.is_none() && db.url.is_none() && !db.is_memory() {
            errors.push(format!("{side}.file is required for {kind}"));
        }
    } else if db.url.is_none() {
        if db.host.as_deref().is_none_or(|h| h.trim().is_empty()) {
            errors.push(format!("{side}.host is required for {kind}"));
        }
        if db.database.as_deref().is_none_or(|d| d.trim().is_empty()) {
            errors.push(format!("{side}.database is required for {kind}"));
        }
    }
}

fn same_file(source: &DatabaseConfig, target: &DatabaseConfig) -> bool {
    match (&source.file, &target.file) {
        (Some(a), Some(b)) => source.kind() == target.kind() && a == b,
        _ => false,
    }
}
