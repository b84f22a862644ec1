//! Data migration.
//!
//! Rows move one page at a time. Every page is read, transformed and written
//! inside its own target transaction, so a rejected page leaves nothing
//! behind.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{AnonymizationRule, DataSettings, MigrationSettings};
use crate::error::Result;
use crate::progress::ProgressTracker;
use crate::provider::MetadataProvider;
use crate::schema::{ColumnDescriptor, TableDescriptor};
use crate::typemap::{classify, normalize, TypeCategory, TypeMapper};
use crate::value::{Row, Value};

/// Number of rows to copy from a table of `source_rows` rows.
///
/// A row cap wins over sampling when both are set.
#[must_use]
pub fn effective_row_count(source_rows: u64, data: &DataSettings) -> u64 {
    if let Some(max_rows) = data.max_rows {
        return source_rows.min(max_rows);
    }
    if data.sample_data {
        let percentage = u64::from(data.sample_percentage.min(100));
        return source_rows.saturating_mul(percentage) / 100;
    }
    source_rows
}

/// Outcome of copying one table.
#[derive(Debug, Clone, Default)]
pub struct TableDataReport {
    /// Rows written to the target.
    pub rows: u64,
    /// Highest integer written to each auto-increment column.
    pub counters: HashMap<String, i64>,
    /// Truncations and constraint findings.
    pub warnings: Vec<String>,
}

enum Finding {
    Truncated,
    NullInNotNull,
}

#[derive(Default)]
struct ColumnFindings {
    truncated: u64,
    nulls: u64,
}

/// Copies rows from source to target.
pub struct DataMigrator<'a> {
    settings: &'a MigrationSettings,
    mapper: TypeMapper,
    rules: HashMap<String, AnonymizationRule>,
}

impl<'a> DataMigrator<'a> {
    /// Creates a migrator.
    pub fn new(settings: &'a MigrationSettings) -> Self {
        let rules = settings
            .data
            .anonymization_rules
            .iter()
            .map(|(column, rule)| (column.to_lowercase(), *rule))
            .collect();
        Self {
            settings,
            mapper: TypeMapper::new(settings),
            rules,
        }
    }

    /// Copies one table, returning the rows written.
    ///
    /// Any failure is reported as a data error for the table. The page that
    /// failed is rolled back; earlier pages stay committed.
    pub async fn migrate_table(
        &self,
        source: &mut dyn MetadataProvider,
        target: &mut dyn MetadataProvider,
        table: &TableDescriptor,
        progress: &mut ProgressTracker,
    ) -> Result<TableDataReport> {
        let name = table.name.as_str();
        let source_rows = source
            .row_count(name)
            .await
            .map_err(|e| e.into_data(name))?;
        let total = effective_row_count(source_rows, &self.settings.data);
        progress.add_expected_rows(total);
        info!(table = %name, source_rows, rows = total, "Copying rows");

        let mut report = TableDataReport::default();
        if total == 0 {
            return Ok(report);
        }

        let columns = table.column_names();
        let batch_size = self.settings.batch_size.max(1) as u64;
        let mut findings: HashMap<usize, ColumnFindings> = HashMap::new();

        while report.rows < total {
            let limit = batch_size.min(total - report.rows);
            let page = source
                .fetch_page(name, limit, report.rows)
                .await
                .map_err(|e| e.into_data(name))?;
            if page.is_empty() {
                break;
            }

            let rows: Vec<Row> = page
                .into_iter()
                .map(|row| self.transform_row(table, row, &mut findings))
                .collect();
            self.track_counters(table, &rows, &mut report.counters);

            let written = self.write_page(target, name, &columns, &rows).await?;
            report.rows += rows.len() as u64;
            progress.rows_completed(written);
            debug!(table = %name, rows = report.rows, total, "Page committed");
        }

        let mut findings: Vec<_> = findings.into_iter().collect();
        findings.sort_by_key(|(index, _)| *index);
        for (index, finding) in findings {
            let column = &table.columns[index].name;
            if finding.truncated > 0 {
                report.warnings.push(format!(
                    "{name}.{column}: truncated {} value(s) to {} characters",
                    finding.truncated, table.columns[index].size
                ));
            }
            if finding.nulls > 0 {
                report.warnings.push(format!(
                    "{name}.{column}: {} NULL value(s) in a NOT NULL column",
                    finding.nulls
                ));
            }
        }

        info!(table = %name, rows = report.rows, "Copied rows");
        Ok(report)
    }

    async fn write_page(
        &self,
        target: &mut dyn MetadataProvider,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        target.begin().await.map_err(|e| e.into_data(table))?;
        let written = match target.insert_rows(table, columns, rows).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(rollback) = target.rollback().await {
                    warn!(table = %table, error = %rollback, "Rollback failed");
                }
                return Err(e.into_data(table));
            }
        };
        target.commit().await.map_err(|e| e.into_data(table))?;
        Ok(written)
    }

    fn track_counters(&self, table: &TableDescriptor, rows: &[Row], counters: &mut HashMap<String, i64>) {
        for (index, column) in table.columns.iter().enumerate() {
            if !column.auto_increment {
                continue;
            }
            let max = rows
                .iter()
                .filter_map(|row| row.get(index).and_then(Value::as_i64))
                .max();
            if let Some(max) = max {
                counters
                    .entry(column.name.clone())
                    .and_modify(|current| *current = (*current).max(max))
                    .or_insert(max);
            }
        }
    }

    fn transform_row(
        &self,
        table: &TableDescriptor,
        row: Row,
        findings: &mut HashMap<usize, ColumnFindings>,
    ) -> Row {
        let mut out = Vec::with_capacity(row.len());
        for (index, value) in row.into_iter().enumerate() {
            let Some(column) = table.columns.get(index) else {
                out.push(value);
                continue;
            };
            let (value, finding) = self.transform_value(&table.name, column, value);
            match finding {
                Some(Finding::Truncated) => findings.entry(index).or_default().truncated += 1,
                Some(Finding::NullInNotNull) => findings.entry(index).or_default().nulls += 1,
                None => {}
            }
            out.push(value);
        }
        out
    }

    fn transform_value(
        &self,
        table: &str,
        column: &ColumnDescriptor,
        value: Value,
    ) -> (Value, Option<Finding>) {
        let data = &self.settings.data;
        if data.anonymize_data {
            return (self.anonymize(column, value), None);
        }
        if !data.validate_data {
            return (value, None);
        }

        match value {
            Value::Null if !column.nullable => {
                warn!(table = %table, column = %column.name, "NULL value in NOT NULL column");
                (Value::Null, Some(Finding::NullInNotNull))
            }
            Value::Text(text) if self.is_bounded_text(column) => {
                let limit = usize::try_from(column.size).unwrap_or(usize::MAX);
                let length = text.chars().count();
                if length > limit {
                    warn!(
                        table = %table,
                        column = %column.name,
                        length,
                        max = column.size,
                        "Value too long, truncating"
                    );
                    (
                        Value::Text(text.chars().take(limit).collect()),
                        Some(Finding::Truncated),
                    )
                } else {
                    (Value::Text(text), None)
                }
            }
            other => (other, None),
        }
    }

    fn is_bounded_text(&self, column: &ColumnDescriptor) -> bool {
        column.size > 0
            && !self.mapper.is_oversized(column.size)
            && classify(&normalize(&column.type_name)) == TypeCategory::Text
    }

    /// Replaces a value of a sensitive column.
    ///
    /// An explicit rule for the column wins over the name heuristics. NULL
    /// stays NULL.
    #[must_use]
    pub fn anonymize(&self, column: &ColumnDescriptor, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        let name = column.name.to_lowercase();
        if let Some(rule) = self.rules.get(&name) {
            return apply_rule(*rule, &value);
        }
        let Value::Text(text) = &value else {
            return value;
        };

        if name.contains("email") {
            Value::Text(format!("user_{}@example.com", hex_prefix(&value, 16)))
        } else if name.contains("phone") || name.contains("tel") {
            Value::Text(format!("555-{:04}", stable_number(text, 10_000)))
        } else if name.contains("password") {
            Value::Text("********".to_string())
        } else if name.contains("ssn") || name.contains("social") {
            Value::Text(format!("XXX-XX-{:04}", stable_number(text, 10_000)))
        } else if name.contains("credit") || name.contains("card") {
            Value::Text(format!("****-****-****-{:04}", stable_number(text, 10_000)))
        } else {
            value
        }
    }
}

fn digest(value: &Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match value {
        Value::Bytes(bytes) => hasher.update(bytes),
        other => hasher.update(other.to_string().as_bytes()),
    }
    hasher.finalize().into()
}

/// First `len` hex characters of the value's digest.
fn hex_prefix(value: &Value, len: usize) -> String {
    let mut hex: String = digest(value).iter().map(|b| format!("{b:02x}")).collect();
    hex.truncate(len);
    hex
}

fn stable_number(text: &str, modulo: u64) -> u64 {
    let hash = digest(&Value::Text(text.to_string()));
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(prefix) % modulo
}

fn apply_rule(rule: AnonymizationRule, value: &Value) -> Value {
    match rule {
        AnonymizationRule::Hash => Value::Text(hex_prefix(value, 16)),
        AnonymizationRule::Random => {
            Value::Text(format!("RANDOM_{}", rand::random::<u32>() % 10_000))
        }
        AnonymizationRule::Null => Value::Null,
        AnonymizationRule::Empty => Value::Text(String::new()),
    }
}
