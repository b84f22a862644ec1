//! Source type to target type translation.
//!
//! Mapping is a pure function of the source type name, its declared size and
//! the configured overrides. Nothing is cached between calls.

use std::collections::HashMap;

use crate::config::MigrationSettings;

/// Declared sizes that engines report for "no real limit".
///
/// `i32::MAX` (generic), 65535 / 16777215 / 4294967295 (MySQL TEXT family),
/// 1073741823 (SQL Server `MAX` types), 10485760 (PostgreSQL varchar limit).
pub const UNBOUNDED_SIZE_SENTINELS: &[i64] = &[
    2_147_483_647,
    65_535,
    16_777_215,
    4_294_967_295,
    1_073_741_823,
    10_485_760,
];

/// Default largest text size kept as a bounded `VARCHAR`.
pub const DEFAULT_MAX_BOUNDED_TEXT_SIZE: i64 = 1_000_000;

/// Classification of a source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    /// Character data with a length.
    Text,
    /// 32-bit or narrower integers.
    Integer,
    /// 64-bit integers.
    BigInteger,
    /// Exact numerics.
    Decimal,
    /// Single precision floating point.
    Float,
    /// Double precision floating point.
    Double,
    /// Booleans.
    Boolean,
    /// Calendar dates.
    Date,
    /// Time of day.
    Time,
    /// Date and time.
    Timestamp,
    /// Binary large objects.
    Blob,
    /// Character large objects, including structured documents.
    Clob,
    /// UUIDs.
    Uuid,
    /// Not recognized.
    Unknown,
}

/// The target type chosen for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Target type expression, e.g. `VARCHAR(255)`.
    pub target_type: String,
    /// Set when the mapping is a guess.
    pub warning: Option<String>,
}

impl TypeMapping {
    fn exact(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            warning: None,
        }
    }

    /// Whether the target type is a large-object type.
    ///
    /// Embedded engines cannot index these.
    #[must_use]
    pub fn is_large_object(&self) -> bool {
        matches!(
            classify(&normalize(&self.target_type)),
            TypeCategory::Blob | TypeCategory::Clob
        )
    }
}

/// Maps source column types to target type expressions.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    overrides: HashMap<String, String>,
    max_bounded_text_size: i64,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            max_bounded_text_size: DEFAULT_MAX_BOUNDED_TEXT_SIZE,
        }
    }
}

impl TypeMapper {
    /// Creates a mapper from the migration settings.
    #[must_use]
    pub fn new(settings: &MigrationSettings) -> Self {
        Self::default()
            .with_overrides(&settings.data_type_mappings)
            .with_max_bounded_text_size(settings.max_varchar_size_threshold)
    }

    /// Adds type overrides. Keys are matched case-insensitively.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        self.overrides.extend(
            overrides
                .iter()
                .map(|(k, v)| (normalize(k), v.clone())),
        );
        self
    }

    /// Sets the oversized-text threshold.
    #[must_use]
    pub fn with_max_bounded_text_size(mut self, size: i64) -> Self {
        self.max_bounded_text_size = size;
        self
    }

    /// Maps a source type and declared size to a target type.
    #[must_use]
    pub fn map(&self, type_name: &str, size: i64) -> TypeMapping {
        let normalized = normalize(type_name);
        if let Some(target) = self.overrides.get(&normalized) {
            return TypeMapping::exact(target.clone());
        }

        match classify(&normalized) {
            TypeCategory::Text => {
                if self.is_oversized(size) {
                    TypeMapping::exact("CLOB")
                } else {
                    TypeMapping::exact(format!("VARCHAR({size})"))
                }
            }
            TypeCategory::Integer => TypeMapping::exact("INT"),
            TypeCategory::BigInteger => TypeMapping::exact("BIGINT"),
            TypeCategory::Decimal => TypeMapping::exact("DECIMAL"),
            TypeCategory::Float => TypeMapping::exact("FLOAT"),
            TypeCategory::Double => TypeMapping::exact("DOUBLE"),
            TypeCategory::Boolean => TypeMapping::exact("BOOLEAN"),
            TypeCategory::Date => TypeMapping::exact("DATE"),
            TypeCategory::Time => TypeMapping::exact("TIME"),
            TypeCategory::Timestamp => TypeMapping::exact("TIMESTAMP"),
            TypeCategory::Blob => TypeMapping::exact("BLOB"),
            TypeCategory::Clob => TypeMapping::exact("CLOB"),
            TypeCategory::Uuid => TypeMapping::exact("UUID"),
            TypeCategory::Unknown => TypeMapping {
                target_type: "VARCHAR".to_string(),
                warning: Some(format!("Unknown data type '{type_name}', using VARCHAR")),
            },
        }
    }

    /// Whether a declared text size means "unbounded".
    #[must_use]
    pub fn is_oversized(&self, size: i64) -> bool {
        size <= 0 || UNBOUNDED_SIZE_SENTINELS.contains(&size) || size > self.max_bounded_text_size
    }
}

/// Maps a single type using `settings`.
#[must_use]
pub fn map_type(type_name: &str, size: i64, settings: &MigrationSettings) -> TypeMapping {
    TypeMapper::new(settings).map(type_name, size)
}

/// Uppercases, collapses whitespace and drops any `(...)` parameter list.
///
/// PostgreSQL array types (`_int4`, `text[]`) normalize to `ARRAY`.
#[must_use]
pub fn normalize(type_name: &str) -> String {
    let trimmed = type_name.trim();
    if trimmed.starts_with('_') || trimmed.ends_with("[]") {
        return "ARRAY".to_string();
    }

    let mut base = String::with_capacity(trimmed.len());
    let mut depth = 0usize;
    for ch in trimmed.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => base.push(ch),
            _ => {}
        }
    }

    let words: Vec<String> = base
        .split_whitespace()
        .map(str::to_uppercase)
        .filter(|w| !matches!(w.as_str(), "UNSIGNED" | "SIGNED" | "ZEROFILL"))
        .collect();
    words.join(" ")
}

/// Classifies a normalized type name.
#[must_use]
pub fn classify(normalized: &str) -> TypeCategory {
    match normalized {
        "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "NVARCHAR" | "NCHAR"
        | "NATIONAL CHARACTER VARYING" | "TEXT" | "STRING" | "VARCHAR2" | "NVARCHAR2"
        | "BPCHAR" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "CITEXT" | "VARCHAR_IGNORECASE"
        | "NAME" => TypeCategory::Text,
        "INT" | "INTEGER" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "INT2" | "INT4" | "SERIAL"
        | "SMALLSERIAL" | "SERIAL4" | "SERIAL2" | "YEAR" => TypeCategory::Integer,
        "BIGINT" | "LONG" | "INT8" | "BIGSERIAL" | "SERIAL8" => TypeCategory::BigInteger,
        "DECIMAL" | "NUMERIC" | "NUMBER" | "DEC" | "MONEY" | "SMALLMONEY" => {
            TypeCategory::Decimal
        }
        "FLOAT" | "REAL" | "FLOAT4" | "BINARY_FLOAT" => TypeCategory::Float,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" | "BINARY_DOUBLE" => TypeCategory::Double,
        "BOOLEAN" | "BOOL" | "BIT" => TypeCategory::Boolean,
        "DATE" => TypeCategory::Date,
        "TIME" | "TIMETZ" | "TIME WITH TIME ZONE" | "TIME WITHOUT TIME ZONE" => TypeCategory::Time,
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" | "DATETIME2" | "SMALLDATETIME"
        | "DATETIMEOFFSET" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITHOUT TIME ZONE"
        | "TIMESTAMP WITH LOCAL TIME ZONE" => TypeCategory::Timestamp,
        "BLOB" | "BINARY" | "VARBINARY" | "BYTEA" | "IMAGE" | "RAW" | "LONG RAW" | "TINYBLOB"
        | "MEDIUMBLOB" | "LONGBLOB" | "BINARY VARYING" => TypeCategory::Blob,
        "CLOB" | "NCLOB" | "NTEXT" | "JSON" | "JSONB" | "XML" | "ARRAY" | "LONG VARCHAR" => {
            TypeCategory::Clob
        }
        "UUID" | "UNIQUEIDENTIFIER" => TypeCategory::Uuid,
        _ => TypeCategory::Unknown,
    }
}
