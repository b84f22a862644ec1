//! Table selection by include list and exclude globs.

use regex::{Regex, RegexBuilder};

use crate::config::MigrationSettings;
use crate::error::Result;

/// Decides which source tables take part in a run.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include: Option<Vec<String>>,
    exclude: Vec<Regex>,
}

impl TableFilter {
    /// Builds a filter. `["*"]` or an empty include list means every table.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = if include.is_empty() || include.iter().any(|t| t.trim() == "*") {
            None
        } else {
            Some(include.iter().map(|t| t.trim().to_lowercase()).collect())
        };
        let exclude = exclude
            .iter()
            .map(|pattern| glob_to_regex(pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { include, exclude })
    }

    /// Builds the filter configured in `settings`.
    pub fn from_settings(settings: &MigrationSettings) -> Result<Self> {
        Self::new(&settings.tables, &settings.exclude_tables)
    }

    /// Whether a single table is selected.
    #[must_use]
    pub fn matches(&self, table: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .is_none_or(|names| names.contains(&table.to_lowercase()));
        included && !self.exclude.iter().any(|re| re.is_match(table))
    }

    /// Selected tables, in the order given.
    #[must_use]
    pub fn apply(&self, tables: &[String]) -> Vec<String> {
        tables
            .iter()
            .filter(|t| self.matches(t))
            .cloned()
            .collect()
    }
}

/// Compiles a `*`/`?` glob into an anchored, case-insensitive regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for ch in pattern.trim().chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Ok(RegexBuilder::new(&re).case_insensitive(true).build()?)
}
