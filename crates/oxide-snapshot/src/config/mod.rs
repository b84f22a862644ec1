//! Configuration loading and validation.
//!
//! Configuration is a JSON document with camelCase keys. Every field has a
//! default, so a minimal file only names the source and target.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use tracing::warn;

use crate::error::Result;

impl MigrationConfig {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// The result is not validated; call [`MigrationConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate the configuration, logging non-fatal findings.
    pub fn validate(&self) -> Result<()> {
        for warning in validation::validate(self)? {
            warn!("{}", warning);
        }
        Ok(())
    }

    /// Render the configuration as JSON. Passwords are omitted.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
