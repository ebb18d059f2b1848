use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::target::{Target, DEFAULT_QUOTA};
use crate::ConfigError;

/// One entry of a batch targets file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub product: String,
    #[serde(default)]
    pub quota: Option<usize>,
}

impl TargetSpec {
    /// Converts this entry into a [`Target`], applying `default_quota` when
    /// the entry has none.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTarget`] if the product identifier is invalid.
    pub fn to_target(&self, default_quota: usize) -> Result<Target, ConfigError> {
        Target::new(&self.product, self.quota.unwrap_or(default_quota))
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetsFile {
    pub targets: Vec<TargetSpec>,
}

impl TargetsFile {
    /// Builds the validated target list, falling back to [`DEFAULT_QUOTA`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTarget`] for the first invalid entry.
    pub fn into_targets(self) -> Result<Vec<Target>, ConfigError> {
        self.targets
            .iter()
            .map(|spec| spec.to_target(DEFAULT_QUOTA))
            .collect()
    }
}

/// Load and validate a batch targets file.
///
/// ```yaml
/// targets:
///   - product: acme-crm
///     quota: 50
///   - product: widgetly
/// ```
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_targets(path: &Path) -> Result<TargetsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TargetsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let targets_file: TargetsFile =
        serde_yaml::from_str(&content).map_err(ConfigError::TargetsFileParse)?;

    validate_targets(&targets_file)?;

    Ok(targets_file)
}

fn validate_targets(targets_file: &TargetsFile) -> Result<(), ConfigError> {
    if targets_file.targets.is_empty() {
        return Err(ConfigError::Validation(
            "targets file lists no targets".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for spec in &targets_file.targets {
        let product = spec.product.trim();
        if product.is_empty() {
            return Err(ConfigError::Validation(
                "target product must be non-empty".to_string(),
            ));
        }

        if spec.quota == Some(0) {
            return Err(ConfigError::Validation(format!(
                "target '{product}' has quota 0; quota must be at least 1"
            )));
        }

        if !seen.insert(product.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate target product: '{product}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "targets_test.rs"]
mod tests;
