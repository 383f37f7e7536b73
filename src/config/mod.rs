pub mod cli;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{DumpError, Result};

/// Project configuration driving transforms and exporters.
///
/// The three `*_import_properties` maps are emitted verbatim (sorted by name)
/// into the corresponding XML properties block. `BTreeMap` is used on purpose:
/// sorted iteration is part of the output determinism contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub polarion_project_id: String,

    pub xunit_import_properties: BTreeMap<String, Value>,
    pub testcase_import_properties: BTreeMap<String, Value>,
    pub requirements_import_properties: BTreeMap<String, Value>,

    /// Project-wide field defaults applied before the testcase transform.
    pub default_fields: BTreeMap<String, Value>,
    /// Extension of the built-in custom-field allow-list.
    pub custom_fields: Vec<String>,
    pub requirements_default_fields: BTreeMap<String, Value>,
    pub requirements_custom_fields: Vec<String>,

    /// Regex fragments gating testcase export on the `nodeid` field.
    pub whitelisted_tests: Vec<String>,
    pub blacklisted_tests: Vec<String>,

    /// Base URL of the automation scripts repository.
    pub repo_address: Option<String>,

    pub parametrize: bool,
    pub cfme_parametrize: bool,
    /// Whether to append the unique run id to descriptions; each project
    /// transform has its own default when unset.
    pub use_run_id: Option<bool>,
    pub run_id: Option<String>,

    /// Comment patterns that make a SKIP result legitimate to report.
    /// Project-tunable; empty means the canonical blocker list.
    pub skip_blocker_patterns: Vec<String>,

    /// Tier number to caselevel name mapping used by the CFME testcase
    /// transform; index is the tier.
    pub caselevels: Vec<String>,

    pub requirements_document_relative_path: Option<String>,
}

/// Comment patterns accepted as a legitimate reason for a skipped result.
pub const DEFAULT_SKIP_BLOCKER_PATTERNS: &[&str] = &[
    "SKIPME:",
    "Skipping due to these blockers",
    "BZ ?[0-9]+",
    "GH ?#?[0-9]+",
    "GH#ManageIQ",
    r"bugzilla\.redhat\.com",
    r"github\.com",
];

impl Config {
    pub fn from_toml_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|err| DumpError::SourceUnreadable {
            location: path.display().to_string(),
            details: err.to_string(),
        })?;
        let config: Config = toml::from_str(&content).map_err(|err| DumpError::ConfigError {
            message: format!("cannot parse '{}': {}", path.display(), err),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.project_id().is_empty() {
            return Err(DumpError::ConfigError {
                message: "missing 'polarion_project_id'".to_string(),
            });
        }
        for pattern in &self.skip_blocker_patterns {
            regex::Regex::new(pattern).map_err(|err| DumpError::ConfigError {
                message: format!("invalid skip blocker pattern '{pattern}': {err}"),
            })?;
        }
        Ok(())
    }

    /// Project id, falling back to the legacy location inside the xunit
    /// import properties.
    pub fn project_id(&self) -> &str {
        if !self.polarion_project_id.is_empty() {
            return &self.polarion_project_id;
        }
        self.xunit_import_properties
            .get("polarion-project-id")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Testrun id defined in the config file, if any.
    pub fn testrun_id(&self) -> Option<&str> {
        self.xunit_import_properties
            .get("polarion-testrun-id")
            .and_then(Value::as_str)
    }

    pub fn skip_blocker_patterns(&self) -> Vec<String> {
        if self.skip_blocker_patterns.is_empty() {
            DEFAULT_SKIP_BLOCKER_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            self.skip_blocker_patterns.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polarion.toml");
        std::fs::write(
            &path,
            r#"
polarion_project_id = "RHCF3"

[xunit_import_properties]
polarion-dry-run = false
polarion-testrun-id = "5_8_0_17"
"#,
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.project_id(), "RHCF3");
        assert_eq!(config.testrun_id(), Some("5_8_0_17"));
        assert_eq!(
            config.xunit_import_properties.get("polarion-dry-run"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_legacy_project_id_location() {
        let mut config = Config::default();
        config.xunit_import_properties.insert(
            "polarion-project-id".to_string(),
            Value::String("CLOUDTP".to_string()),
        );
        assert_eq!(config.project_id(), "CLOUDTP");
    }

    #[test]
    fn test_missing_project_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polarion.toml");
        std::fs::write(&path, "parametrize = true\n").unwrap();
        assert!(Config::from_toml_file(&path).is_err());
    }

    #[test]
    fn test_default_skip_patterns_used_when_unset() {
        let config = Config::default();
        assert!(config
            .skip_blocker_patterns()
            .iter()
            .any(|p| p == "SKIPME:"));
    }
}
