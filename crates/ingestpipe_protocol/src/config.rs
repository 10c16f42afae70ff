//! Run configuration: the JSON file shape from spec.md section 6, plus the
//! `WAREHOUSE_*` environment overrides and the schema-version migration path
//! described in SPEC_FULL.md section A.3.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DataFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config schema version {0} is not supported by this build; run `migrate-config` first")]
    UnsupportedVersion(u32),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Schema version of the on-disk config file. Bumped whenever a field is
/// renamed or restructured in a way old configs can't parse directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigVersion {
    V1,
    V2,
}

impl Default for ConfigVersion {
    fn default() -> Self {
        ConfigVersion::V2
    }
}

pub const CURRENT_CONFIG_VERSION: ConfigVersion = ConfigVersion::V2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// One configured file family: a pattern with `{month}`/`{date_range}`
/// placeholders, its destination table, and the columns it must contain.
///
/// Invariants (enforced by [`FileSpec::validate`]):
/// - `expected_columns` is non-empty.
/// - `date_column` is one of `expected_columns`.
/// - `duplicate_key_columns`, if set, is a subset of `expected_columns`.
///
/// Open question left unresolved on purpose (see SPEC_FULL.md section E):
/// whether `duplicate_key_columns` must include `date_column` is not
/// enforced here — the source config format doesn't either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    pub file_pattern: String,
    pub table_name: String,
    pub date_column: String,
    pub expected_columns: Vec<String>,
    #[serde(default)]
    pub duplicate_key_columns: Option<Vec<String>>,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub file_format: Option<DataFormat>,
    #[serde(default)]
    pub quote_char: Option<char>,
}

impl FileSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_columns.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "file spec for table '{}' has zero expected columns",
                self.table_name
            )));
        }
        if !self.expected_columns.iter().any(|c| c == &self.date_column) {
            return Err(ConfigError::Invalid(format!(
                "file spec for table '{}': date_column '{}' is not in expected_columns",
                self.table_name, self.date_column
            )));
        }
        if let Some(keys) = &self.duplicate_key_columns {
            let expected: HashSet<&str> = self.expected_columns.iter().map(String::as_str).collect();
            for key in keys {
                if !expected.contains(key.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "file spec for table '{}': duplicate key column '{}' is not in expected_columns",
                        self.table_name, key
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// When true, a `ValidationFailed` verdict downgrades the file's
    /// `LoadStatus` all the way to `Failed` instead of merely
    /// `Succeeded-With-Warnings`. Default false — see SPEC_FULL.md section E.
    #[serde(default)]
    pub gate_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub config_version: ConfigVersion,
    pub warehouse: WarehouseConfig,
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub validation: ValidationSettings,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if config.config_version > CURRENT_CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(match config.config_version {
                ConfigVersion::V1 => 1,
                ConfigVersion::V2 => 2,
            }));
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::Invalid(
                "configuration declares zero files".to_string(),
            ));
        }
        for spec in &self.files {
            spec.validate()?;
        }
        Ok(())
    }

    /// `WAREHOUSE_*` environment variables override the matching
    /// `warehouse.*` config key (spec.md section 6).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WAREHOUSE_ACCOUNT") {
            self.warehouse.account = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_USER") {
            self.warehouse.user = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_PASSWORD") {
            self.warehouse.password = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_WAREHOUSE") {
            self.warehouse.warehouse = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_DATABASE") {
            self.warehouse.database = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_SCHEMA") {
            self.warehouse.schema = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_ROLE") {
            self.warehouse.role = Some(v);
        }
    }
}

/// Upgrades a config JSON blob to the current [`ConfigVersion`], refusing
/// to guess on fields it cannot unambiguously migrate (SPEC_FULL.md
/// section A.3 / C.3). V1 configs kept the warehouse block under a
/// `snowflake` key and had no `validation` block; V2 renamed it to
/// `warehouse` and added `validation`.
pub fn migrate_config_json(raw: &str) -> Result<String, ConfigError> {
    let mut value: serde_json::Value = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
        path: "<migrate input>".to_string(),
        source,
    })?;

    let version = value
        .get("config_version")
        .and_then(|v| v.as_str())
        .unwrap_or("v1")
        .to_string();
    if version == "v2" {
        return serde_json::to_string_pretty(&value).map_err(|source| ConfigError::Parse {
            path: "<migrate output>".to_string(),
            source,
        });
    }
    if version != "v1" {
        return Err(ConfigError::Invalid(format!(
            "unrecognized config_version '{}'; cannot migrate",
            version
        )));
    }

    let obj = value
        .as_object_mut()
        .ok_or_else(|| ConfigError::Invalid("config root is not a JSON object".to_string()))?;
    match (obj.contains_key("warehouse"), obj.contains_key("snowflake")) {
        (false, true) => {
            let snowflake = obj.remove("snowflake").expect("checked above");
            obj.insert("warehouse".to_string(), snowflake);
        }
        (true, false) => {}
        (true, true) => {
            return Err(ConfigError::Invalid(
                "config has both 'warehouse' and 'snowflake' blocks; cannot unambiguously migrate"
                    .to_string(),
            ))
        }
        (false, false) => {
            return Err(ConfigError::Invalid(
                "config has neither 'warehouse' nor 'snowflake' block; cannot migrate".to_string(),
            ))
        }
    }
    obj.entry("validation")
        .or_insert_with(|| serde_json::json!({ "gate_success": false }));
    obj.insert("config_version".to_string(), serde_json::json!("v2"));

    serde_json::to_string_pretty(&value).map_err(|source| ConfigError::Parse {
        path: "<migrate output>".to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> FileSpec {
        FileSpec {
            file_pattern: "t_{month}.tsv".to_string(),
            table_name: "T".to_string(),
            date_column: "d".to_string(),
            expected_columns: vec!["d".to_string(), "a".to_string(), "b".to_string()],
            duplicate_key_columns: None,
            delimiter: None,
            file_format: None,
            quote_char: None,
        }
    }

    #[test]
    fn rejects_empty_expected_columns() {
        let mut spec = sample_spec();
        spec.expected_columns.clear();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_date_column_not_in_expected() {
        let mut spec = sample_spec();
        spec.date_column = "missing".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_key_not_subset() {
        let mut spec = sample_spec();
        spec.duplicate_key_columns = Some(vec!["not_a_column".to_string()]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_spec() {
        assert!(sample_spec().validate().is_ok());
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("WAREHOUSE_ACCOUNT", "overridden-account");
        let mut config = Config {
            config_version: ConfigVersion::V2,
            warehouse: WarehouseConfig {
                account: "orig".to_string(),
                user: "u".to_string(),
                password: "p".to_string(),
                warehouse: "wh".to_string(),
                database: "db".to_string(),
                schema: "sch".to_string(),
                role: None,
            },
            files: vec![sample_spec()],
            validation: ValidationSettings::default(),
        };
        config.apply_env_overrides();
        assert_eq!(config.warehouse.account, "overridden-account");
        std::env::remove_var("WAREHOUSE_ACCOUNT");
    }

    #[test]
    fn migrate_config_json_renames_snowflake_block() {
        let v1 = r#"{
            "snowflake": {"account":"a","user":"u","password":"p","warehouse":"w","database":"d","schema":"s"},
            "files": []
        }"#;
        let migrated = migrate_config_json(v1).unwrap();
        let value: serde_json::Value = serde_json::from_str(&migrated).unwrap();
        assert!(value.get("warehouse").is_some());
        assert!(value.get("snowflake").is_none());
        assert_eq!(value.get("config_version").unwrap(), "v2");
        assert_eq!(value["validation"]["gate_success"], false);
    }

    #[test]
    fn migrate_config_json_refuses_ambiguous_input() {
        let ambiguous = r#"{"files": []}"#;
        assert!(migrate_config_json(ambiguous).is_err());
    }

    #[test]
    fn migrate_config_json_is_noop_on_current_version() {
        let v2 = r#"{"config_version":"v2","warehouse":{"account":"a","user":"u","password":"p","warehouse":"w","database":"d","schema":"s"},"files":[]}"#;
        let migrated = migrate_config_json(v2).unwrap();
        let value: serde_json::Value = serde_json::from_str(&migrated).unwrap();
        assert_eq!(value.get("config_version").unwrap(), "v2");
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self { gate_success: false }
    }
}
