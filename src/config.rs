use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::RestrictedPolicy;
use crate::error::DataverseError;

pub const DEFAULT_CONFIG_FILE: &str = "dataverse-mets.json";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub metadata_dir: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub mets_name: Option<String>,
    #[serde(default)]
    pub agents_name: Option<String>,
    #[serde(default)]
    pub objects_dir: Option<String>,
    #[serde(default)]
    pub location_placeholder: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub restricted_policy: Option<RestrictedPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub metadata_dir: String,
    pub dataset_name: String,
    pub mets_name: String,
    pub agents_name: String,
    pub objects_dir: String,
    pub location_placeholder: String,
    pub database: Option<Utf8PathBuf>,
    pub restricted_policy: RestrictedPolicy,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            metadata_dir: "metadata".to_string(),
            dataset_name: "dataset.json".to_string(),
            mets_name: "METS.xml".to_string(),
            agents_name: "agents.json".to_string(),
            objects_dir: "objects".to_string(),
            location_placeholder: "%transferDirectory%".to_string(),
            database: None,
            restricted_policy: RestrictedPolicy::Warn,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; without one the default file in the
    /// working directory is used when present, otherwise built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DataverseError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DataverseError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DataverseError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DataverseError> {
        let defaults = ResolvedConfig::default();

        Ok(ResolvedConfig {
            metadata_dir: relative_name("metadata_dir", config.metadata_dir)?
                .unwrap_or(defaults.metadata_dir),
            dataset_name: file_name("dataset_name", config.dataset_name)?
                .unwrap_or(defaults.dataset_name),
            mets_name: file_name("mets_name", config.mets_name)?.unwrap_or(defaults.mets_name),
            agents_name: file_name("agents_name", config.agents_name)?
                .unwrap_or(defaults.agents_name),
            objects_dir: relative_name("objects_dir", config.objects_dir)?
                .unwrap_or(defaults.objects_dir),
            location_placeholder: match config.location_placeholder {
                Some(value) if value.trim().is_empty() => {
                    return Err(DataverseError::InvalidConfigValue(
                        "location_placeholder must not be empty".to_string(),
                    ));
                }
                Some(value) => value,
                None => defaults.location_placeholder,
            },
            database: config.database.map(Utf8PathBuf::from),
            restricted_policy: config
                .restricted_policy
                .unwrap_or(defaults.restricted_policy),
        })
    }
}

fn relative_name(key: &str, value: Option<String>) -> Result<Option<String>, DataverseError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|part| part == "..") {
        return Err(DataverseError::InvalidConfigValue(format!(
            "{key} must be a relative directory name: {value}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

fn file_name(key: &str, value: Option<String>) -> Result<Option<String>, DataverseError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed == ".." {
        return Err(DataverseError::InvalidConfigValue(format!(
            "{key} must be a plain file name: {value}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_resolves_to_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved, ResolvedConfig::default());
        assert_eq!(resolved.location_placeholder, "%transferDirectory%");
    }

    #[test]
    fn rejects_path_like_file_names() {
        let config = Config {
            mets_name: Some("../METS.xml".to_string()),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, DataverseError::InvalidConfigValue(_));
    }
}
