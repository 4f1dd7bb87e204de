use std::fs;

use assert_matches::assert_matches;

use dataverse_mets::config::{Config, ConfigLoader, ResolvedConfig};
use dataverse_mets::domain::RestrictedPolicy;
use dataverse_mets::error::DataverseError;

#[test]
fn resolve_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("dataverse-mets.json");
    fs::write(
        &path,
        r#"{
            "metadata_dir": "metadata/",
            "mets_name": "METS.dataverse.xml",
            "database": "/var/archivematica/files.sqlite",
            "restricted_policy": "fail"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.metadata_dir, "metadata");
    assert_eq!(resolved.mets_name, "METS.dataverse.xml");
    assert_eq!(resolved.dataset_name, "dataset.json");
    assert_eq!(resolved.restricted_policy, RestrictedPolicy::Fail);
    assert_eq!(
        resolved.database.as_ref().map(|path| path.as_str()),
        Some("/var/archivematica/files.sqlite")
    );
}

#[test]
fn explicit_config_path_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(missing.to_str()).unwrap_err();
    assert_matches!(err, DataverseError::ConfigRead(_));
}

#[test]
fn unknown_keys_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("dataverse-mets.json");
    fs::write(&path, r#"{"metadata_directory": "md"}"#).unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, DataverseError::ConfigParse(_));
}

#[test]
fn objects_dir_cannot_escape_transfer() {
    let config = Config {
        objects_dir: Some("../objects".to_string()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(DataverseError::InvalidConfigValue(_))
    );
    assert_eq!(
        ConfigLoader::resolve_config(Config::default()).unwrap(),
        ResolvedConfig::default()
    );
}
