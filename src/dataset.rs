use std::fs;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{Checksum, ChecksumType};
use crate::error::{DataverseError, StructureIssue};
use crate::layout::TransferLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportShape {
    WebUi,
    Api,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataset {
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    authority: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    persistent_url: Option<String>,
    #[serde(default)]
    dataset_version: Option<DatasetVersion>,
    #[serde(default)]
    latest_version: Option<DatasetVersion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetVersion {
    #[serde(default)]
    pub metadata_blocks: MetadataBlocks,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub release_time: Option<String>,
    #[serde(default)]
    pub version_state: Option<String>,
    #[serde(default)]
    pub version_number: Option<Value>,
    #[serde(default)]
    pub version_minor_number: Option<Value>,
    #[serde(default)]
    pub terms_of_use: Option<String>,
    #[serde(default)]
    pub terms_of_access: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataBlocks {
    #[serde(default)]
    pub citation: Option<CitationBlock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitationBlock {
    #[serde(default)]
    pub fields: Vec<CitationField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationField {
    pub type_name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub restricted: Option<bool>,
    #[serde(default)]
    pub data_file: Option<DataFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub checksum: Option<DataFileChecksum>,
    #[serde(default)]
    pub original_format_label: Option<String>,
    #[serde(default)]
    pub original_file_format: Option<String>,
    #[serde(default)]
    pub original_file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataFileChecksum {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl FileEntry {
    pub fn is_restricted(&self) -> bool {
        self.restricted.unwrap_or(false)
    }

    pub fn filename(&self) -> Option<&str> {
        self.data_file
            .as_ref()
            .and_then(|file| file.filename.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn is_tabular(&self) -> bool {
        self.filename()
            .map(|name| name.ends_with(".tab"))
            .unwrap_or(false)
    }
}

impl DataFile {
    /// The checksum Dataverse recorded for this file. The legacy `md5` field
    /// wins over the typed `checksum` object.
    pub fn checksum(&self) -> Result<Option<Checksum>, StructureIssue> {
        if let Some(md5) = self.md5.as_deref().filter(|value| !value.is_empty()) {
            return Ok(Some(Checksum::md5(md5)));
        }
        match &self.checksum {
            Some(checksum) if !checksum.value.is_empty() => Ok(Some(Checksum {
                kind: ChecksumType::from_label(&checksum.kind)?,
                value: checksum.value.clone(),
            })),
            _ => Ok(None),
        }
    }
}

impl DatasetVersion {
    pub fn citation_fields(&self) -> &[CitationField] {
        self.metadata_blocks
            .citation
            .as_ref()
            .map(|block| block.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_draft(&self) -> bool {
        self.version_state.as_deref() == Some("DRAFT")
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub protocol: Option<String>,
    pub authority: Option<String>,
    pub identifier: Option<String>,
    pub publisher: Option<String>,
    pub persistent_url: Option<String>,
    pub shape: ExportShape,
    pub version: DatasetVersion,
}

impl Dataset {
    pub fn load(layout: &TransferLayout) -> Result<Self, DataverseError> {
        let path = layout.dataset_path();
        debug!(path = %path, exists = path.exists(), "reading dataset metadata");
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| {
                DataverseError::MetadataUnavailable {
                    path: path.to_string(),
                    reason: err.to_string(),
                }
            })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, DataverseError> {
        let raw: RawDataset = serde_json::from_str(content)
            .map_err(|err| StructureIssue::InvalidJson(err.to_string()))?;
        Self::normalize(raw)
    }

    fn normalize(raw: RawDataset) -> Result<Self, DataverseError> {
        let (shape, version) = match (raw.dataset_version, raw.latest_version) {
            (Some(version), _) => {
                info!(
                    "dataset appears to be a Dataverse web UI download; \
                     some of its fields may not be supported"
                );
                (ExportShape::WebUi, version)
            }
            (None, Some(version)) => (ExportShape::Api, version),
            (None, None) => return Err(StructureIssue::MissingVersion.into()),
        };

        Ok(Self {
            protocol: raw.protocol,
            authority: raw.authority,
            identifier: raw.identifier,
            publisher: raw.publisher,
            persistent_url: raw.persistent_url,
            shape,
            version,
        })
    }

    /// `persistentUrl` when Dataverse provided one, otherwise assembled from
    /// protocol, authority and identifier.
    pub fn persistent_identifier(&self) -> String {
        if let Some(url) = self.persistent_url.as_deref().filter(|url| !url.is_empty()) {
            return url.to_string();
        }
        match (&self.protocol, &self.authority, &self.identifier) {
            (Some(protocol), Some(authority), Some(identifier)) => {
                format!("{protocol}:{authority}/{identifier}")
            }
            _ => String::new(),
        }
    }

    pub fn terms_of_access(&self) -> Option<&str> {
        self.version
            .terms_of_access
            .as_deref()
            .filter(|terms| !terms.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const MINIMAL_API: &str = r#"{
        "protocol": "doi",
        "authority": "10.5072/FK2",
        "identifier": "6PPJ6Y",
        "latestVersion": {"files": [], "versionState": "RELEASED"}
    }"#;

    #[test]
    fn api_shape_uses_latest_version() {
        let dataset = Dataset::from_json(MINIMAL_API).unwrap();
        assert_eq!(dataset.shape, ExportShape::Api);
        assert_eq!(dataset.persistent_identifier(), "doi:10.5072/FK2/6PPJ6Y");
    }

    #[test]
    fn web_ui_shape_wins_when_both_present() {
        let json = r#"{
            "datasetVersion": {"versionState": "DRAFT"},
            "latestVersion": {"versionState": "RELEASED"}
        }"#;
        let dataset = Dataset::from_json(json).unwrap();
        assert_eq!(dataset.shape, ExportShape::WebUi);
        assert!(dataset.version.is_draft());
    }

    #[test]
    fn missing_version_is_structure_error() {
        let err = Dataset::from_json(r#"{"protocol": "doi"}"#).unwrap_err();
        assert_matches!(
            err,
            DataverseError::Structure(StructureIssue::MissingVersion)
        );
    }

    #[test]
    fn checksum_object_used_without_md5() {
        let file: DataFile = serde_json::from_str(
            r#"{"filename": "a.csv", "checksum": {"type": "SHA-256", "value": "abc"}}"#,
        )
        .unwrap();
        let checksum = file.checksum().unwrap().unwrap();
        assert_eq!(checksum.kind, ChecksumType::Sha256);
        assert_eq!(checksum.value, "abc");
    }
}
