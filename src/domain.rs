use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DataverseError, StructureIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(Uuid);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = DataverseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|_| DataverseError::InvalidTransferId(value.to_string()))
    }
}

impl From<Uuid> for TransferId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileUse {
    Original,
    Derivative,
    Metadata,
}

impl FileUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileUse::Original => "original",
            FileUse::Derivative => "derivative",
            FileUse::Metadata => "metadata",
        }
    }
}

impl fmt::Display for FileUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileUse {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "original" => Ok(FileUse::Original),
            "derivative" => Ok(FileUse::Derivative),
            "metadata" => Ok(FileUse::Metadata),
            other => Err(format!("unknown file use: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumType {
    Md5,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumType {
    pub fn mets_name(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "MD5",
            ChecksumType::Sha256 => "SHA-256",
            ChecksumType::Sha384 => "SHA-384",
            ChecksumType::Sha512 => "SHA-512",
        }
    }

    /// Accepts both the METS vocabulary and the names Dataverse emits in
    /// `dataFile.checksum.type`.
    pub fn from_label(label: &str) -> Result<Self, StructureIssue> {
        let normalized = label.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "MD5" => Ok(ChecksumType::Md5),
            "SHA-256" | "SHA256" => Ok(ChecksumType::Sha256),
            "SHA-384" | "SHA384" => Ok(ChecksumType::Sha384),
            "SHA-512" | "SHA512" => Ok(ChecksumType::Sha512),
            _ => Err(StructureIssue::UnsupportedChecksum {
                kind: label.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mets_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub kind: ChecksumType,
    pub value: String,
}

impl Checksum {
    pub fn md5(value: impl Into<String>) -> Self {
        Self {
            kind: ChecksumType::Md5,
            value: value.into(),
        }
    }
}

pub const UNKNOWN_EXTENSION: &str = "UNKNOWN";

/// Tabular ingest formats Dataverse keeps as the bundle's original, keyed by
/// `originalFormatLabel`.
const EXTENSION_MAPPING: &[(&str, &str)] = &[
    ("Comma Separated Values", ".csv"),
    ("MS Excel (XLSX)", ".xlsx"),
    ("R Data", ".RData"),
    ("SPSS Portable", ".por"),
    ("SPSS SAV", ".sav"),
    ("Stata Binary", ".dta"),
    ("Stata 13 Binary", ".dta"),
];

pub const R_DATA_FORMAT_LABEL: &str = "R Data";

pub fn extension_for_format(label: Option<&str>) -> &'static str {
    label
        .and_then(|label| {
            EXTENSION_MAPPING
                .iter()
                .find(|(known, _)| *known == label)
                .map(|(_, ext)| *ext)
        })
        .unwrap_or(UNKNOWN_EXTENSION)
}

/// What to do with a restricted file whose dataset requires contacting the
/// owner for access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RestrictedPolicy {
    #[default]
    Warn,
    Fail,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_transfer_id() {
        let id: TransferId = "1c9f7e0f-2d44-4d9f-9a36-0c0b7d3b6c11".parse().unwrap();
        assert_eq!(id.to_string(), "1c9f7e0f-2d44-4d9f-9a36-0c0b7d3b6c11");

        let err = "not-a-uuid".parse::<TransferId>().unwrap_err();
        assert_matches!(err, DataverseError::InvalidTransferId(_));
    }

    #[test]
    fn extension_mapping_falls_back_to_unknown() {
        assert_eq!(extension_for_format(Some("Stata 13 Binary")), ".dta");
        assert_eq!(extension_for_format(Some("Comma Separated Values")), ".csv");
        assert_eq!(extension_for_format(Some("Fixed Field Text")), UNKNOWN_EXTENSION);
        assert_eq!(extension_for_format(None), UNKNOWN_EXTENSION);
    }

    #[test]
    fn checksum_labels() {
        assert_eq!(ChecksumType::from_label("md5").unwrap(), ChecksumType::Md5);
        assert_eq!(
            ChecksumType::from_label("SHA-512").unwrap(),
            ChecksumType::Sha512
        );
        assert_matches!(
            ChecksumType::from_label("SHA-1"),
            Err(StructureIssue::UnsupportedChecksum { .. })
        );
    }
}
