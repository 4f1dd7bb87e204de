use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DataverseError {
    #[error("metadata unavailable at {path}: {reason}")]
    #[diagnostic(help("check that the transfer's metadata directory contains the expected file"))]
    MetadataUnavailable { path: String, reason: String },

    #[error("malformed dataset metadata: {0}")]
    Structure(#[from] StructureIssue),

    #[error("METS file entries without a matching file record: {}", .failures.len())]
    Match { failures: Vec<MatchFailure> },

    #[error("failed to parse METS at {path}: {reason}")]
    MetsParse { path: String, reason: String },

    #[error("invalid METS structure: {0}")]
    MetsStructure(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfigValue(String),

    #[error("invalid transfer id: {0}")]
    InvalidTransferId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureIssue {
    #[error("neither datasetVersion nor latestVersion is present")]
    MissingVersion,

    #[error("dataset metadata is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("citation metadata block has no fields")]
    MissingCitationFields,

    #[error("citation field `title` is missing")]
    MissingTitle,

    #[error("citation field `author` is missing or has no authorName value")]
    MissingAuthor,

    #[error("file entry {index} has no dataFile filename")]
    MissingFilename { index: usize },

    #[error("tabular file entry {index} has no label")]
    MissingLabel { index: usize },

    #[error("no checksum recorded for {path}")]
    MissingChecksum { path: String },

    #[error("unsupported checksum type: {kind}")]
    UnsupportedChecksum { kind: String },

    #[error("restricted file {path} requires contacting the dataset owner for access")]
    RestrictedAccess { path: String },

    #[error("agents metadata is malformed: {0}")]
    InvalidAgents(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFailure {
    pub path: String,
    pub reason: MatchFailureReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailureReason {
    NotFound,
    Ambiguous(usize),
    /// The only candidate is already matched to another METS entry.
    Duplicate,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            MatchFailureReason::NotFound => write!(f, "{}: no file record found", self.path),
            MatchFailureReason::Ambiguous(count) => {
                write!(f, "{}: {count} file records match", self.path)
            }
            MatchFailureReason::Duplicate => {
                write!(f, "{}: file record already matched to another entry", self.path)
            }
        }
    }
}

impl From<rusqlite::Error> for DataverseError {
    fn from(err: rusqlite::Error) -> Self {
        DataverseError::Database(err.to_string())
    }
}
