use std::fs::File;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::domain::{Checksum, ChecksumType};
use crate::error::DataverseError;

const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixityOutcome {
    Pass,
    Fail,
}

impl FixityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixityOutcome::Pass => "Pass",
            FixityOutcome::Fail => "Fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixityCheck {
    pub outcome: FixityOutcome,
    pub detail: String,
    pub note: String,
}

impl FixityCheck {
    /// Comparison is case-sensitive, matching how the digest was recorded.
    pub fn evaluate(expected: &Checksum, computed: &str) -> Self {
        let detail = format!(
            "program=\"{}\"; module=\"{}\"",
            env!("CARGO_PKG_NAME"),
            module_name(expected.kind)
        );
        if expected.value == computed {
            Self {
                outcome: FixityOutcome::Pass,
                detail,
                note: format!("Dataverse checksum {} verified", expected.value),
            }
        } else {
            Self {
                outcome: FixityOutcome::Fail,
                detail,
                note: format!("Dataverse checksum {} verification failed", expected.value),
            }
        }
    }
}

pub fn module_name(kind: ChecksumType) -> &'static str {
    match kind {
        ChecksumType::Md5 => "md5::Context",
        ChecksumType::Sha256 => "sha2::Sha256",
        ChecksumType::Sha384 => "sha2::Sha384",
        ChecksumType::Sha512 => "sha2::Sha512",
    }
}

pub fn file_digest(path: &Utf8Path, kind: ChecksumType) -> Result<String, DataverseError> {
    match kind {
        ChecksumType::Md5 => {
            let mut context = md5::Context::new();
            stream(path, |chunk| context.consume(chunk))?;
            Ok(format!("{:x}", context.compute()))
        }
        ChecksumType::Sha256 => sha_digest::<Sha256>(path),
        ChecksumType::Sha384 => sha_digest::<Sha384>(path),
        ChecksumType::Sha512 => sha_digest::<Sha512>(path),
    }
}

fn sha_digest<D: Digest>(path: &Utf8Path) -> Result<String, DataverseError> {
    let mut hasher = D::new();
    stream(path, |chunk| hasher.update(chunk))?;
    Ok(hex::encode(hasher.finalize()))
}

fn stream(path: &Utf8Path, mut update: impl FnMut(&[u8])) -> Result<(), DataverseError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| DataverseError::Filesystem(format!("open {path}: {err}")))?;
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| DataverseError::Filesystem(format!("read {path}: {err}")))?;
        if read == 0 {
            return Ok(());
        }
        update(&buffer[..read]);
    }
}
