use std::fs;
use std::io::Write;

use camino::Utf8Path;

use crate::error::DataverseError;

pub fn write_atomic(dest: &Utf8Path, bytes: &[u8]) -> Result<(), DataverseError> {
    let parent = dest
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| DataverseError::Filesystem(format!("create {parent}: {err}")))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".dataverse-mets")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| DataverseError::Filesystem(err.to_string()))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| DataverseError::Filesystem(format!("write {dest}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| DataverseError::Filesystem(format!("persist {dest}: {}", err.error)))?;
    Ok(())
}
