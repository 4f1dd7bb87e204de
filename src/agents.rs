use std::fs;
use std::io::ErrorKind;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DataverseError, StructureIssue};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAgent {
    pub agent_identifier_type: String,
    pub agent_identifier_value: String,
    pub agent_name: String,
    pub agent_type: String,
}

/// `Ok(None)` when the sidecar does not exist; agents are optional.
pub fn load_agents(path: &Utf8Path) -> Result<Option<Vec<ExternalAgent>>, DataverseError> {
    let content = match fs::read_to_string(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path, "no external agents file");
            return Ok(None);
        }
        Err(err) => {
            return Err(DataverseError::MetadataUnavailable {
                path: path.to_string(),
                reason: err.to_string(),
            });
        }
    };
    let agents: Vec<ExternalAgent> = serde_json::from_str(&content)
        .map_err(|err| StructureIssue::InvalidAgents(err.to_string()))?;
    Ok(Some(agents))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("agents.json")).unwrap();
        assert_eq!(load_agents(&path).unwrap(), None);
    }

    #[test]
    fn reads_agent_list() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("agents.json")).unwrap();
        fs::write(
            &path,
            r#"[{"agentIdentifierType": "URI",
                 "agentIdentifierValue": "https://dataverse.example.org",
                 "agentName": "Example Dataverse",
                 "agentType": "organization"}]"#,
        )
        .unwrap();
        let agents = load_agents(&path).unwrap().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_name, "Example Dataverse");

        fs::write(&path, r#"[{"agentName": "no identifier"}]"#).unwrap();
        assert_matches!(
            load_agents(&path),
            Err(DataverseError::Structure(StructureIssue::InvalidAgents(_)))
        );
    }
}
