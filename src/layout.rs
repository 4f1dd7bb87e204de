use camino::Utf8PathBuf;

use crate::config::ResolvedConfig;

#[derive(Debug, Clone)]
pub struct TransferLayout {
    unit_path: Utf8PathBuf,
    metadata_dir: Utf8PathBuf,
    dataset_name: String,
    mets_dir: Utf8PathBuf,
    mets_name: String,
    agents_name: String,
    location_placeholder: String,
}

impl TransferLayout {
    pub fn new(unit_path: impl Into<Utf8PathBuf>, config: &ResolvedConfig) -> Self {
        let unit_path = unit_path.into();
        let metadata_dir = unit_path.join(&config.metadata_dir);
        Self {
            mets_dir: metadata_dir.clone(),
            unit_path,
            metadata_dir,
            dataset_name: config.dataset_name.clone(),
            mets_name: config.mets_name.clone(),
            agents_name: config.agents_name.clone(),
            location_placeholder: config.location_placeholder.clone(),
        }
    }

    pub fn with_dataset_name(mut self, name: impl Into<String>) -> Self {
        self.dataset_name = name.into();
        self
    }

    /// Redirects where METS is written and read; the dataset metadata is
    /// still read from the transfer's metadata directory.
    pub fn with_mets_location(mut self, dir: Option<Utf8PathBuf>, name: Option<String>) -> Self {
        if let Some(dir) = dir {
            self.mets_dir = dir;
        }
        if let Some(name) = name {
            self.mets_name = name;
        }
        self
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn dataset_path(&self) -> Utf8PathBuf {
        self.metadata_dir.join(&self.dataset_name)
    }

    pub fn mets_path(&self) -> Utf8PathBuf {
        self.mets_dir.join(&self.mets_name)
    }

    pub fn agents_path(&self) -> Utf8PathBuf {
        self.metadata_dir.join(&self.agents_name)
    }

    /// Turns a stored location such as `%transferDirectory%objects/a.csv`
    /// into a path under this transfer.
    pub fn resolve_location(&self, location: &str) -> Utf8PathBuf {
        let mut root = self.unit_path.as_str().to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Utf8PathBuf::from(location.replace(&self.location_placeholder, &root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let config = ResolvedConfig::default();
        let layout = TransferLayout::new("/var/transfers/dv-1", &config);

        assert!(layout.dataset_path().ends_with("metadata/dataset.json"));
        assert!(layout.mets_path().ends_with("metadata/METS.xml"));
        assert!(layout.agents_path().ends_with("metadata/agents.json"));
        assert_eq!(
            layout.resolve_location("%transferDirectory%objects/data/a.csv"),
            Utf8PathBuf::from("/var/transfers/dv-1/objects/data/a.csv")
        );
    }

    #[test]
    fn mets_location_override() {
        let config = ResolvedConfig::default();
        let layout = TransferLayout::new("/t", &config)
            .with_mets_location(Some(Utf8PathBuf::from("/out")), Some("METS.1.xml".into()));
        assert_eq!(layout.mets_path(), Utf8PathBuf::from("/out/METS.1.xml"));
        assert_eq!(layout.dataset_path(), Utf8PathBuf::from("/t/metadata/dataset.json"));
    }
}
