use tracing::{error, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::dataset::{Dataset, FileEntry};
use crate::ddi::CitationDescriptor;
use crate::domain::{
    Checksum, FileUse, R_DATA_FORMAT_LABEL, RestrictedPolicy, UNKNOWN_EXTENSION,
    extension_for_format,
};
use crate::error::{DataverseError, StructureIssue};
use crate::mets::document::MetsDocument;
use crate::mets::tree::{EntryId, FsEntry, FsTree, MetadataRef, MetadataSection};

#[derive(Debug, Clone, Copy)]
pub struct ConvertSettings<'a> {
    /// File name of the dataset metadata, also used as its METS label.
    pub dataset_name: &'a str,
    pub metadata_dir: &'a str,
    pub restricted_policy: RestrictedPolicy,
}

#[derive(Debug)]
pub struct Conversion {
    pub document: MetsDocument,
    pub descriptor: CitationDescriptor,
    pub metadata_only: bool,
    pub zip_found: bool,
}

pub fn build_sip(
    dataset: &Dataset,
    settings: &ConvertSettings<'_>,
    sink: &dyn ProgressSink,
) -> Result<Conversion, DataverseError> {
    let descriptor = CitationDescriptor::from_dataset(dataset).inspect_err(|err| {
        error!(%err, "unable to gather citation data from dataset metadata");
    })?;
    descriptor.report(sink);

    let mut tree = FsTree::new(descriptor.title.clone());
    let root = tree.root();
    let dataset_href = format!("{}/{}", settings.metadata_dir, settings.dataset_name);
    {
        let sip = tree.get_mut(root);
        sip.dmdsecs.push(MetadataSection::Wrap {
            mdtype: "DDI".to_string(),
            body: descriptor.render(),
        });
        sip.dmdsecs.push(MetadataSection::Reference(MetadataRef::system(
            "OTHER",
            settings.dataset_name,
            dataset_href.clone(),
        )));
    }

    let mut builder = TreeBuilder {
        tree,
        dataset,
        settings,
        sink,
        zip_found: false,
    };
    let files = &dataset.version.files;
    let metadata_only = files.is_empty();
    if metadata_only {
        info!("metadata only transfer: dataset metadata lists no files");
        sink.event(ProgressEvent::message(
            "Metadata only transfer? There are no file entries in this transfer's metadata.",
        ));
    }
    for (index, entry) in files.iter().enumerate() {
        builder.add_file(index, entry)?;
    }
    let zip_found = builder.zip_found;
    let mut tree = builder.tree;

    let metadata_dir = tree.add_child(root, FsEntry::directory(settings.metadata_dir))?;
    tree.add_child(metadata_dir, FsEntry::item(dataset_href, FileUse::Metadata))?;

    Ok(Conversion {
        document: MetsDocument::new(tree),
        descriptor,
        metadata_only,
        zip_found,
    })
}

struct TreeBuilder<'a> {
    tree: FsTree,
    dataset: &'a Dataset,
    settings: &'a ConvertSettings<'a>,
    sink: &'a dyn ProgressSink,
    zip_found: bool,
}

impl TreeBuilder<'_> {
    fn add_file(&mut self, index: usize, entry: &FileEntry) -> Result<(), DataverseError> {
        self.check_restricted(entry)?;
        if entry.is_tabular() {
            self.add_bundle(index, entry)
        } else {
            self.add_plain(index, entry)
        }
    }

    fn check_restricted(&self, entry: &FileEntry) -> Result<(), DataverseError> {
        let Some(terms) = self.dataset.terms_of_access() else {
            return Ok(());
        };
        if !entry.is_restricted() {
            return Ok(());
        }
        let path = entry
            .filename()
            .or(entry.label.as_deref())
            .unwrap_or_default()
            .to_string();
        match self.settings.restricted_policy {
            RestrictedPolicy::Warn => {
                warn!(%path, terms, "restricted dataset files may not have transferred correctly");
                self.sink.event(ProgressEvent::message(format!(
                    "Restricted file {path} may not have transferred correctly: {terms}"
                )));
                Ok(())
            }
            RestrictedPolicy::Fail => Err(StructureIssue::RestrictedAccess { path }.into()),
        }
    }

    fn add_plain(&mut self, index: usize, entry: &FileEntry) -> Result<(), DataverseError> {
        let Some(path) = entry.filename() else {
            error!(index, "no filename in dataset metadata file entry");
            return Err(StructureIssue::MissingFilename { index }.into());
        };
        if !self.zip_found && is_zip(path) {
            self.zip_found = true;
            info!(%path, "non-bundle .zip file found in the dataset");
        }

        let checksum = self.required_checksum(entry, path)?;
        let root = self.tree.root();
        self.tree
            .add_child(root, FsEntry::item(path, FileUse::Original).with_checksum(checksum))?;
        Ok(())
    }

    fn add_bundle(&mut self, index: usize, entry: &FileEntry) -> Result<(), DataverseError> {
        let label = entry
            .label
            .as_deref()
            .filter(|label| !label.is_empty())
            .ok_or(StructureIssue::MissingLabel { index })?;
        let tabfile = entry
            .filename()
            .ok_or(StructureIssue::MissingFilename { index })?;
        let data_file = entry.data_file.clone().unwrap_or_default();

        self.sink.event(ProgressEvent::message(format!(
            "Creating entries for tabfile bundle {label}"
        )));
        let base = bundle_base(label).ok_or(StructureIssue::MissingLabel { index })?;

        let format_label = data_file.original_format_label.as_deref();
        let extension = extension_for_format(format_label);
        info!(
            extension,
            original_format = data_file.original_file_format.as_deref().unwrap_or("None"),
            "resolved bundle original format"
        );
        let original_name = if extension == UNKNOWN_EXTENSION {
            let name = data_file
                .original_file_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .unwrap_or(tabfile);
            info!(%name, "original format label is UNKNOWN, using the upstream file name");
            name.to_string()
        } else {
            format!("{base}{extension}")
        };

        let original_path = format!("{base}/{original_name}");
        let checksum = self.required_checksum(entry, &original_path)?;

        let root = self.tree.root();
        let bundle = self.tree.add_child(root, FsEntry::directory(base))?;
        let original = self.tree.add_child(
            bundle,
            FsEntry::item(original_path, FileUse::Original).with_checksum(checksum),
        )?;

        if format_label != Some(R_DATA_FORMAT_LABEL) {
            self.add_derived(bundle, original, format!("{base}/{base}.RData"), FileUse::Derivative)?;
        }

        let ddi_name = format!("{base}-ddi.xml");
        let ddi_path = format!("{base}/{ddi_name}");
        let tab = FsEntry::item(format!("{base}/{tabfile}"), FileUse::Derivative)
            .with_derived_from(original)
            .with_dmdsec(MetadataSection::Reference(MetadataRef::system(
                "DDI",
                ddi_name,
                ddi_path.clone(),
            )));
        self.tree.add_child(bundle, tab)?;

        self.add_derived(bundle, original, ddi_path, FileUse::Metadata)?;
        self.add_derived(
            bundle,
            original,
            format!("{base}/{base}citation-endnote.xml"),
            FileUse::Metadata,
        )?;
        self.add_derived(
            bundle,
            original,
            format!("{base}/{base}citation-ris.ris"),
            FileUse::Metadata,
        )?;
        Ok(())
    }

    fn add_derived(
        &mut self,
        bundle: EntryId,
        original: EntryId,
        path: String,
        file_use: FileUse,
    ) -> Result<EntryId, DataverseError> {
        self.tree
            .add_child(bundle, FsEntry::item(path, file_use).with_derived_from(original))
    }

    fn required_checksum(&self, entry: &FileEntry, path: &str) -> Result<Checksum, DataverseError> {
        let checksum = match &entry.data_file {
            Some(data_file) => data_file.checksum()?,
            None => None,
        };
        let Some(checksum) = checksum else {
            error!(%path, "no checksum in dataset metadata");
            return Err(StructureIssue::MissingChecksum {
                path: path.to_string(),
            }
            .into());
        };
        self.sink.event(ProgressEvent::message(format!(
            "Checksum retrieved from dataset.json: {} ({})",
            checksum.value, checksum.kind
        )));
        Ok(checksum)
    }
}

// Tabular labels end in a four-character extension, `.tab` in practice.
fn bundle_base(label: &str) -> Option<&str> {
    let (cut, _) = label.char_indices().rev().nth(3)?;
    Some(&label[..cut]).filter(|base| !base.is_empty())
}

fn is_zip(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}
