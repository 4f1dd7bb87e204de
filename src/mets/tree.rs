use uuid::Uuid;

use crate::domain::{Checksum, FileUse};
use crate::error::DataverseError;
use crate::mets::xml::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Item,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Directory => "Directory",
            EntryKind::Item => "Item",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRef {
    pub mdtype: String,
    pub label: String,
    pub href: String,
    pub loctype: String,
    pub otherloctype: Option<String>,
}

impl MetadataRef {
    /// `LOCTYPE="OTHER" OTHERLOCTYPE="SYSTEM"`, the form used for paths inside
    /// the transfer.
    pub fn system(mdtype: impl Into<String>, label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            mdtype: mdtype.into(),
            label: label.into(),
            href: href.into(),
            loctype: "OTHER".to_string(),
            otherloctype: Some("SYSTEM".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSection {
    /// Inline metadata (`mdWrap/xmlData`).
    Wrap { mdtype: String, body: Element },
    Reference(MetadataRef),
}

impl MetadataSection {
    pub fn mdtype(&self) -> &str {
        match self {
            MetadataSection::Wrap { mdtype, .. } => mdtype,
            MetadataSection::Reference(reference) => &reference.mdtype,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsEntry {
    pub path: Option<String>,
    pub label: String,
    pub kind: EntryKind,
    pub file_use: Option<FileUse>,
    pub file_uuid: Option<Uuid>,
    pub checksum: Option<Checksum>,
    pub derived_from: Option<EntryId>,
    pub dmdsecs: Vec<MetadataSection>,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
}

impl FsEntry {
    pub fn directory(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::blank(EntryKind::Directory, basename(&path).to_string(), Some(path))
    }

    pub fn item(path: impl Into<String>, file_use: FileUse) -> Self {
        let path = path.into();
        let mut entry = Self::blank(EntryKind::Item, basename(&path).to_string(), Some(path));
        entry.file_use = Some(file_use);
        entry.file_uuid = Some(Uuid::new_v4());
        entry
    }

    fn blank(kind: EntryKind, label: String, path: Option<String>) -> Self {
        Self {
            path,
            label,
            kind,
            file_use: None,
            file_uuid: None,
            checksum: None,
            derived_from: None,
            dmdsecs: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_derived_from(mut self, source: EntryId) -> Self {
        self.derived_from = Some(source);
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.file_uuid = Some(uuid);
        self
    }

    pub fn with_dmdsec(mut self, section: MetadataSection) -> Self {
        self.dmdsecs.push(section);
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    pub fn path_str(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct FsTree {
    entries: Vec<FsEntry>,
}

impl FsTree {
    pub fn new(root_label: impl Into<String>) -> Self {
        let root = FsEntry::blank(EntryKind::Directory, root_label.into(), None);
        Self {
            entries: vec![root],
        }
    }

    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    pub fn get(&self, id: EntryId) -> &FsEntry {
        &self.entries[id.0]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut FsEntry {
        &mut self.entries[id.0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `entry` under `parent`. A `derived_from` link has to name an
    /// entry that is already in the tree.
    pub fn add_child(&mut self, parent: EntryId, mut entry: FsEntry) -> Result<EntryId, DataverseError> {
        if parent.0 >= self.entries.len() {
            return Err(DataverseError::MetsStructure(format!("unknown parent entry {}", parent.0)));
        }
        if !self.entries[parent.0].is_directory() {
            return Err(DataverseError::MetsStructure(format!(
                "cannot add {} below file {}",
                entry.label, self.entries[parent.0].label
            )));
        }
        if let Some(source) = entry.derived_from
            && source.0 >= self.entries.len()
        {
            return Err(DataverseError::MetsStructure(format!(
                "{} is derived from an entry that is not in the tree",
                entry.label
            )));
        }

        let id = EntryId(self.entries.len());
        entry.parent = Some(parent);
        entry.children.clear();
        self.entries.push(entry);
        self.entries[parent.0].children.push(id);
        Ok(id)
    }

    pub fn walk(&self) -> Vec<EntryId> {
        let mut order = Vec::with_capacity(self.entries.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.entries[id.0].children.iter().rev());
        }
        order
    }

    pub fn all_files(&self) -> impl Iterator<Item = (EntryId, &FsEntry)> {
        self.walk().into_iter().map(move |id| (id, self.get(id)))
    }

    pub fn find_by_uuid(&self, uuid: &Uuid) -> Option<EntryId> {
        self.entries
            .iter()
            .position(|entry| entry.file_uuid.as_ref() == Some(uuid))
            .map(EntryId)
    }

    pub fn find_by_path(&self, path: &str) -> Option<EntryId> {
        self.entries
            .iter()
            .position(|entry| entry.path.as_deref() == Some(path))
            .map(EntryId)
    }

    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|entry| entry.kind == kind).count()
    }
}

pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_keep_insertion_order() {
        let mut tree = FsTree::new("Dataset");
        let bundle = tree.add_child(tree.root(), FsEntry::directory("drinks")).unwrap();
        let original = tree
            .add_child(bundle, FsEntry::item("drinks/drinks.csv", FileUse::Original))
            .unwrap();
        tree.add_child(
            bundle,
            FsEntry::item("drinks/drinks.tab", FileUse::Derivative).with_derived_from(original),
        )
        .unwrap();
        tree.add_child(tree.root(), FsEntry::item("notes.txt", FileUse::Original))
            .unwrap();

        let labels: Vec<_> = tree
            .all_files()
            .map(|(_, entry)| entry.label.as_str())
            .collect();
        assert_eq!(
            labels,
            vec!["Dataset", "drinks", "drinks.csv", "drinks.tab", "notes.txt"]
        );
        assert_eq!(tree.count(EntryKind::Directory), 2);
        assert_eq!(tree.get(original).parent(), Some(bundle));
    }

    #[test]
    fn rejects_dangling_derivation() {
        let mut tree = FsTree::new("Dataset");
        let entry = FsEntry::item("a.tab", FileUse::Derivative).with_derived_from(EntryId(7));
        assert!(tree.add_child(tree.root(), entry).is_err());
    }

    #[test]
    fn basename_of_paths() {
        assert_eq!(basename("a/b/c.csv"), "c.csv");
        assert_eq!(basename("c.csv"), "c.csv");
        assert_eq!(basename("metadata/"), "metadata");
    }
}
