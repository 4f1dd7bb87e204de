use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Checksum, ChecksumType, FileUse};
use crate::error::DataverseError;
use crate::fs_util;
use crate::mets::tree::{
    EntryId, EntryKind, FsEntry, FsTree, MetadataRef, MetadataSection,
};
use crate::mets::xml::Element;

pub const METS_NS: &str = "http://www.loc.gov/METS/";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const METS_SCHEMA_LOCATION: &str =
    "http://www.loc.gov/METS/ http://www.loc.gov/standards/mets/version1121/mets.xsd";
const STRUCT_MAP_LABEL: &str = "Archivematica default";

#[derive(Debug, Clone)]
pub struct MetsDocument {
    tree: FsTree,
}

impl MetsDocument {
    pub fn new(tree: FsTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &FsTree {
        &self.tree
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DataverseError> {
        let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.to_element(&created)?.to_document()
    }

    /// Serializes the whole document in memory, then replaces `path` in one
    /// rename so a failed run never leaves a truncated METS behind.
    pub fn write(&self, path: &Utf8Path) -> Result<(), DataverseError> {
        let bytes = self.to_bytes()?;
        fs_util::write_atomic(path, &bytes)?;
        debug!(path = %path, bytes = bytes.len(), "wrote METS document");
        Ok(())
    }

    pub fn from_file(path: &Utf8Path) -> Result<Self, DataverseError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
            DataverseError::MetadataUnavailable {
                path: path.to_string(),
                reason: err.to_string(),
            }
        })?;
        Self::parse(&content).map_err(|reason| DataverseError::MetsParse {
            path: path.to_string(),
            reason,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let root = Element::parse(content)?;
        Ok(Self {
            tree: MetsReader::read(&root)?,
        })
    }

    /// Descriptive metadata attached to directories, i.e. the dataset-level
    /// DDI and the dataset.json reference.
    pub fn sip_dmdsecs(&self) -> Vec<&MetadataSection> {
        self.tree
            .all_files()
            .filter(|(_, entry)| entry.is_directory())
            .flat_map(|(_, entry)| entry.dmdsecs.iter())
            .collect()
    }

    /// Descriptive metadata of the first file whose path ends with `tabfile`.
    pub fn tabfile_dmdsecs(&self, tabfile: &str) -> Option<&[MetadataSection]> {
        self.tree
            .all_files()
            .find(|(_, entry)| entry.kind == EntryKind::Item && entry.path_str().ends_with(tabfile))
            .map(|(_, entry)| entry.dmdsecs.as_slice())
    }

    pub fn to_element(&self, created: &str) -> Result<Element, DataverseError> {
        let order = self.tree.walk();

        let mut root = Element::new("mets:mets")
            .with_attr("xmlns:mets", METS_NS)
            .with_attr("xmlns:xlink", XLINK_NS)
            .with_attr("xmlns:xsi", XSI_NS)
            .with_attr("xsi:schemaLocation", METS_SCHEMA_LOCATION);
        root.push(Element::new("mets:metsHdr").with_attr("CREATEDATE", created));

        let mut dmd_ids: HashMap<EntryId, Vec<String>> = HashMap::new();
        let mut counter = 0usize;
        for id in &order {
            for section in &self.tree.get(*id).dmdsecs {
                counter += 1;
                let dmd_id = format!("dmdSec_{counter}");
                root.push(dmdsec_element(&dmd_id, created, section));
                dmd_ids.entry(*id).or_default().push(dmd_id);
            }
        }

        let mut groups: Vec<(FileUse, Element)> = Vec::new();
        for id in &order {
            let entry = self.tree.get(*id);
            if entry.kind != EntryKind::Item {
                continue;
            }
            let file_use = entry.file_use.ok_or_else(|| {
                DataverseError::MetsStructure(format!("{} has no file use", entry.path_str()))
            })?;
            let file = file_element(&self.tree, entry)?;
            match groups.iter_mut().find(|(group_use, _)| *group_use == file_use) {
                Some((_, group)) => group.push(file),
                None => groups.push((
                    file_use,
                    Element::new("mets:fileGrp")
                        .with_attr("USE", file_use.as_str())
                        .with_child(file),
                )),
            }
        }
        let mut file_sec = Element::new("mets:fileSec");
        for (_, group) in groups {
            file_sec.push(group);
        }
        root.push(file_sec);

        let struct_map = Element::new("mets:structMap")
            .with_attr("ID", "structMap_1")
            .with_attr("LABEL", STRUCT_MAP_LABEL)
            .with_attr("TYPE", "physical")
            .with_child(div_element(&self.tree, self.tree.root(), &dmd_ids)?);
        root.push(struct_map);

        Ok(root)
    }
}

fn file_id(uuid: &Uuid) -> String {
    format!("file-{uuid}")
}

fn group_id(uuid: &Uuid) -> String {
    format!("Group-{uuid}")
}

fn require_uuid(entry: &FsEntry) -> Result<&Uuid, DataverseError> {
    entry.file_uuid.as_ref().ok_or_else(|| {
        DataverseError::MetsStructure(format!("{} has no file identifier", entry.path_str()))
    })
}

fn dmdsec_element(dmd_id: &str, created: &str, section: &MetadataSection) -> Element {
    let body = match section {
        MetadataSection::Wrap { mdtype, body } => Element::new("mets:mdWrap")
            .with_attr("MDTYPE", mdtype.as_str())
            .with_child(Element::new("mets:xmlData").with_child(body.clone())),
        MetadataSection::Reference(reference) => {
            let mut element = Element::new("mets:mdRef")
                .with_attr("LOCTYPE", reference.loctype.as_str());
            if let Some(other) = &reference.otherloctype {
                element.set_attr("OTHERLOCTYPE", other.as_str());
            }
            element
                .with_attr("xlink:href", reference.href.as_str())
                .with_attr("MDTYPE", reference.mdtype.as_str())
                .with_attr("LABEL", reference.label.as_str())
        }
    };
    Element::new("mets:dmdSec")
        .with_attr("ID", dmd_id)
        .with_attr("CREATED", created)
        .with_child(body)
}

fn file_element(tree: &FsTree, entry: &FsEntry) -> Result<Element, DataverseError> {
    let uuid = require_uuid(entry)?;
    // Derivatives share the group of the file they were made from.
    let group_uuid = match entry.derived_from {
        Some(source) => require_uuid(tree.get(source))?,
        None => uuid,
    };

    let mut file = Element::new("mets:file")
        .with_attr("ID", file_id(uuid))
        .with_attr("GROUPID", group_id(group_uuid));
    if let Some(checksum) = &entry.checksum {
        file.set_attr("CHECKSUM", checksum.value.as_str());
        file.set_attr("CHECKSUMTYPE", checksum.kind.mets_name());
    }
    Ok(file.with_child(
        Element::new("mets:FLocat")
            .with_attr("xlink:href", entry.path_str())
            .with_attr("LOCTYPE", "OTHER")
            .with_attr("OTHERLOCTYPE", "SYSTEM"),
    ))
}

fn div_element(
    tree: &FsTree,
    id: EntryId,
    dmd_ids: &HashMap<EntryId, Vec<String>>,
) -> Result<Element, DataverseError> {
    let entry = tree.get(id);
    let mut div = Element::new("mets:div")
        .with_attr("TYPE", entry.kind.as_str())
        .with_attr("LABEL", entry.label.as_str());
    if let Some(ids) = dmd_ids.get(&id) {
        div.set_attr("DMDID", ids.join(" "));
    }
    match entry.kind {
        EntryKind::Item => {
            div.push(Element::new("mets:fptr").with_attr("FILEID", file_id(require_uuid(entry)?)));
        }
        EntryKind::Directory => {
            for child in entry.children() {
                div.push(div_element(tree, *child, dmd_ids)?);
            }
        }
    }
    Ok(div)
}

struct FileInfo {
    uuid: Uuid,
    group: Uuid,
    file_use: FileUse,
    href: String,
    checksum: Option<Checksum>,
}

struct MetsReader {
    dmdsecs: HashMap<String, MetadataSection>,
    files: HashMap<String, FileInfo>,
}

impl MetsReader {
    fn read(root: &Element) -> Result<FsTree, String> {
        if root.local_name() != "mets" {
            return Err(format!("unexpected root element {}", root.name));
        }
        let reader = Self {
            dmdsecs: read_dmdsecs(root)?,
            files: read_files(root)?,
        };

        let struct_map = root
            .children_named("structMap")
            .find(|map| map.attr("TYPE").map(|kind| kind.eq_ignore_ascii_case("physical")).unwrap_or(true))
            .ok_or_else(|| "no physical structMap".to_string())?;
        let root_div = struct_map
            .child("div")
            .ok_or_else(|| "structMap has no div".to_string())?;

        let mut tree = FsTree::new(root_div.attr("LABEL").unwrap_or_default());
        let root_id = tree.root();
        tree.get_mut(root_id).dmdsecs = reader.sections_for(root_div)?;
        for child in root_div.children_named("div") {
            reader.add_div(&mut tree, root_id, child)?;
        }
        Ok(tree)
    }

    fn sections_for(&self, div: &Element) -> Result<Vec<MetadataSection>, String> {
        div.attr("DMDID")
            .unwrap_or_default()
            .split_whitespace()
            .map(|id| {
                self.dmdsecs
                    .get(id)
                    .cloned()
                    .ok_or_else(|| format!("div refers to missing dmdSec {id}"))
            })
            .collect()
    }

    fn add_div(&self, tree: &mut FsTree, parent: EntryId, div: &Element) -> Result<(), String> {
        let label = div.attr("LABEL").unwrap_or_default();
        let sections = self.sections_for(div)?;
        match div.attr("TYPE") {
            Some("Directory") => {
                let path = match &tree.get(parent).path {
                    Some(parent_path) => format!("{parent_path}/{label}"),
                    None => label.to_string(),
                };
                let mut entry = FsEntry::directory(path).with_label(label);
                entry.dmdsecs = sections;
                let id = tree.add_child(parent, entry).map_err(|err| err.to_string())?;
                for child in div.children_named("div") {
                    self.add_div(tree, id, child)?;
                }
            }
            Some("Item") => {
                let file_id = div
                    .child("fptr")
                    .and_then(|fptr| fptr.attr("FILEID"))
                    .ok_or_else(|| format!("item {label} has no fptr"))?;
                let info = self
                    .files
                    .get(file_id)
                    .ok_or_else(|| format!("fptr refers to missing file {file_id}"))?;

                let mut entry = FsEntry::item(info.href.clone(), info.file_use)
                    .with_uuid(info.uuid)
                    .with_label(label);
                if let Some(checksum) = &info.checksum {
                    entry = entry.with_checksum(checksum.clone());
                }
                if info.group != info.uuid {
                    let source = tree
                        .find_by_uuid(&info.group)
                        .ok_or_else(|| format!("{} is derived from an unknown file", info.href))?;
                    entry = entry.with_derived_from(source);
                }
                entry.dmdsecs = sections;
                tree.add_child(parent, entry).map_err(|err| err.to_string())?;
            }
            other => return Err(format!("unsupported div TYPE {other:?} for {label}")),
        }
        Ok(())
    }
}

fn read_dmdsecs(root: &Element) -> Result<HashMap<String, MetadataSection>, String> {
    let mut sections = HashMap::new();
    for dmdsec in root.children_named("dmdSec") {
        let id = dmdsec
            .attr("ID")
            .ok_or_else(|| "dmdSec without ID".to_string())?;
        let section = if let Some(wrap) = dmdsec.child("mdWrap") {
            let body = wrap
                .child("xmlData")
                .and_then(|data| data.children.first())
                .ok_or_else(|| format!("dmdSec {id} has no xmlData"))?;
            MetadataSection::Wrap {
                mdtype: wrap.attr("MDTYPE").unwrap_or("OTHER").to_string(),
                body: body.clone(),
            }
        } else if let Some(reference) = dmdsec.child("mdRef") {
            MetadataSection::Reference(MetadataRef {
                mdtype: reference.attr("MDTYPE").unwrap_or("OTHER").to_string(),
                label: reference.attr("LABEL").unwrap_or_default().to_string(),
                href: reference.attr("href").unwrap_or_default().to_string(),
                loctype: reference.attr("LOCTYPE").unwrap_or("OTHER").to_string(),
                otherloctype: reference.attr("OTHERLOCTYPE").map(str::to_string),
            })
        } else {
            return Err(format!("dmdSec {id} has neither mdWrap nor mdRef"));
        };
        sections.insert(id.to_string(), section);
    }
    Ok(sections)
}

fn read_files(root: &Element) -> Result<HashMap<String, FileInfo>, String> {
    let mut files = HashMap::new();
    let Some(file_sec) = root.child("fileSec") else {
        return Ok(files);
    };
    for group in file_sec.children_named("fileGrp") {
        let file_use: FileUse = group
            .attr("USE")
            .ok_or_else(|| "fileGrp without USE".to_string())?
            .parse()?;
        for file in group.children_named("file") {
            let id = file
                .attr("ID")
                .ok_or_else(|| "file without ID".to_string())?;
            let uuid = parse_prefixed_uuid(id, "file-")?;
            let group_uuid = match file.attr("GROUPID") {
                Some(group_id) => parse_prefixed_uuid(group_id, "Group-")?,
                None => uuid,
            };
            let href = file
                .child("FLocat")
                .and_then(|flocat| flocat.attr("href"))
                .ok_or_else(|| format!("file {id} has no FLocat"))?;
            let checksum = match (file.attr("CHECKSUM"), file.attr("CHECKSUMTYPE")) {
                (Some(value), Some(kind)) => Some(Checksum {
                    kind: ChecksumType::from_label(kind).map_err(|err| err.to_string())?,
                    value: value.to_string(),
                }),
                _ => None,
            };
            files.insert(
                id.to_string(),
                FileInfo {
                    uuid,
                    group: group_uuid,
                    file_use,
                    href: href.to_string(),
                    checksum,
                },
            );
        }
    }
    Ok(files)
}

fn parse_prefixed_uuid(value: &str, prefix: &str) -> Result<Uuid, String> {
    let raw = value.strip_prefix(prefix).unwrap_or(value);
    Uuid::parse_str(raw).map_err(|_| format!("invalid identifier {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> FsTree {
        let mut tree = FsTree::new("A study of my afternoon drinks");
        let root = tree.root();
        tree.get_mut(root).dmdsecs.push(MetadataSection::Reference(MetadataRef::system(
            "OTHER",
            "dataset.json",
            "metadata/dataset.json",
        )));
        let bundle = tree.add_child(root, FsEntry::directory("drinks")).unwrap();
        let original = tree
            .add_child(
                bundle,
                FsEntry::item("drinks/drinks.csv", FileUse::Original)
                    .with_checksum(Checksum::md5("7d9c2a3ab4b5a7c8a3c4b1e6f3a2d1c0")),
            )
            .unwrap();
        tree.add_child(
            bundle,
            FsEntry::item("drinks/drinks.tab", FileUse::Derivative)
                .with_derived_from(original)
                .with_dmdsec(MetadataSection::Reference(MetadataRef::system(
                    "DDI",
                    "drinks-ddi.xml",
                    "drinks/drinks-ddi.xml",
                ))),
        )
        .unwrap();
        tree
    }

    #[test]
    fn serialized_document_parses_back() {
        let document = MetsDocument::new(sample_tree());
        let bytes = document.to_bytes().unwrap();
        let parsed = MetsDocument::parse(std::str::from_utf8(&bytes).unwrap()).unwrap();
        let tree = parsed.tree();

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.count(EntryKind::Directory), 2);
        assert_eq!(tree.get(tree.root()).label, "A study of my afternoon drinks");

        let original = tree.find_by_path("drinks/drinks.csv").unwrap();
        let derivative = tree.get(tree.find_by_path("drinks/drinks.tab").unwrap());
        assert_eq!(derivative.derived_from, Some(original));
        assert_eq!(derivative.file_use, Some(FileUse::Derivative));
        assert_eq!(derivative.dmdsecs[0].mdtype(), "DDI");
        assert_eq!(
            tree.get(original).checksum.as_ref().map(|c| c.value.as_str()),
            Some("7d9c2a3ab4b5a7c8a3c4b1e6f3a2d1c0")
        );
        assert_eq!(parsed.sip_dmdsecs().len(), 1);
        assert_eq!(parsed.tabfile_dmdsecs("drinks.tab").map(<[_]>::len), Some(1));
    }

    #[test]
    fn groups_files_by_use() {
        let document = MetsDocument::new(sample_tree());
        let root = document.to_element("2026-01-01T00:00:00").unwrap();
        let groups = root.descendants("fileGrp");
        let uses: Vec<_> = groups.iter().filter_map(|group| group.attr("USE")).collect();
        assert_eq!(uses, vec!["original", "derivative"]);
    }

    #[test]
    fn rejects_fptr_to_unknown_file() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<mets:mets xmlns:mets="http://www.loc.gov/METS/">
  <mets:structMap TYPE="physical">
    <mets:div TYPE="Directory" LABEL="root">
      <mets:div TYPE="Item" LABEL="a.csv"><mets:fptr FILEID="file-missing"/></mets:div>
    </mets:div>
  </mets:structMap>
</mets:mets>"#;
        let err = MetsDocument::parse(xml).unwrap_err();
        assert!(err.contains("missing file"));
    }
}
