use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use dataverse_mets::app::{App, StageOptions};
use dataverse_mets::config::ResolvedConfig;
use dataverse_mets::domain::{ChecksumType, FileUse, RestrictedPolicy};
use dataverse_mets::error::{DataverseError, StructureIssue};
use dataverse_mets::mets::xml::Element;
use dataverse_mets::mets::{EntryKind, MetadataSection, MetsDocument};
use dataverse_mets::output::JsonOutput;

const API_TABULAR: &str = include_str!("fixtures/api_tabular.json");
const WEB_UI_MIXED: &str = include_str!("fixtures/web_ui_mixed.json");

fn transfer_with(dataset: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let unit = Utf8PathBuf::from_path_buf(temp.path().join("dataverse-transfer")).unwrap();
    fs::create_dir_all(unit.join("metadata")).unwrap();
    fs::write(unit.join("metadata/dataset.json"), dataset).unwrap();
    (temp, unit)
}

fn convert(unit: &Utf8Path) -> Result<MetsDocument, DataverseError> {
    let app = App::new(ResolvedConfig::default());
    app.convert(unit, &StageOptions::default(), &JsonOutput)?;
    MetsDocument::from_file(&unit.join("metadata/METS.xml"))
}

fn mets_xml(unit: &Utf8Path) -> Element {
    let content = fs::read_to_string(unit.join("metadata/METS.xml")).unwrap();
    Element::parse(&content).unwrap()
}

#[test]
fn tabular_file_expands_into_bundle() {
    let (_temp, unit) = transfer_with(API_TABULAR);
    let document = convert(&unit).unwrap();
    let tree = document.tree();

    assert_eq!(tree.count(EntryKind::Directory), 3);
    assert_eq!(tree.count(EntryKind::Item), 7);
    assert_eq!(tree.len(), 10);

    let expected = [
        ("BIRD/BIRD.csv", FileUse::Original),
        ("BIRD/BIRD.RData", FileUse::Derivative),
        ("BIRD/BIRD.tab", FileUse::Derivative),
        ("BIRD/BIRD-ddi.xml", FileUse::Metadata),
        ("BIRD/BIRDcitation-endnote.xml", FileUse::Metadata),
        ("BIRD/BIRDcitation-ris.ris", FileUse::Metadata),
        ("metadata/dataset.json", FileUse::Metadata),
    ];
    for (path, file_use) in expected {
        let id = tree.find_by_path(path).unwrap_or_else(|| panic!("{path} missing"));
        assert_eq!(tree.get(id).file_use, Some(file_use), "{path}");
    }

    let original = tree.find_by_path("BIRD/BIRD.csv").unwrap();
    let checksum = tree.get(original).checksum.clone().unwrap();
    assert_eq!(checksum.kind, ChecksumType::Md5);
    assert_eq!(checksum.value, "4ca2a78963445bce067e027e10394b61");
    for path in ["BIRD/BIRD.RData", "BIRD/BIRD.tab", "BIRD/BIRDcitation-ris.ris"] {
        let id = tree.find_by_path(path).unwrap();
        assert_eq!(tree.get(id).derived_from, Some(original), "{path}");
    }

    let tab = tree.get(tree.find_by_path("BIRD/BIRD.tab").unwrap());
    assert_eq!(tab.dmdsecs.len(), 1);
    assert_matches!(
        &tab.dmdsecs[0],
        MetadataSection::Reference(reference)
            if reference.mdtype == "DDI" && reference.href == "BIRD/BIRD-ddi.xml"
    );
}

#[test]
fn metadata_references_are_dataset_json_or_ddi() {
    let (_temp, unit) = transfer_with(API_TABULAR);
    convert(&unit).unwrap();
    let root = mets_xml(&unit);

    let references = root.descendants("mdRef");
    assert_eq!(references.len(), 2);
    for reference in references {
        let is_dataset = reference.attr("LABEL") == Some("dataset.json")
            && reference.attr("href") == Some("metadata/dataset.json");
        assert!(is_dataset || reference.attr("MDTYPE") == Some("DDI"));
    }
}

#[test]
fn ddi_citation_matches_dataset() {
    let (_temp, unit) = transfer_with(API_TABULAR);
    let document = convert(&unit).unwrap();
    let root = mets_xml(&unit);

    let titl = root.descendants("titl");
    assert_eq!(titl.len(), 1);
    assert_eq!(titl[0].text(), Some("A study with restricted data"));
    let idno = root.descendants("IDNo");
    assert_eq!(idno[0].text(), Some("https://doi.org/10.5072/FK2/UNRWDG"));
    assert_eq!(idno[0].attr("agency"), Some("doi"));
    let version = root.descendants("version");
    assert_eq!(version[0].text(), Some("1.0"));
    assert_eq!(version[0].attr("type"), Some("RELEASED"));

    let sip = document.sip_dmdsecs();
    assert_eq!(sip.len(), 2);
    assert_eq!(sip[0].mdtype(), "DDI");
    assert_eq!(
        document.tree().get(document.tree().root()).label,
        "A study with restricted data"
    );
}

#[test]
fn rerun_produces_same_structure() {
    let (_temp, unit) = transfer_with(WEB_UI_MIXED);
    let summary = |document: &MetsDocument| {
        document
            .tree()
            .all_files()
            .map(|(_, entry)| {
                (
                    entry.path.clone(),
                    entry.kind,
                    entry.file_use,
                    entry.checksum.clone(),
                    entry.dmdsecs.len(),
                )
            })
            .collect::<Vec<_>>()
    };
    let first = summary(&convert(&unit).unwrap());
    let second = summary(&convert(&unit).unwrap());
    assert_eq!(first, second);
}

#[test]
fn web_ui_export_with_mixed_files() {
    let (_temp, unit) = transfer_with(WEB_UI_MIXED);
    let app = App::new(ResolvedConfig::default());
    let result = app
        .convert(&unit, &StageOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.export_shape, "WebUi");
    assert!(result.draft);
    assert!(!result.metadata_only);
    assert_eq!(result.directories, 4);
    assert_eq!(result.items, 15);

    let document = MetsDocument::from_file(&unit.join("metadata/METS.xml")).unwrap();
    let tree = document.tree();
    assert!(tree.find_by_path("responses/responses.RData").is_some());
    assert!(tree.find_by_path("panel/panel.dta").is_some());
    assert!(tree.find_by_path("panel/panel.RData").is_some());
    let zip = tree.get(tree.find_by_path("photos.zip").unwrap());
    assert_eq!(
        zip.checksum.as_ref().map(|checksum| checksum.kind),
        Some(ChecksumType::Sha256)
    );
    assert_eq!(mets_xml(&unit).descendants("mdRef").len(), 3);
}

#[test]
fn restricted_files_fail_under_strict_policy() {
    let (_temp, unit) = transfer_with(WEB_UI_MIXED);
    let config = ResolvedConfig {
        restricted_policy: RestrictedPolicy::Fail,
        ..ResolvedConfig::default()
    };
    let err = App::new(config)
        .convert(&unit, &StageOptions::default(), &JsonOutput)
        .unwrap_err();
    assert_matches!(
        err,
        DataverseError::Structure(StructureIssue::RestrictedAccess { path }) if path == "interviews.txt"
    );
    assert!(!unit.join("metadata/METS.xml").exists());
}

fn edited_fixture(edit: impl FnOnce(&mut serde_json::Value)) -> String {
    let mut dataset: serde_json::Value = serde_json::from_str(API_TABULAR).unwrap();
    edit(&mut dataset);
    dataset.to_string()
}

#[test]
fn metadata_only_transfer() {
    let dataset = edited_fixture(|dataset| {
        dataset["latestVersion"]["files"] = serde_json::json!([]);
    });
    let (_temp, unit) = transfer_with(&dataset);
    let app = App::new(ResolvedConfig::default());
    let result = app
        .convert(&unit, &StageOptions::default(), &JsonOutput)
        .unwrap();

    assert!(result.metadata_only);
    assert_eq!(result.directories, 2);
    assert_eq!(result.items, 1);
}

#[test]
fn missing_checksum_writes_nothing() {
    let dataset = edited_fixture(|dataset| {
        let data_file = &mut dataset["latestVersion"]["files"][0]["dataFile"];
        let data_file = data_file.as_object_mut().unwrap();
        data_file.remove("md5");
        data_file.remove("checksum");
    });
    let (_temp, unit) = transfer_with(&dataset);
    let err = convert(&unit).unwrap_err();
    assert_matches!(
        err,
        DataverseError::Structure(StructureIssue::MissingChecksum { path }) if path == "BIRD/BIRD.csv"
    );
    assert!(!unit.join("metadata/METS.xml").exists());
}

#[test]
fn missing_dataset_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let unit = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let err = convert(&unit).unwrap_err();
    assert_matches!(err, DataverseError::MetadataUnavailable { .. });
}

#[test]
fn output_location_override() {
    let (temp, unit) = transfer_with(API_TABULAR);
    let output_dir = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let options = StageOptions {
        output_dir: Some(output_dir.clone()),
        output_name: Some("METS.dataverse.xml".to_string()),
        ..StageOptions::default()
    };
    let result = App::new(ResolvedConfig::default())
        .convert(&unit, &options, &JsonOutput)
        .unwrap();

    assert_eq!(result.mets_path, output_dir.join("METS.dataverse.xml").as_str());
    assert!(output_dir.join("METS.dataverse.xml").exists());
    assert!(!unit.join("metadata/METS.xml").exists());
}
