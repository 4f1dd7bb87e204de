use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::dataset::{CitationField, Dataset};
use crate::error::StructureIssue;
use crate::mets::xml::Element;

pub const DDI_NS: &str = "http://www.icpsr.umich.edu/DDI";
pub const DDI_VERSION: &str = "2.5";
const DDI_SCHEMA_LOCATION: &str =
    "http://www.ddialliance.org/Specification/DDI-Codebook/2.5/XMLSchema/codebook.xsd";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationDescriptor {
    pub title: String,
    pub author: String,
    pub pid_type: String,
    pub pid: String,
    pub release_date: String,
    pub version_state: String,
    pub version_number: String,
    pub restriction: String,
    pub distributor: String,
}

impl CitationDescriptor {
    pub fn from_dataset(dataset: &Dataset) -> Result<Self, StructureIssue> {
        let version = &dataset.version;
        let (title, author) = title_and_author(version.citation_fields())?;

        Ok(Self {
            title,
            author,
            pid_type: dataset.protocol.clone().unwrap_or_default(),
            pid: dataset.persistent_identifier(),
            release_date: version.release_time.clone().unwrap_or_default(),
            version_state: version.version_state.clone().unwrap_or_default(),
            version_number: format!(
                "{}.{}",
                scalar_text(version.version_number.as_ref()),
                scalar_text(version.version_minor_number.as_ref())
            ),
            restriction: version.terms_of_use.clone().unwrap_or_default(),
            distributor: dataset.publisher.clone().unwrap_or_default(),
        })
    }

    pub fn is_draft(&self) -> bool {
        self.version_state == "DRAFT"
    }

    fn labelled_fields(&self) -> [(&'static str, &str); 9] {
        [
            ("Title", self.title.as_str()),
            ("Author", self.author.as_str()),
            ("PID Type", self.pid_type.as_str()),
            ("IDNO", self.pid.as_str()),
            ("Version Date", self.release_date.as_str()),
            ("Version Type", self.version_state.as_str()),
            ("Version Number", self.version_number.as_str()),
            ("Restriction Text", self.restriction.as_str()),
            ("Distributor Text", self.distributor.as_str()),
        ]
    }

    /// Lists the retrieved fields on the job output and flags draft
    /// datasets. Drafts are allowed through.
    pub fn report(&self, sink: &dyn ProgressSink) {
        sink.event(ProgressEvent::message("Fields retrieved from Dataverse:"));
        for (label, value) in self.labelled_fields() {
            sink.event(ProgressEvent::message(format!("{label}: {value}")));
        }
        if self.is_draft() {
            let message = "Dataset is in a DRAFT state and may not transfer correctly";
            warn!(title = %self.title, "{message}");
            sink.event(ProgressEvent::message(message));
        }
    }

    pub fn render(&self) -> Element {
        let ddi = |name: &str| Element::new(format!("ddi:{name}"));

        let citation = ddi("citation")
            .with_child(
                ddi("titlStmt")
                    .with_child(ddi("titl").with_text(&self.title))
                    .with_child(
                        ddi("IDNo")
                            .with_attr("agency", &self.pid_type)
                            .with_text(&self.pid),
                    ),
            )
            .with_child(ddi("rspStmt").with_child(ddi("AuthEnty").with_text(&self.author)))
            .with_child(ddi("distStmt").with_child(ddi("distrbtr").with_text(&self.distributor)))
            .with_child(
                ddi("verStmt").with_child(
                    ddi("version")
                        .with_attr("date", &self.release_date)
                        .with_attr("type", &self.version_state)
                        .with_text(&self.version_number),
                ),
            );
        let data_access = ddi("dataAccs").with_child(
            ddi("useStmt").with_child(ddi("restrctn").with_text(&self.restriction)),
        );

        ddi("codebook")
            .with_attr("xmlns:ddi", DDI_NS)
            .with_attr("xmlns:xsi", XSI_NS)
            .with_attr("version", DDI_VERSION)
            .with_attr("xsi:schemaLocation", DDI_SCHEMA_LOCATION)
            .with_child(ddi("stdyDscr").with_child(citation).with_child(data_access))
    }
}

fn title_and_author(fields: &[CitationField]) -> Result<(String, String), StructureIssue> {
    if fields.is_empty() {
        return Err(StructureIssue::MissingCitationFields);
    }

    let title = fields
        .iter()
        .find(|field| field.type_name == "title")
        .and_then(|field| field.value.as_str())
        .map(|title| title.trim().to_string())
        .ok_or(StructureIssue::MissingTitle)?;

    let author = fields
        .iter()
        .find(|field| field.type_name == "author")
        .and_then(|field| field.value.get(0))
        .and_then(|first| first.get("authorName"))
        .and_then(|name| name.get("value"))
        .and_then(Value::as_str)
        .map(|author| author.trim().to_string())
        .ok_or(StructureIssue::MissingAuthor)?;

    info!(%title, %author, "citation data retrieved");
    Ok((title, author))
}

/// `versionNumber` arrives as a number from the API and occasionally as a
/// string; absent values render empty.
fn scalar_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Default)]
    struct Collect(RefCell<Vec<String>>);

    impl ProgressSink for Collect {
        fn event(&self, event: ProgressEvent) {
            self.0.borrow_mut().push(event.message);
        }
    }

    fn dataset(version: &str) -> Dataset {
        let json = format!(
            r#"{{
                "protocol": "doi",
                "authority": "10.5072/FK2",
                "identifier": "XYZ",
                "persistentUrl": "https://doi.org/10.5072/FK2/XYZ",
                "publisher": "Root Dataverse",
                "latestVersion": {version}
            }}"#
        );
        Dataset::from_json(&json).unwrap()
    }

    const CITATION: &str = r#"{"fields": [
        {"typeName": "title", "value": "  Bird counts 2018 "},
        {"typeName": "author", "value": [{"authorName": {"value": "Dodo, Dirk"}}]}
    ]}"#;

    #[test]
    fn descriptor_fields() {
        let dataset = dataset(&format!(
            r#"{{"metadataBlocks": {{"citation": {CITATION}}},
                "versionState": "RELEASED", "versionNumber": 2, "versionMinorNumber": 0,
                "releaseTime": "2018-05-09T20:26:49Z", "termsOfUse": "CC0 Waiver"}}"#
        ));
        let descriptor = CitationDescriptor::from_dataset(&dataset).unwrap();
        assert_eq!(descriptor.title, "Bird counts 2018");
        assert_eq!(descriptor.author, "Dodo, Dirk");
        assert_eq!(descriptor.pid, "https://doi.org/10.5072/FK2/XYZ");
        assert_eq!(descriptor.pid_type, "doi");
        assert_eq!(descriptor.version_number, "2.0");
        assert_eq!(descriptor.distributor, "Root Dataverse");
    }

    #[test]
    fn missing_citation_data() {
        let empty = dataset(r#"{"metadataBlocks": {"citation": {"fields": []}}}"#);
        assert_matches!(
            CitationDescriptor::from_dataset(&empty),
            Err(StructureIssue::MissingCitationFields)
        );

        let no_author = dataset(
            r#"{"metadataBlocks": {"citation": {"fields": [
                {"typeName": "title", "value": "T"},
                {"typeName": "author", "value": [{"authorAffiliation": {"value": "X"}}]}
            ]}}}"#,
        );
        assert_matches!(
            CitationDescriptor::from_dataset(&no_author),
            Err(StructureIssue::MissingAuthor)
        );

        let no_title = dataset(
            r#"{"metadataBlocks": {"citation": {"fields": [
                {"typeName": "author", "value": [{"authorName": {"value": "A"}}]}
            ]}}}"#,
        );
        assert_matches!(
            CitationDescriptor::from_dataset(&no_title),
            Err(StructureIssue::MissingTitle)
        );
    }

    #[test]
    fn draft_is_reported_not_rejected() {
        let dataset = dataset(&format!(
            r#"{{"metadataBlocks": {{"citation": {CITATION}}}, "versionState": "DRAFT"}}"#
        ));
        let descriptor = CitationDescriptor::from_dataset(&dataset).unwrap();
        assert_eq!(descriptor.version_number, ".");

        let sink = Collect::default();
        descriptor.report(&sink);
        let messages = sink.0.borrow();
        assert_eq!(messages[0], "Fields retrieved from Dataverse:");
        assert!(messages.iter().any(|m| m.contains("DRAFT state")));
    }

    #[test]
    fn codebook_layout() {
        let dataset = dataset(&format!(
            r#"{{"metadataBlocks": {{"citation": {CITATION}}}, "versionState": "RELEASED"}}"#
        ));
        let codebook = CitationDescriptor::from_dataset(&dataset).unwrap().render();

        assert_eq!(codebook.attr("version"), Some("2.5"));
        assert_eq!(codebook.attr("xmlns:ddi"), Some(DDI_NS));
        let titl = codebook.descendants("titl");
        assert_eq!(titl[0].text(), Some("Bird counts 2018"));
        let idno = codebook.descendants("IDNo");
        assert_eq!(idno[0].attr("agency"), Some("doi"));
        assert_eq!(idno[0].text(), Some("https://doi.org/10.5072/FK2/XYZ"));
        assert_eq!(codebook.descendants("restrctn").len(), 1);
    }
}
