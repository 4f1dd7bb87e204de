use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::ExternalAgent;
use crate::app::{ProgressEvent, ProgressSink};
use crate::checksum::{self, FixityCheck, FixityOutcome};
use crate::domain::FileUse;
use crate::error::{DataverseError, MatchFailure, MatchFailureReason};
use crate::layout::TransferLayout;
use crate::mets::tree::{EntryId, FsEntry, FsTree, basename};
use crate::records::{ChangeSet, FileRecord, NewDerivation, NewEvent};

pub const DERIVATION_EVENT: &str = "derivation";
pub const FIXITY_EVENT: &str = "fixity check";
const R_DATA_SUFFIX: &str = ".RData";

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings<'a> {
    pub objects_dir: &'a str,
    /// Label of the dataset metadata entry, which has no file record.
    pub dataset_name: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileStats {
    pub matched: usize,
    pub basename_matches: usize,
    pub skipped: usize,
    pub skipped_derivations: usize,
    pub fixity_passed: usize,
    pub fixity_failed: usize,
    pub fixity_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub changes: ChangeSet,
    pub stats: ReconcileStats,
}

/// METS entry to file record, in structMap order.
pub struct Mapping<'r> {
    pairs: Vec<(EntryId, &'r FileRecord)>,
    by_entry: HashMap<EntryId, &'r FileRecord>,
}

impl<'r> Mapping<'r> {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, entry: EntryId) -> Option<&'r FileRecord> {
        self.by_entry.get(&entry).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &'r FileRecord)> + '_ {
        self.pairs.iter().copied()
    }
}

pub struct Reconciler<'a> {
    layout: &'a TransferLayout,
    settings: ReconcileSettings<'a>,
    sink: &'a dyn ProgressSink,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        layout: &'a TransferLayout,
        settings: ReconcileSettings<'a>,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            layout,
            settings,
            sink,
        }
    }

    pub fn plan(
        &self,
        tree: &FsTree,
        records: &[FileRecord],
        agents: Vec<ExternalAgent>,
    ) -> Result<ReconcilePlan, DataverseError> {
        let mut stats = ReconcileStats::default();
        let mapping = self.match_entries(tree, records, &mut stats)?;

        let mut changes = ChangeSet {
            agents,
            ..ChangeSet::default()
        };
        self.plan_use_updates(tree, &mapping, &mut changes);
        self.plan_derivations(tree, &mapping, &mut changes, &mut stats);
        self.plan_fixity(tree, &mapping, &mut changes, &mut stats)?;

        Ok(ReconcilePlan { changes, stats })
    }

    pub fn match_entries<'r>(
        &self,
        tree: &FsTree,
        records: &'r [FileRecord],
        stats: &mut ReconcileStats,
    ) -> Result<Mapping<'r>, DataverseError> {
        let mut mapping = Mapping {
            pairs: Vec::new(),
            by_entry: HashMap::new(),
        };
        let mut claimed: HashMap<Uuid, String> = HashMap::new();
        let mut failures = Vec::new();

        for (id, entry) in tree.all_files() {
            if entry.is_directory() {
                continue;
            }
            if self.is_skipped(entry) {
                stats.skipped += 1;
                continue;
            }

            let path = entry.path_str();
            let relative = format!("{}/{}", self.settings.objects_dir, path);
            let found = match unique_match(records, &relative) {
                Ok(record) => Ok(record),
                Err(reason) => {
                    info!(%path, ?reason, "no unique record by relative path, trying base name");
                    let found = unique_match(records, basename(path));
                    if found.is_ok() {
                        stats.basename_matches += 1;
                    }
                    found
                }
            };

            let reason = match found {
                Ok(record) => {
                    // An UNKNOWN-format original keeps the tab file's name, so
                    // two entries with one path may share a record.
                    let taken = claimed
                        .get(&record.uuid)
                        .is_some_and(|owner| owner.as_str() != path);
                    if !taken {
                        claimed.insert(record.uuid, path.to_string());
                        self.sink.event(ProgressEvent::message(format!(
                            "Matched {path} to file {}",
                            record.uuid
                        )));
                        mapping.pairs.push((id, record));
                        mapping.by_entry.insert(id, record);
                        continue;
                    }
                    MatchFailureReason::Duplicate
                }
                Err(reason) => reason,
            };
            let failure = MatchFailure {
                path: path.to_string(),
                reason,
            };
            error!(
                %failure,
                checksum = entry.checksum.as_ref().map(|c| c.value.as_str()).unwrap_or(""),
                "could not find file in the database"
            );
            failures.push(failure);
        }

        if !failures.is_empty() {
            error!(
                unresolved = failures.len(),
                "returning the database objects for the Dataverse files has failed"
            );
            return Err(DataverseError::Match { failures });
        }
        stats.matched = mapping.len();
        Ok(mapping)
    }

    fn is_skipped(&self, entry: &FsEntry) -> bool {
        // RData derivatives are not delivered by Dataverse.
        entry.label == self.settings.dataset_name || entry.path_str().ends_with(R_DATA_SUFFIX)
    }

    fn plan_use_updates(&self, tree: &FsTree, mapping: &Mapping<'_>, changes: &mut ChangeSet) {
        let mut assigned = HashSet::new();
        for (id, record) in mapping.iter() {
            // First entry wins for a shared record; the original precedes its derivatives.
            if !assigned.insert(record.uuid) {
                continue;
            }
            let entry = tree.get(id);
            let Some(file_use) = entry.file_use else {
                continue;
            };
            self.sink.event(ProgressEvent::message(format!(
                "{} file group use set to {file_use}",
                entry.label
            )));
            changes.use_updates.push((record.uuid, file_use));
        }
    }

    fn plan_derivations(
        &self,
        tree: &FsTree,
        mapping: &Mapping<'_>,
        changes: &mut ChangeSet,
        stats: &mut ReconcileStats,
    ) {
        for (id, derived) in mapping.iter() {
            let entry = tree.get(id);
            let Some(source_id) = entry.derived_from else {
                continue;
            };
            if entry.file_use != Some(FileUse::Derivative) {
                continue;
            }
            let Some(source) = mapping.get(source_id) else {
                warn!(
                    derived = %entry.path_str(),
                    source = %tree.get(source_id).path_str(),
                    "source of derivative has no file record, skipping derivation"
                );
                stats.skipped_derivations += 1;
                continue;
            };
            if source.uuid == derived.uuid {
                debug!(
                    path = %entry.path_str(),
                    "derivative shares its original's file record, no derivation"
                );
                continue;
            }

            let event_uuid = Uuid::new_v4();
            changes.events.push(NewEvent {
                event_uuid,
                file_uuid: source.uuid,
                event_type: DERIVATION_EVENT.to_string(),
                event_datetime: None,
                detail: String::new(),
                outcome: String::new(),
                outcome_detail_note: derived.currentlocation.clone().unwrap_or_default(),
                dataverse_agent: true,
            });
            changes.derivations.push(NewDerivation {
                source_uuid: source.uuid,
                derived_uuid: derived.uuid,
                event_uuid,
            });
            self.sink.event(ProgressEvent::message(format!(
                "Added derivation from {} to {}",
                source.uuid, derived.uuid
            )));
        }
    }

    fn plan_fixity(
        &self,
        tree: &FsTree,
        mapping: &Mapping<'_>,
        changes: &mut ChangeSet,
        stats: &mut ReconcileStats,
    ) -> Result<(), DataverseError> {
        let date = chrono::Utc::now().to_rfc3339();
        for (id, record) in mapping.iter() {
            let entry = tree.get(id);
            let Some(expected) = &entry.checksum else {
                continue;
            };
            if record.is_removed() {
                info!(path = %entry.path_str(), "file removed after extraction, skipping checksum");
                stats.fixity_skipped += 1;
                continue;
            }
            let Some(location) = record.currentlocation.as_deref() else {
                warn!(path = %entry.path_str(), "file record has no current location, skipping checksum");
                stats.fixity_skipped += 1;
                continue;
            };

            self.sink.event(ProgressEvent::message(format!(
                "Checking checksum {} for {}",
                expected.value, entry.label
            )));
            let path = self.layout.resolve_location(location);
            let computed = checksum::file_digest(&path, expected.kind)?;
            let check = FixityCheck::evaluate(expected, &computed);
            match check.outcome {
                FixityOutcome::Pass => stats.fixity_passed += 1,
                FixityOutcome::Fail => {
                    warn!(%path, expected = %expected.value, %computed, "checksum failed");
                    stats.fixity_failed += 1;
                }
            }
            self.sink.event(ProgressEvent::message(format!(
                "Checksum {}",
                if check.outcome == FixityOutcome::Pass { "passed" } else { "failed" }
            )));

            changes.events.push(NewEvent {
                event_uuid: Uuid::new_v4(),
                file_uuid: record.uuid,
                event_type: FIXITY_EVENT.to_string(),
                event_datetime: Some(date.clone()),
                detail: check.detail,
                outcome: check.outcome.as_str().to_string(),
                outcome_detail_note: check.note,
                dataverse_agent: false,
            });
        }
        Ok(())
    }
}

/// Exactly one record whose original location ends with `suffix` on a path
/// segment boundary.
fn unique_match<'r>(
    records: &'r [FileRecord],
    suffix: &str,
) -> Result<&'r FileRecord, MatchFailureReason> {
    let mut candidates = records
        .iter()
        .filter(|record| ends_with_segment(&record.originallocation, suffix));
    match (candidates.next(), candidates.count()) {
        (Some(record), 0) => Ok(record),
        (Some(_), others) => Err(MatchFailureReason::Ambiguous(others + 1)),
        (None, _) => Err(MatchFailureReason::NotFound),
    }
}

fn ends_with_segment(location: &str, suffix: &str) -> bool {
    match location.strip_suffix(suffix) {
        Some("") => true,
        // `%` closes a location placeholder such as `%transferDirectory%`.
        Some(prefix) => prefix.ends_with('/') || prefix.ends_with('%'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransferId;

    fn record(location: &str) -> FileRecord {
        FileRecord {
            uuid: Uuid::new_v4(),
            transfer_id: TransferId::from(Uuid::nil()),
            originallocation: location.to_string(),
            currentlocation: Some(location.to_string()),
            filegrpuse: "original".to_string(),
            removedtime: None,
        }
    }

    #[test]
    fn segment_boundaries() {
        assert!(ends_with_segment("%transferDirectory%objects/a/b.csv", "objects/a/b.csv"));
        assert!(ends_with_segment("%transferDirectory%objects/a/b.csv", "b.csv"));
        assert!(ends_with_segment("b.csv", "b.csv"));
        assert!(!ends_with_segment("%transferDirectory%objects/a/ab.csv", "b.csv"));
    }

    #[test]
    fn unique_match_reasons() {
        let records = vec![
            record("%transferDirectory%objects/one/data.csv"),
            record("%transferDirectory%objects/two/data.csv"),
            record("%transferDirectory%objects/notes.txt"),
        ];
        assert!(unique_match(&records, "notes.txt").is_ok());
        assert_eq!(
            unique_match(&records, "data.csv").unwrap_err(),
            MatchFailureReason::Ambiguous(2)
        );
        assert_eq!(
            unique_match(&records, "missing.txt").unwrap_err(),
            MatchFailureReason::NotFound
        );
    }
}
