use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::agents;
use crate::config::ResolvedConfig;
use crate::convert::{self, ConvertSettings};
use crate::dataset::Dataset;
use crate::domain::TransferId;
use crate::error::DataverseError;
use crate::layout::TransferLayout;
use crate::mets::document::MetsDocument;
use crate::mets::tree::EntryKind;
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::records::FileRecordStore;

#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    pub dataset_name: Option<String>,
    pub output_dir: Option<Utf8PathBuf>,
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub mets_path: String,
    pub title: String,
    pub export_shape: String,
    pub draft: bool,
    pub metadata_only: bool,
    pub directories: usize,
    pub items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    pub transfer_id: String,
    pub matched: usize,
    pub basename_matches: usize,
    pub skipped: usize,
    pub derivations: usize,
    pub skipped_derivations: usize,
    pub fixity_passed: usize,
    pub fixity_failed: usize,
    pub fixity_skipped: usize,
    pub agents_created: usize,
    pub agents_existing: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn finished(message: impl Into<String>, started: Instant) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(started.elapsed()),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub struct App {
    config: ResolvedConfig,
}

impl App {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn layout(&self, unit_path: &Utf8Path, options: &StageOptions) -> TransferLayout {
        let mut layout = TransferLayout::new(unit_path, &self.config)
            .with_mets_location(options.output_dir.clone(), options.output_name.clone());
        if let Some(name) = &options.dataset_name {
            layout = layout.with_dataset_name(name.clone());
        }
        layout
    }

    pub fn convert(
        &self,
        unit_path: &Utf8Path,
        options: &StageOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ConvertResult, DataverseError> {
        let started = Instant::now();
        let layout = self.layout(unit_path, options);
        info!(unit = %unit_path, "converting Dataverse structure");

        let dataset = Dataset::load(&layout)?;
        let settings = ConvertSettings {
            dataset_name: layout.dataset_name(),
            metadata_dir: &self.config.metadata_dir,
            restricted_policy: self.config.restricted_policy,
        };
        let conversion = convert::build_sip(&dataset, &settings, sink)?;

        let mets_path = layout.mets_path();
        conversion.document.write(&mets_path)?;
        sink.event(ProgressEvent::finished(
            format!("METS written to {mets_path}"),
            started,
        ));

        let tree = conversion.document.tree();
        Ok(ConvertResult {
            mets_path: mets_path.to_string(),
            title: conversion.descriptor.title.clone(),
            export_shape: format!("{:?}", dataset.shape),
            draft: conversion.descriptor.is_draft(),
            metadata_only: conversion.metadata_only,
            directories: tree.count(EntryKind::Directory),
            items: tree.count(EntryKind::Item),
        })
    }

    pub fn reconcile<S: FileRecordStore>(
        &self,
        store: &mut S,
        unit_path: &Utf8Path,
        transfer: &TransferId,
        options: &StageOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ReconcileResult, DataverseError> {
        let started = Instant::now();
        let layout = self.layout(unit_path, options);
        info!(unit = %unit_path, transfer = %transfer, "parsing Dataverse METS");

        let document = MetsDocument::from_file(&layout.mets_path())?;
        let agents = agents::load_agents(&layout.agents_path())?;
        let records = store.transfer_files(transfer)?;

        let settings = ReconcileSettings {
            objects_dir: &self.config.objects_dir,
            dataset_name: layout.dataset_name(),
        };
        let plan = Reconciler::new(&layout, settings, sink).plan(
            document.tree(),
            &records,
            agents.unwrap_or_default(),
        )?;
        let summary = store.commit(&plan.changes)?;
        sink.event(ProgressEvent::finished(
            format!("reconciled {} files", plan.stats.matched),
            started,
        ));

        let stats = plan.stats;
        Ok(ReconcileResult {
            transfer_id: transfer.to_string(),
            matched: stats.matched,
            basename_matches: stats.basename_matches,
            skipped: stats.skipped,
            derivations: plan.changes.derivations.len(),
            skipped_derivations: stats.skipped_derivations,
            fixity_passed: stats.fixity_passed,
            fixity_failed: stats.fixity_failed,
            fixity_skipped: stats.fixity_skipped,
            agents_created: summary.agents_created,
            agents_existing: summary.agents_existing,
        })
    }
}
