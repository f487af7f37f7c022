//! The resumable run loop.
//!
//! Ordering per instrument: navigate, extract, append to the pending batch,
//! write the batch to the output sheet, then mark the checkpoint. A crash
//! between the last two steps produces a duplicate row on resume, never a lost
//! one.

use crate::checkpoint::{CheckpointStatus, CheckpointStore};
use crate::config::HarvestConfig;
use crate::extract::{
    authoritative_adjustment, has_pending_clarification, latest_term_request, latest_upload, Tab,
    TabPages,
};
use crate::model::{ExtractionResult, InstrumentRecord, ResultStatus, TabFields};
use crate::navigator::{Navigator, SearchOutcome};
use crate::session::PortalSession;
use crate::sheets::OutputSheet;
use crate::HarvestError;
use chrono::Local;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counts for one `run` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Instruments attempted at least once during this run
    pub processed: usize,
    pub succeeded: usize,
    pub partial: usize,
    /// Still failed after every retry pass
    pub failed: usize,
    /// Already `done` in the checkpoint when the run started
    pub skipped: usize,
    pub elapsed: Duration,
}

/// How an input list compares with the output sheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub expected: usize,
    /// Input identifiers with no output row at all
    pub missing: Vec<String>,
    /// Input identifiers whose output rows are all `error`
    pub error_only: Vec<String>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.error_only.is_empty()
    }
}

/// Outcome of one attempt at one instrument
enum Attempt {
    Extracted(ExtractionResult),
    Failed(String),
}

pub struct Orchestrator {
    config: HarvestConfig,
    navigator: Navigator,
    checkpoint: CheckpointStore,
    output: OutputSheet,
    /// Extracted but not yet written to the output sheet
    pending: Vec<ExtractionResult>,
}

impl Orchestrator {
    /// Validate the configuration and load the checkpoint.
    pub fn new(config: HarvestConfig, session: Arc<dyn PortalSession>) -> Result<Self, HarvestError> {
        config.validate()?;
        let checkpoint = CheckpointStore::open(&config.checkpoint_path)?;
        let output = OutputSheet::new(&config.output_path);
        let navigator = Navigator::new(session, &config);
        Ok(Self {
            config,
            navigator,
            checkpoint,
            output,
            pending: Vec::new(),
        })
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Process every record not already `done`.
    ///
    /// Single-instrument failures are recorded and the loop moves on. A fatal
    /// error stops the run after writing whatever was already extracted; the
    /// checkpoint on disk is consistent either way.
    pub async fn run(&mut self, records: &[InstrumentRecord]) -> Result<RunSummary, HarvestError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let mut seen = HashSet::new();
        let mut queue = Vec::new();
        for record in records {
            if !seen.insert(record.identifier.as_str()) {
                debug!(identifier = %record.identifier, line = record.line, "Duplicate input row ignored");
                continue;
            }
            if self.checkpoint.is_done(&record.identifier) {
                summary.skipped += 1;
            } else {
                queue.push(record);
            }
        }
        info!(
            total = seen.len(),
            already_done = summary.skipped,
            to_process = queue.len(),
            "Starting run"
        );

        let outcome = self.process_all(&queue, &mut summary).await;
        // whatever happened, try to get extracted rows onto disk
        let flushed = self.flush_output();
        summary.elapsed = started.elapsed();

        match (outcome, flushed) {
            (Err(e), _) => {
                error!("Run stopped: {e}");
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                info!(
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    partial = summary.partial,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    elapsed = ?summary.elapsed,
                    "Run finished"
                );
                Ok(summary)
            }
        }
    }

    async fn process_all(
        &mut self,
        queue: &[&InstrumentRecord],
        summary: &mut RunSummary,
    ) -> Result<(), HarvestError> {
        let mut failed = self.pass(queue, summary, 0).await?;
        summary.processed = queue.len();

        for pass in 1..=self.config.retry_passes {
            if failed.is_empty() {
                break;
            }
            info!(pass, count = failed.len(), "Retrying failed instruments");
            failed = self.pass(&failed, summary, pass).await?;
        }
        summary.failed = failed.len();
        Ok(())
    }

    /// One sweep over `queue`; returns the records that failed in it.
    async fn pass<'r>(
        &mut self,
        queue: &[&'r InstrumentRecord],
        summary: &mut RunSummary,
        pass: u32,
    ) -> Result<Vec<&'r InstrumentRecord>, HarvestError> {
        let total = queue.len();
        let started = Instant::now();
        let mut failed = Vec::new();

        for (idx, record) in queue.iter().copied().enumerate() {
            let n = idx + 1;
            info!(
                "[{n}/{total}] Processing {}{}",
                record.identifier,
                if pass > 0 { format!(" (retry {pass})") } else { String::new() }
            );

            match self.attempt(record).await? {
                Attempt::Extracted(result) => {
                    let status = result.status;
                    let detail = result.detail.clone();
                    self.pending.push(result);
                    if self.pending.len() >= self.config.flush_every {
                        self.flush_or_keep()?;
                    }
                    match status {
                        ResultStatus::Success => summary.succeeded += 1,
                        ResultStatus::Partial => summary.partial += 1,
                        ResultStatus::Error => {
                            warn!(identifier = %record.identifier, "Every tab failed");
                            self.checkpoint.record_attempt(
                                &record.identifier,
                                CheckpointStatus::Failed,
                                detail,
                            )?;
                            failed.push(record);
                        }
                    }
                }
                Attempt::Failed(reason) => {
                    error!(identifier = %record.identifier, "{reason}");
                    self.checkpoint.record_attempt(
                        &record.identifier,
                        CheckpointStatus::Failed,
                        Some(reason),
                    )?;
                    failed.push(record);
                }
            }

            let mean = started.elapsed() / n as u32;
            let remaining = mean * (total - n) as u32;
            info!("[{n}/{total}] {} finished, ETA {}", record.identifier, format_eta(remaining));
        }
        Ok(failed)
    }

    /// Navigate to one instrument and read its tabs. Only fatal errors are
    /// returned as `Err`.
    async fn attempt(&mut self, record: &InstrumentRecord) -> Result<Attempt, HarvestError> {
        let id = &record.identifier;
        match self.navigator.open(id).await {
            Ok(SearchOutcome::Found) => {}
            Ok(SearchOutcome::NotFound) => return Ok(Attempt::Failed("not found".to_string())),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(Attempt::Failed(e.to_string())),
        }

        let mut fields = TabFields::default();
        let mut tab_failures = Vec::new();
        let tabs = self.config.tab_sequence.clone();
        for tab in &tabs {
            match self.navigator.read_tab(*tab).await {
                Ok(pages) => self.apply(*tab, pages.unwrap_or_default(), &mut fields),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(identifier = %id, "{tab} failed: {e}");
                    tab_failures.push(format!("{tab}: {e}"));
                }
            }
        }
        self.navigator.finish();

        let status = if tab_failures.is_empty() {
            ResultStatus::Success
        } else if tab_failures.len() == tabs.len() {
            ResultStatus::Error
        } else {
            ResultStatus::Partial
        };
        let passthrough = self
            .config
            .passthrough_columns
            .iter()
            .map(|c| (c.clone(), record.row.get(c).cloned().unwrap_or_default()))
            .collect();

        Ok(Attempt::Extracted(ExtractionResult {
            identifier: id.clone(),
            fields,
            status,
            detail: (!tab_failures.is_empty()).then(|| tab_failures.join("; ")),
            extracted_at: Local::now(),
            passthrough,
        }))
    }

    fn apply(&self, tab: Tab, pages: TabPages, fields: &mut TabFields) {
        let layout = &self.config.layout;
        let cols = &layout.columns;
        match tab {
            Tab::Adjustments => {
                if let Some(adj) =
                    authoritative_adjustment(&pages, cols.adjustment_number, cols.adjustment_status)
                {
                    fields.adjustment_number = Some(adj.number);
                    fields.adjustment_status = adj.status;
                }
            }
            Tab::AdjustmentTerm => {
                if let Some(req) = latest_term_request(&pages, cols.term_request_date, cols.term_status) {
                    fields.latest_term_request = Some(req.requested_on);
                    fields.latest_term_status = req.status;
                }
            }
            Tab::Attachments => {
                fields.latest_attachment_upload = latest_upload(&pages, cols.attachment_upload_date);
            }
            Tab::Clarifications => {
                fields.pending_clarification = Some(has_pending_clarification(
                    &pages,
                    cols.clarification_status,
                    &layout.pending_markers,
                ));
            }
        }
    }

    /// Flush mid-run. An output write failure (sheet open in another
    /// program, say) keeps the rows pending for the next attempt; a
    /// checkpoint that cannot be written ends the run.
    fn flush_or_keep(&mut self) -> Result<(), HarvestError> {
        match self.flush_output() {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    pending = self.pending.len(),
                    "Could not write {}: {e}; will retry on the next flush",
                    self.output.path().display()
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Write pending rows, then mark their non-error instruments `done` in
    /// one checkpoint write.
    fn flush_output(&mut self) -> Result<(), HarvestError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.output.append(&self.pending)?;
        // rows are on disk now; keeping them pending would append them twice
        let written = std::mem::take(&mut self.pending);
        self.checkpoint.record_batch(
            written
                .into_iter()
                .filter(|r| r.status != ResultStatus::Error)
                .map(|r| (r.identifier, CheckpointStatus::Done, r.detail)),
        )
    }

    /// Compare `records` with what the output sheet holds.
    pub fn validate_output(
        output: &OutputSheet,
        records: &[InstrumentRecord],
    ) -> Result<ValidationReport, HarvestError> {
        let summary = output.summary()?;
        let mut report = ValidationReport::default();
        let mut seen = HashSet::new();
        for record in records {
            let id = record.identifier.as_str();
            if !seen.insert(id) {
                continue;
            }
            report.expected += 1;
            if !summary.contains(id) {
                report.missing.push(id.to_string());
            } else if summary.only_errors(id) {
                report.error_only.push(id.to_string());
            }
        }
        Ok(report)
    }
}

fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
