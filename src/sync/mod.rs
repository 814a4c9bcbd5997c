use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::archive::history::{HistoryEntry, RunHistory};
use crate::archive::store::{ArtifactStore, SaveOutcome};
use crate::model::issue::TicketId;
use crate::model::outcome::{AbortReason, RunSummary, TicketOutcome, TicketReport};
use crate::tracker::{ClientError, Tracker};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub skip_existing: bool,
    pub download_attachments: bool,
    pub preflight: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            skip_existing: false,
            download_attachments: true,
            preflight: true,
        }
    }
}

/// Result of driving one ticket: either it reached an outcome and the batch
/// goes on, or it exposed a condition that ends the batch.
#[derive(Debug)]
enum Step {
    Continue(TicketReport),
    Abort(AbortReason),
}

pub struct SyncOrchestrator {
    tracker: Box<dyn Tracker>,
    store: ArtifactStore,
    history: RunHistory,
    options: SyncOptions,
    interrupted: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(
        tracker: Box<dyn Tracker>,
        store: ArtifactStore,
        history: RunHistory,
        options: SyncOptions,
    ) -> Self {
        Self {
            tracker,
            store,
            history,
            options,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before each ticket; setting it stops the batch at the
    /// next ticket boundary.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Processes `ids` in order and records exactly one history entry,
    /// whatever happens along the way.
    pub async fn run(&self, ids: &[TicketId], command_line: &str) -> RunSummary {
        let mut summary = RunSummary::new(Local::now(), ids.len());

        if let Err(reason) = self.process_all(ids, &mut summary).await {
            error!("aborting run: {reason}");
            summary.abort(reason);
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            total = summary.total(),
            not_attempted = summary.not_attempted(),
            elapsed_ms = (Local::now() - summary.started_at).num_milliseconds(),
            "run finished"
        );
        if summary.failed > 0 {
            warn!("{} ticket(s) failed", summary.failed);
        }
        for report in &summary.tickets {
            debug!(ticket = %report.id, "{}", report.outcome);
            for attachment in &report.attachments {
                debug!(ticket = %report.id, "  {}: {}", attachment.filename, attachment.outcome);
            }
        }

        self.history.record_or_warn(&HistoryEntry::new(
            Local::now().naive_local(),
            summary.status(),
            command_line,
            summary.summary_text(),
        ));
        summary
    }

    async fn process_all(
        &self,
        ids: &[TicketId],
        summary: &mut RunSummary,
    ) -> Result<(), AbortReason> {
        if self.options.preflight {
            self.preflight().await?;
        }

        self.store
            .prepare()
            .map_err(|e| AbortReason::Storage(e.to_string()))?;
        debug!(
            issues = %self.store.issues_dir().display(),
            attachments = %self.store.attachments_dir().display(),
            "output directory ready"
        );

        for &id in ids {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(AbortReason::Interrupted);
            }
            match self.process_ticket(id).await {
                Step::Continue(report) => summary.tally(report),
                Step::Abort(reason) => return Err(reason),
            }
        }
        Ok(())
    }

    async fn preflight(&self) -> Result<(), AbortReason> {
        info!("checking connection to {}", self.tracker.name());
        match self.tracker.check_connection().await {
            Ok(()) => Ok(()),
            Err(err) => match abort_reason(&err) {
                Some(reason) => Err(reason),
                None => {
                    warn!("connection check inconclusive, continuing: {err}");
                    Ok(())
                }
            },
        }
    }

    async fn process_ticket(&self, id: TicketId) -> Step {
        info!(ticket = %id, "fetching");
        let doc = match self.tracker.fetch_issue(id).await {
            Ok(doc) => doc,
            Err(err) => {
                if let Some(reason) = abort_reason(&err) {
                    return Step::Abort(reason);
                }
                error!(ticket = %id, "fetch failed: {err}");
                let outcome = match err {
                    ClientError::NotFound => TicketOutcome::NotFound,
                    other => TicketOutcome::Failed(other.to_string()),
                };
                return Step::Continue(TicketReport::new(id, outcome));
            }
        };

        let outcome = match self.store.save_issue(id, &doc, self.options.skip_existing) {
            Ok(SaveOutcome::Saved(path)) => {
                info!(ticket = %id, "saved to {}", path.display());
                TicketOutcome::Saved
            }
            Ok(SaveOutcome::SkippedExisting(path)) => {
                info!(ticket = %id, "{} already exists, skipping", path.display());
                TicketOutcome::SkippedExisting
            }
            Err(err) => {
                error!(ticket = %id, "{err}");
                return Step::Continue(TicketReport::new(
                    id,
                    TicketOutcome::Failed(err.to_string()),
                ));
            }
        };

        if !self.options.download_attachments {
            return Step::Continue(TicketReport::new(id, outcome));
        }

        let attachments = self
            .store
            .download_attachments(self.tracker.as_ref(), id, &doc)
            .await;
        let failed = attachments.iter().filter(|a| a.is_failure()).count();
        if failed > 0 {
            warn!(ticket = %id, "{failed}/{} attachment(s) failed", attachments.len());
        } else if !attachments.is_empty() {
            debug!(ticket = %id, "{} attachment(s) in place", attachments.len());
        }

        Step::Continue(TicketReport::new(id, outcome).with_attachments(attachments))
    }
}

/// Errors that mean the credential or the connection is broken for every
/// ticket, not just this one.
fn abort_reason(err: &ClientError) -> Option<AbortReason> {
    match err {
        ClientError::Unauthorized(_) => Some(AbortReason::Unauthorized(err.to_string())),
        ClientError::Network(_) => Some(AbortReason::Network(err.to_string())),
        ClientError::NotFound
        | ClientError::Malformed(_)
        | ClientError::Unexpected(_)
        | ClientError::Io(_) => None,
    }
}
