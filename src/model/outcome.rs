use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

use super::issue::TicketId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    Downloaded,
    SkippedExisting,
    DownloadFailed(String),
}

impl fmt::Display for AttachmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentOutcome::Downloaded => f.write_str("downloaded"),
            AttachmentOutcome::SkippedExisting => f.write_str("already present"),
            AttachmentOutcome::DownloadFailed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentReport {
    pub filename: String,
    pub outcome: AttachmentOutcome,
}

impl AttachmentReport {
    pub fn new(filename: impl Into<String>, outcome: AttachmentOutcome) -> Self {
        Self {
            filename: filename.into(),
            outcome,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttachmentOutcome::DownloadFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    Saved,
    SkippedExisting,
    NotFound,
    Failed(String),
}

impl TicketOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TicketOutcome::Saved | TicketOutcome::SkippedExisting)
    }
}

impl fmt::Display for TicketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketOutcome::Saved => f.write_str("saved"),
            TicketOutcome::SkippedExisting => f.write_str("skipped (exists)"),
            TicketOutcome::NotFound => f.write_str("not found"),
            TicketOutcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Everything that happened to one ticket in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketReport {
    pub id: TicketId,
    pub outcome: TicketOutcome,
    pub attachments: Vec<AttachmentReport>,
}

impl TicketReport {
    pub fn new(id: TicketId, outcome: TicketOutcome) -> Self {
        Self {
            id,
            outcome,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentReport>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Conditions that stop the whole batch rather than a single ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Unauthorized(String),
    Network(String),
    Storage(String),
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Unauthorized(msg) => write!(f, "authentication failed: {msg}"),
            AbortReason::Network(msg) => write!(f, "tracker unreachable: {msg}"),
            AbortReason::Storage(msg) => write!(f, "output directory unusable: {msg}"),
            AbortReason::Interrupted => f.write_str("interrupted by user"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(RunStatus::Success),
            "FAILED" => Ok(RunStatus::Failure),
            other => Err(format!("unknown run status {other:?}")),
        }
    }
}

/// Accumulator for one invocation. Only `tally` moves the counters, so
/// `succeeded + failed == total()` holds by construction.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abort: Option<AbortReason>,
    pub tickets: Vec<TicketReport>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Local>, requested: usize) -> Self {
        Self {
            started_at,
            requested,
            succeeded: 0,
            failed: 0,
            abort: None,
            tickets: Vec::new(),
        }
    }

    pub fn tally(&mut self, report: TicketReport) {
        if report.outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.tickets.push(report);
    }

    pub fn abort(&mut self, reason: AbortReason) {
        self.abort = Some(reason);
    }

    /// Tickets that reached an outcome.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn not_attempted(&self) -> usize {
        self.requested.saturating_sub(self.total())
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn status(&self) -> RunStatus {
        if self.abort.is_none() && self.failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Failure
        }
    }

    /// Per-ticket failures still count as a completed run.
    pub fn exit_code(&self) -> u8 {
        if self.is_aborted() {
            1
        } else {
            0
        }
    }

    pub fn summary_text(&self) -> String {
        format!(
            "成功:{}, 失敗:{}, 合計:{}",
            self.succeeded,
            self.failed,
            self.total()
        )
    }
}
