//! Per-message outcomes and the run report.

use std::fmt;

use crate::error::{ConnectionError, StoreError};
use crate::mailbox::MessageId;
use crate::store::ArticleRef;

// ── Phases ──────────────────────────────────────────────────────────

/// Where a run is. `Failed` is only entered from `Connecting` or `Fetching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Connecting,
    Fetching,
    ProcessingMessages,
    Deleting,
    Disconnecting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Connecting => "connecting",
            RunPhase::Fetching => "fetching",
            RunPhase::ProcessingMessages => "processing_messages",
            RunPhase::Deleting => "deleting",
            RunPhase::Disconnecting => "disconnecting",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Why a message was left alone. Skipped messages stay in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No active author matches the sender (or there is no usable sender).
    UnauthorizedSender { address: Option<String> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnauthorizedSender { address: Some(a) } => {
                write!(f, "unauthorized sender {a}")
            }
            SkipReason::UnauthorizedSender { address: None } => f.write_str("no sender address"),
        }
    }
}

/// Why a message could not be turned into an article. Failed messages stay
/// in the mailbox for the next run.
#[derive(Debug)]
pub enum FailReason {
    Store(StoreError),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Store(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug)]
pub enum IngestionOutcome {
    Created(ArticleRef),
    Skipped(SkipReason),
    Failed(FailReason),
}

impl IngestionOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, IngestionOutcome::Created(_))
    }

    pub fn article(&self) -> Option<&ArticleRef> {
        match self {
            IngestionOutcome::Created(article) => Some(article),
            _ => None,
        }
    }
}

/// Outcome of one fetched message.
#[derive(Debug)]
pub struct MessageReport {
    pub id: MessageId,
    pub outcome: IngestionOutcome,
}

// ── Run report ──────────────────────────────────────────────────────

/// Everything that happened during one run.
#[derive(Debug)]
pub struct RunReport {
    /// Final phase: `Done` or `Failed`.
    pub phase: RunPhase,
    pub messages: Vec<MessageReport>,
    /// Messages removed from the mailbox.
    pub deleted: usize,
    /// Fatal connect/fetch error.
    pub error: Option<ConnectionError>,
    pub delete_error: Option<ConnectionError>,
    pub disconnect_error: Option<ConnectionError>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            phase: RunPhase::Connecting,
            messages: Vec::new(),
            deleted: 0,
            error: None,
            delete_error: None,
            disconnect_error: None,
        }
    }
}

impl RunReport {
    pub fn is_failed(&self) -> bool {
        self.phase == RunPhase::Failed
    }

    /// Identifiers of messages that produced an article.
    pub fn created_ids(&self) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|m| m.outcome.is_created())
            .map(|m| m.id)
            .collect()
    }

    pub fn articles(&self) -> impl Iterator<Item = &ArticleRef> {
        self.messages.iter().filter_map(|m| m.outcome.article())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            deleted: self.deleted,
            ..RunSummary::default()
        };
        for m in &self.messages {
            match m.outcome {
                IngestionOutcome::Created(_) => summary.created += 1,
                IngestionOutcome::Skipped(_) => summary.skipped += 1,
                IngestionOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Counts shown to the operator at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} skipped={} failed={} deleted={}",
            self.created, self.skipped, self.failed, self.deleted
        )
    }
}
