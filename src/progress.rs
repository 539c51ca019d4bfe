use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{ErrorKind, FailureReason, RecipientRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Aggregate counters, refreshed after every recipient transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
}

impl Progress {
    /// Share of records that reached a terminal state, 0 to 100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = self.sent + self.failed + self.skipped;
        (done * 100 / self.total) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Why a `Failed` campaign ended early.
    pub error: Option<CampaignError>,
}

/// The mail client could not be reached within the connection budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignError {
    pub reason: FailureReason,
    pub connect_attempts: u32,
}

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    RecipientStarted {
        record: RecipientRecord,
        progress: Progress,
    },
    RecipientSucceeded {
        record: RecipientRecord,
        progress: Progress,
    },
    RecipientFailed {
        record: RecipientRecord,
        error: ErrorKind,
        progress: Progress,
    },
    CampaignCompleted(CampaignSummary),
}

/// Sink for dispatch events. Called from the dispatch worker, so
/// implementations hand the event off instead of acting on it in place.
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: DispatchEvent);
}

/// Forwards events to a presentation task over an unbounded channel, which
/// never blocks the sender.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_event(&self, event: DispatchEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("Progress receiver dropped, event discarded");
        }
    }
}
