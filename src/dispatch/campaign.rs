use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    domain::{RecipientRecord, RecipientStatus},
    progress::{CampaignStatus, CampaignSummary, Progress},
};

/// Flags of a single campaign, shared by its worker, its handle and the engine.
#[derive(Debug)]
pub(crate) struct CampaignControl {
    cancel: AtomicBool,
    running: AtomicBool,
}

impl CampaignControl {
    pub(crate) fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// State of the one campaign currently owned by the dispatch worker.
#[derive(Debug)]
pub(crate) struct CampaignState {
    pub(crate) id: Uuid,
    pub(crate) records: Vec<RecipientRecord>,
    cursor: usize,
    control: Arc<CampaignControl>,
    started_at: DateTime<Utc>,
}

impl CampaignState {
    pub(crate) fn new(records: Vec<RecipientRecord>, control: Arc<CampaignControl>) -> Self {
        Self {
            id: Uuid::new_v4(),
            records,
            cursor: 0,
            control,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Moves the cursor to the next Pending record. The cursor never goes back.
    pub(crate) fn next_pending(&mut self) -> Option<usize> {
        while self.cursor < self.records.len() {
            let index = self.cursor;
            self.cursor += 1;
            if self.records[index].is_pending() {
                return Some(index);
            }
        }
        None
    }

    pub(crate) fn has_pending_after_cursor(&self) -> bool {
        self.records[self.cursor..].iter().any(|r| r.is_pending())
    }

    pub(crate) fn progress(&self) -> Progress {
        let count = |status| self.records.iter().filter(|r| r.status == status).count();
        let sent = count(RecipientStatus::Sent);
        let failed = count(RecipientStatus::Failed);
        let skipped = count(RecipientStatus::Skipped);
        Progress {
            total: self.records.len(),
            sent,
            failed,
            skipped,
            pending: self.records.len() - sent - failed - skipped,
        }
    }

    pub(crate) fn summary(&self, status: CampaignStatus) -> CampaignSummary {
        let progress = self.progress();
        CampaignSummary {
            campaign_id: self.id,
            status,
            total: progress.total,
            sent: progress.sent,
            failed: progress.failed,
            pending: progress.pending,
            skipped: progress.skipped,
            started_at: self.started_at,
            finished_at: Utc::now(),
            error: None,
        }
    }

    pub(crate) fn into_records(self) -> Vec<RecipientRecord> {
        self.records
    }
}
