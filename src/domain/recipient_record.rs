use std::path::PathBuf;

use serde::Serialize;

use super::{recipient_email::RecipientEmail, recipient_name::RecipientName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Skipped,
}

impl RecipientStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Sending => "Sending",
            Self::Sent => "Sent",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Classification of a per-recipient or campaign-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AttachmentNotFound,
    Connection,
    SendRejected,
    TransientSend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct RecipientRecord {
    pub row: usize,
    pub full_name: RecipientName,
    pub email: RecipientEmail,
    pub cc: Vec<RecipientEmail>,
    pub attachment_path: Option<PathBuf>,
    pub surname: String,
    pub status: RecipientStatus,
    pub attempts: u32,
    pub last_error: Option<FailureReason>,
}

impl RecipientRecord {
    pub fn new(
        row: usize,
        full_name: RecipientName,
        email: RecipientEmail,
        cc: Vec<RecipientEmail>,
        attachment_path: Option<PathBuf>,
    ) -> Self {
        let surname = full_name.surname().to_string();
        Self {
            row,
            full_name,
            email,
            cc,
            attachment_path,
            surname,
            status: RecipientStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecipientStatus::Pending
    }
}
