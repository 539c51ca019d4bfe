//! Boundary to the host mail application.
//!
//! The dispatch loop only ever talks to a [`MailClientAdapter`]; the binary
//! wires in [`ConsoleMailClient`] and the test suite a scripted double.

mod console;

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{ErrorKind, RecipientEmail};

pub use console::ConsoleMailClient;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MailClientError {
    #[error("mail client is not reachable, {0}")]
    Connection(String),
    #[error("attachment {0} not found or not readable")]
    AttachmentNotFound(String),
    #[error("mail client rejected the message, {0}")]
    SendRejected(String),
    #[error("mail client could not send right now, {0}")]
    TransientSend(String),
}

impl MailClientError {
    /// Whether another attempt on the same recipient may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::TransientSend(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::AttachmentNotFound(_) => ErrorKind::AttachmentNotFound,
            Self::SendRejected(_) => ErrorKind::SendRejected,
            Self::TransientSend(_) => ErrorKind::TransientSend,
        }
    }
}

/// Automation surface of a desktop mail client.
///
/// The client keeps one draft open at a time: `compose_message` starts it, the
/// setters fill it in and `send` hands it to the client's outbox. Calls are
/// never made concurrently.
#[async_trait]
pub trait MailClientAdapter: Send {
    /// Attaches to the running client. Called again after the connection drops.
    async fn connect(&mut self) -> Result<(), MailClientError>;

    async fn compose_message(&mut self) -> Result<(), MailClientError>;

    async fn set_recipients(
        &mut self,
        to: &RecipientEmail,
        cc: &[RecipientEmail],
    ) -> Result<(), MailClientError>;

    /// Must fail with [`MailClientError::AttachmentNotFound`] when `path` is not
    /// a readable file at call time.
    async fn set_attachment(&mut self, path: &Path) -> Result<(), MailClientError>;

    async fn set_body(&mut self, subject: &str, html_body: &str) -> Result<(), MailClientError>;

    async fn send(&mut self) -> Result<(), MailClientError>;
}

pub async fn ensure_readable_attachment(path: &Path) -> Result<(), MailClientError> {
    let not_found = || MailClientError::AttachmentNotFound(path.display().to_string());
    let metadata = tokio::fs::metadata(path).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    tokio::fs::File::open(path).await.map_err(|_| not_found())?;
    Ok(())
}
