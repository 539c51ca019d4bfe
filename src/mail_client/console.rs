use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{MailClientAdapter, MailClientError, ensure_readable_attachment};
use crate::domain::RecipientEmail;

#[derive(Debug, Default)]
struct Draft {
    to: String,
    cc: Vec<String>,
    attachment: Option<PathBuf>,
    subject: String,
    html_body: String,
}

/// Dry-run mail client: every message is written to the log instead of being
/// handed to a real client.
#[derive(Debug, Default)]
pub struct ConsoleMailClient {
    connected: bool,
    draft: Option<Draft>,
    sent: usize,
}

impl ConsoleMailClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    fn draft(&mut self) -> Result<&mut Draft, MailClientError> {
        if !self.connected {
            return Err(MailClientError::Connection("not connected".to_string()));
        }
        self.draft
            .as_mut()
            .ok_or_else(|| {
                MailClientError::SendRejected("no message is being composed".to_string())
            })
    }
}

#[async_trait]
impl MailClientAdapter for ConsoleMailClient {
    async fn connect(&mut self) -> Result<(), MailClientError> {
        self.connected = true;
        tracing::info!("Connected to console mail client");
        Ok(())
    }

    async fn compose_message(&mut self) -> Result<(), MailClientError> {
        if !self.connected {
            return Err(MailClientError::Connection("not connected".to_string()));
        }
        self.draft = Some(Draft::default());
        Ok(())
    }

    async fn set_recipients(
        &mut self,
        to: &RecipientEmail,
        cc: &[RecipientEmail],
    ) -> Result<(), MailClientError> {
        let draft = self.draft()?;
        draft.to = to.as_ref().to_string();
        draft.cc = cc.iter().map(|e| e.as_ref().to_string()).collect();
        Ok(())
    }

    async fn set_attachment(&mut self, path: &Path) -> Result<(), MailClientError> {
        ensure_readable_attachment(path).await?;
        self.draft()?.attachment = Some(path.to_path_buf());
        Ok(())
    }

    async fn set_body(&mut self, subject: &str, html_body: &str) -> Result<(), MailClientError> {
        let draft = self.draft()?;
        draft.subject = subject.to_string();
        draft.html_body = html_body.to_string();
        Ok(())
    }

    async fn send(&mut self) -> Result<(), MailClientError> {
        self.draft()?;
        let draft = self.draft.take().unwrap_or_default();
        tracing::info!(
            to = %draft.to,
            cc = %draft.cc.join("; "),
            subject = %draft.subject,
            attachment = ?draft.attachment,
            body_length = draft.html_body.len(),
            "Email sent (console)"
        );
        self.sent += 1;
        Ok(())
    }
}
