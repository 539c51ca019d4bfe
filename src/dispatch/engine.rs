use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::Instrument;
use uuid::Uuid;

use super::campaign::{CampaignControl, CampaignState};
use crate::{
    configuration::DispatchSettings,
    domain::{ErrorKind, FailureReason, RecipientRecord, RecipientStatus},
    mail_client::{MailClientAdapter, MailClientError},
    progress::{CampaignError, CampaignStatus, CampaignSummary, DispatchEvent, ProgressReporter},
    template::{Template, TemplateEngine},
};

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("a campaign is already running")]
    CampaignAlreadyRunning,
    #[error("there are no pending recipients to send to")]
    NoRecipients,
    #[error("the dispatch worker stopped unexpectedly, {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
pub struct CampaignOutcome {
    pub summary: CampaignSummary,
    pub recipients: Vec<RecipientRecord>,
}

#[derive(Debug)]
pub struct CampaignHandle {
    id: Uuid,
    control: Arc<CampaignControl>,
    task: JoinHandle<CampaignOutcome>,
}

impl CampaignHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Asks this campaign's worker to stop before the next recipient. Has no
    /// effect on any other campaign.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<CampaignOutcome, DispatchError> {
        Ok(self.task.await?)
    }
}

type SharedAdapter = Arc<Mutex<Box<dyn MailClientAdapter>>>;

/// Runs campaigns one at a time against a single mail client.
pub struct DispatchEngine {
    adapter: SharedAdapter,
    current: std::sync::Mutex<Option<Arc<CampaignControl>>>,
    settings: DispatchSettings,
    template_engine: TemplateEngine,
}

impl DispatchEngine {
    pub fn new(
        adapter: impl MailClientAdapter + 'static,
        settings: DispatchSettings,
        template_engine: TemplateEngine,
    ) -> Self {
        Self {
            adapter: Arc::new(Mutex::new(Box::new(adapter))),
            current: std::sync::Mutex::new(None),
            settings,
            template_engine,
        }
    }

    /// Applies to campaigns started afterwards.
    pub fn configure(&mut self, settings: DispatchSettings, template_engine: TemplateEngine) {
        self.settings = settings;
        self.template_engine = template_engine;
    }

    pub fn status(&self) -> CampaignStatus {
        match self.current().as_deref() {
            Some(control) if control.is_running() => CampaignStatus::Running,
            _ => CampaignStatus::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == CampaignStatus::Running
    }

    // Only ever holds a swap of the slot, so a poisoned lock is still consistent.
    fn current(&self) -> MutexGuard<'_, Option<Arc<CampaignControl>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a campaign on a dedicated task. Rejected, never queued, while
    /// another campaign holds the mail client.
    pub fn start(
        &self,
        records: Vec<RecipientRecord>,
        template: Template,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<CampaignHandle, DispatchError> {
        if !records.iter().any(|r| r.is_pending()) {
            return Err(DispatchError::NoRecipients);
        }
        let adapter = self
            .adapter
            .clone()
            .try_lock_owned()
            .map_err(|_| DispatchError::CampaignAlreadyRunning)?;

        let control = Arc::new(CampaignControl::new());
        *self.current() = Some(control.clone());
        let campaign = CampaignState::new(records, control.clone());
        let id = campaign.id;

        let worker = Worker {
            adapter,
            connected: false,
            settings: self.settings.clone(),
            template_engine: self.template_engine,
            template,
            reporter,
        };
        let span = tracing::info_span!(
            "campaign",
            campaign_id = %id,
            template = %worker.template.name
        );
        let worker_control = control.clone();
        let task = tokio::spawn(
            async move {
                let outcome = worker.run(campaign).await;
                worker_control.finish();
                outcome
            }
            .instrument(span),
        );

        Ok(CampaignHandle { id, control, task })
    }

    /// Returns whether there was a running campaign to stop.
    pub fn cancel(&self) -> bool {
        match self.current().as_deref() {
            Some(control) if control.is_running() => {
                tracing::info!("Stop requested, finishing the recipient in flight");
                control.cancel();
                true
            }
            _ => false,
        }
    }
}

/// The connection could not be brought back within its retry budget.
struct ConnectionLost {
    error: MailClientError,
    attempts: u32,
}

struct Worker {
    adapter: OwnedMutexGuard<Box<dyn MailClientAdapter>>,
    connected: bool,
    settings: DispatchSettings,
    template_engine: TemplateEngine,
    template: Template,
    reporter: Arc<dyn ProgressReporter>,
}

impl Worker {
    async fn run(mut self, mut campaign: CampaignState) -> CampaignOutcome {
        tracing::info!(recipients = campaign.records.len(), "Campaign started");

        let (status, error) = loop {
            if campaign.is_cancelled() {
                tracing::info!("Campaign stopped by user");
                break (CampaignStatus::Stopped, None);
            }
            let Some(index) = campaign.next_pending() else {
                break (CampaignStatus::Completed, None);
            };
            if let Err(lost) = self.process(&mut campaign, index).await {
                tracing::error!(
                    error = %lost.error,
                    connect_attempts = lost.attempts,
                    "Could not reach the mail client, campaign failed"
                );
                let error = CampaignError {
                    reason: FailureReason {
                        kind: lost.error.kind(),
                        detail: lost.error.to_string(),
                    },
                    connect_attempts: lost.attempts,
                };
                break (CampaignStatus::Failed, Some(error));
            }

            let delay = self.settings.inter_send_delay();
            if !delay.is_zero() && campaign.has_pending_after_cursor() && !campaign.is_cancelled() {
                sleep(delay).await;
            }
        };

        let summary = CampaignSummary {
            error,
            ..campaign.summary(status)
        };
        tracing::info!(
            status = ?summary.status,
            sent = summary.sent,
            failed = summary.failed,
            pending = summary.pending,
            skipped = summary.skipped,
            "Campaign finished"
        );
        self.reporter
            .on_event(DispatchEvent::CampaignCompleted(summary.clone()));

        CampaignOutcome {
            summary,
            recipients: campaign.into_records(),
        }
    }

    #[tracing::instrument(
        name = "Sending to recipient",
        skip(self, campaign),
        fields(
            row = campaign.records[index].row,
            recipient_email = %campaign.records[index].email,
        )
    )]
    async fn process(
        &mut self,
        campaign: &mut CampaignState,
        index: usize,
    ) -> Result<(), ConnectionLost> {
        let retry = self.settings.retry_policy();
        loop {
            if !self.connected {
                if let Err(lost) = self.connect().await {
                    if campaign.records[index].attempts > 0 {
                        self.fail(campaign, index, ErrorKind::Connection, &lost.error);
                    }
                    return Err(lost);
                }
            }

            let record = &mut campaign.records[index];
            record.status = RecipientStatus::Sending;
            record.attempts += 1;
            let record = record.clone();
            self.reporter.on_event(DispatchEvent::RecipientStarted {
                progress: campaign.progress(),
                record: record.clone(),
            });

            let error = match self.attempt(&record).await {
                Ok(()) => {
                    let record = &mut campaign.records[index];
                    record.status = RecipientStatus::Sent;
                    record.last_error = None;
                    tracing::info!(attempts = record.attempts, "Email sent");
                    self.reporter.on_event(DispatchEvent::RecipientSucceeded {
                        record: record.clone(),
                        progress: campaign.progress(),
                    });
                    return Ok(());
                }
                Err(e) => e,
            };

            if matches!(error, MailClientError::Connection(_)) {
                self.connected = false;
            }
            let can_retry = error.is_retryable()
                && retry.allows_another(record.attempts)
                && !campaign.is_cancelled();
            if !can_retry {
                self.fail(campaign, index, error.kind(), &error);
                return Ok(());
            }

            campaign.records[index].last_error = Some(FailureReason {
                kind: error.kind(),
                detail: error.to_string(),
            });
            let delay = retry.backoff(record.attempts);
            tracing::warn!(
                error = %error,
                attempt = record.attempts,
                max_attempts = retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying recipient after failure"
            );
            sleep(delay).await;

            if campaign.is_cancelled() {
                self.fail(campaign, index, error.kind(), &error);
                return Ok(());
            }
        }
    }

    async fn attempt(&mut self, record: &RecipientRecord) -> Result<(), MailClientError> {
        let message = self.template_engine.resolve(&self.template, record);
        for warning in &message.warnings {
            tracing::warn!(%warning, "Template not fully resolved");
        }

        self.adapter.compose_message().await?;
        self.adapter.set_recipients(&record.email, &record.cc).await?;
        if let Some(path) = &record.attachment_path {
            self.adapter.set_attachment(path).await?;
        }
        self.adapter.set_body(&message.subject, &message.body).await?;

        match timeout(self.settings.send_timeout(), self.adapter.send()).await {
            Ok(result) => result,
            Err(_) => Err(MailClientError::TransientSend(format!(
                "no answer within {:?}",
                self.settings.send_timeout()
            ))),
        }
    }

    #[tracing::instrument(name = "Connecting to the mail client", skip(self))]
    async fn connect(&mut self) -> Result<(), ConnectionLost> {
        let policy = self.settings.connection_policy();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let connecting = timeout(self.settings.connect_timeout(), self.adapter.connect());
            let result = match connecting.await {
                Ok(result) => result,
                Err(_) => Err(MailClientError::Connection(format!(
                    "no answer within {:?}",
                    self.settings.connect_timeout()
                ))),
            };
            match result {
                Ok(()) => {
                    self.connected = true;
                    tracing::info!(attempts, "Connected to the mail client");
                    return Ok(());
                }
                Err(e) if policy.allows_another(attempts) => {
                    let delay = policy.backoff(attempts);
                    tracing::warn!(error = %e, attempt = attempts, "Mail client connection failed");
                    sleep(delay).await;
                }
                Err(error) => return Err(ConnectionLost { error, attempts }),
            }
        }
    }

    fn fail(
        &self,
        campaign: &mut CampaignState,
        index: usize,
        kind: ErrorKind,
        error: &MailClientError,
    ) {
        let record = &mut campaign.records[index];
        record.status = RecipientStatus::Failed;
        record.last_error = Some(FailureReason {
            kind,
            detail: error.to_string(),
        });
        tracing::error!(error = %error, attempts = record.attempts, "Email failed");
        let record = record.clone();
        self.reporter.on_event(DispatchEvent::RecipientFailed {
            record,
            error: kind,
            progress: campaign.progress(),
        });
    }
}
