use std::{path::Path, sync::Arc};

use anyhow::Context;

use crate::{
    configuration::{DispatchSettings, PreferencesFile, Settings},
    dispatch::{CampaignHandle, CampaignOutcome, DispatchEngine, DispatchError},
    domain::RecipientRecord,
    importer::{self, ImportWarning, RecipientImporter},
    mail_client::{ConsoleMailClient, MailClientAdapter},
    progress::{CampaignStatus, ChannelReporter, DispatchEvent, ProgressReporter},
    template::{
        DEFAULT_TEMPLATE_NAME, ResolvedMessage, Template, TemplateEngine, TemplateStore,
        sample_recipient,
    },
};

#[derive(Debug)]
pub struct LoadedData {
    pub loaded: usize,
    pub sendable: usize,
    pub warnings: Vec<ImportWarning>,
}

/// Everything the presentation layer drives: one method per command.
pub struct Application {
    settings: Settings,
    preferences: PreferencesFile,
    templates: TemplateStore,
    engine: DispatchEngine,
    recipients: Vec<RecipientRecord>,
    current_template: Template,
}

impl Application {
    pub fn build(configuration: Settings) -> anyhow::Result<Self> {
        Self::build_with_adapter(configuration, ConsoleMailClient::new())
    }

    pub fn build_with_adapter(
        configuration: Settings,
        adapter: impl MailClientAdapter + 'static,
    ) -> anyhow::Result<Self> {
        let preferences = PreferencesFile::load(&configuration.application.preferences_path);
        let templates = TemplateStore::load(&configuration.application.template_store_path)
            .context("Failed to load saved templates")?;

        let current_template = preferences
            .get()
            .last_selected_template
            .as_deref()
            .and_then(|name| templates.get(name).ok())
            .unwrap_or_else(TemplateStore::builtin);

        let (dispatch, template_engine) = effective_settings(&configuration, &preferences);
        let engine = DispatchEngine::new(adapter, dispatch, template_engine);

        Ok(Self {
            settings: configuration,
            preferences,
            templates,
            engine,
            recipients: Vec::new(),
            current_template,
        })
    }

    pub fn recipients(&self) -> &[RecipientRecord] {
        &self.recipients
    }

    pub fn current_template(&self) -> &Template {
        &self.current_template
    }

    pub fn template_names(&self) -> Vec<String> {
        self.templates.names()
    }

    pub fn status(&self) -> CampaignStatus {
        self.engine.status()
    }

    pub fn is_sending(&self) -> bool {
        self.status() == CampaignStatus::Running
    }

    #[tracing::instrument(name = "Export Template", skip(self))]
    pub async fn export_template(&self, path: &Path) -> anyhow::Result<()> {
        importer::export_template(path)
            .await
            .context("Failed to export the recipient sheet template")
    }

    /// Replaces the current recipient list; the previous import is discarded.
    #[tracing::instrument(name = "Load Data", skip(self))]
    pub async fn load_data(&mut self, path: &Path) -> anyhow::Result<LoadedData> {
        if self.engine.is_running() {
            anyhow::bail!("Can't load new data while sending");
        }
        let rows = importer::load_rows(path)
            .await
            .context("Failed to read the recipient file")?;
        let outcome =
            RecipientImporter::new(self.settings.dispatch.duplicate_policy).import(rows);

        self.preferences
            .update(|p| p.last_data_path = Some(path.to_path_buf()))
            .context("Failed to save preferences")?;

        let loaded = LoadedData {
            loaded: outcome.records.len(),
            sendable: outcome.sendable(),
            warnings: outcome.warnings,
        };
        self.recipients = outcome.records;
        Ok(loaded)
    }

    #[tracing::instrument(name = "Preview", skip(self))]
    pub fn preview(&self, sample_full_name: &str) -> anyhow::Result<ResolvedMessage> {
        let record = sample_recipient(sample_full_name).map_err(anyhow::Error::msg)?;
        let (_, template_engine) = effective_settings(&self.settings, &self.preferences);
        Ok(template_engine.preview(&self.current_template, &record))
    }

    /// Edits the template that the next campaign will use.
    pub fn edit_template(&mut self, subject: impl Into<String>, body: impl Into<String>) {
        self.current_template.subject = subject.into();
        self.current_template.body = body.into();
    }

    #[tracing::instrument(name = "Save Template", skip(self))]
    pub fn save_template(&mut self, name: &str) -> anyhow::Result<()> {
        let template = Template::new(
            name.trim(),
            self.current_template.subject.clone(),
            self.current_template.body.clone(),
        );
        self.templates.save(template.clone())?;
        self.current_template = template;
        self.remember_template()
    }

    #[tracing::instrument(name = "Select Template", skip(self))]
    pub fn select_template(&mut self, name: &str) -> anyhow::Result<()> {
        self.current_template = self.templates.get(name)?;
        self.remember_template()
    }

    #[tracing::instrument(name = "Delete Template", skip(self))]
    pub fn delete_template(&mut self, name: &str) -> anyhow::Result<()> {
        self.templates.delete(name)?;
        if self.current_template.name == name {
            self.select_template(DEFAULT_TEMPLATE_NAME)?;
        }
        Ok(())
    }

    pub fn set_paragraph_spacing(&mut self, spacing: u32) -> anyhow::Result<()> {
        self.preferences
            .update(|p| p.paragraph_spacing = Some(spacing))
            .context("Failed to save preferences")
    }

    pub fn set_max_attempts(&mut self, max_attempts: u32) -> anyhow::Result<()> {
        self.preferences
            .update(|p| p.max_attempts = Some(max_attempts))
            .context("Failed to save preferences")
    }

    /// Hands the loaded recipients to a new campaign. They come back through
    /// [`Application::finish`].
    #[tracing::instrument(name = "Start Sending", skip(self, reporter))]
    pub fn start_sending(
        &mut self,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<CampaignHandle, DispatchError> {
        if self.engine.is_running() {
            return Err(DispatchError::CampaignAlreadyRunning);
        }
        if !self.recipients.iter().any(|r| r.is_pending()) {
            return Err(DispatchError::NoRecipients);
        }

        let (dispatch, template_engine) = effective_settings(&self.settings, &self.preferences);
        self.engine.configure(dispatch, template_engine);

        let recipients = std::mem::take(&mut self.recipients);
        self.engine
            .start(recipients, self.current_template.clone(), reporter)
    }

    #[tracing::instrument(name = "Stop Sending", skip(self))]
    pub fn stop_sending(&self) -> bool {
        self.engine.cancel()
    }

    /// Takes back the recipients of a finished campaign, with their final state.
    pub fn finish(&mut self, outcome: CampaignOutcome) {
        self.recipients = outcome.recipients;
    }

    fn remember_template(&mut self) -> anyhow::Result<()> {
        let name = self.current_template.name.clone();
        self.preferences
            .update(|p| p.last_selected_template = Some(name))
            .context("Failed to save preferences")
    }

    /// Runs one campaign over the last used (or configured) data file, logging
    /// progress until it ends or Ctrl-C stops it.
    pub async fn run_until_stopped(mut self) -> anyhow::Result<()> {
        let data_path = self
            .preferences
            .get()
            .last_data_path
            .clone()
            .or_else(|| self.settings.application.data_path.clone());
        let Some(data_path) = data_path else {
            tracing::warn!("No recipient file configured, nothing to send");
            return Ok(());
        };

        let loaded = self.load_data(&data_path).await?;
        for warning in &loaded.warnings {
            tracing::warn!(%warning, "Recipient row excluded");
        }

        let (reporter, mut events) = ChannelReporter::new();
        let handle = self.start_sending(Arc::new(reporter))?;
        tracing::info!(
            campaign_id = %handle.id(),
            recipients = loaded.sendable,
            "Sending started"
        );
        let presentation = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });

        let finished = handle.wait();
        tokio::pin!(finished);
        let outcome = tokio::select! {
            outcome = &mut finished => outcome?,
            _ = tokio::signal::ctrl_c() => {
                self.stop_sending();
                finished.await?
            }
        };
        self.finish(outcome);
        presentation.await?;
        Ok(())
    }
}

fn effective_settings(
    settings: &Settings,
    preferences: &PreferencesFile,
) -> (DispatchSettings, TemplateEngine) {
    let preferences = preferences.get();
    let dispatch = settings.dispatch.overridden_by(preferences);
    let spacing = preferences
        .paragraph_spacing
        .unwrap_or(settings.template.paragraph_spacing);
    (dispatch, TemplateEngine::new(spacing))
}

fn log_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::RecipientStarted { record, progress } => tracing::info!(
            recipient = %record.email,
            attempt = record.attempts,
            percent = progress.percent(),
            "Sending"
        ),
        DispatchEvent::RecipientSucceeded { record, progress } => tracing::info!(
            recipient = %record.email,
            percent = progress.percent(),
            "Sent"
        ),
        DispatchEvent::RecipientFailed {
            record,
            error,
            progress,
        } => tracing::warn!(
            recipient = %record.email,
            error = ?error,
            attempts = record.attempts,
            detail = record.last_error.as_ref().map(|e| e.detail.as_str()).unwrap_or_default(),
            percent = progress.percent(),
            "Failed"
        ),
        DispatchEvent::CampaignCompleted(summary) => match &summary.error {
            Some(error) => tracing::error!(
                status = ?summary.status,
                error = ?error.reason.kind,
                detail = %error.reason.detail,
                connect_attempts = error.connect_attempts,
                pending = summary.pending,
                "Campaign ended early"
            ),
            None => tracing::info!(
                status = ?summary.status,
                sent = summary.sent,
                failed = summary.failed,
                pending = summary.pending,
                skipped = summary.skipped,
                "All emails have been processed"
            ),
        },
    }
}
