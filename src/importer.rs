use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::domain::{RecipientEmail, RecipientName, RecipientRecord, RecipientStatus};

/// One row of the recipient sheet, as handed over by the spreadsheet reader.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawRow {
    #[serde(rename = "Full Name", default)]
    pub full_name: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "CC", default)]
    pub cc: String,
    #[serde(rename = "Attachment Path", default)]
    pub attachment_path: String,
}

/// What to do when the same address appears on more than one row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    SendAll,
    SkipDuplicates,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid full name, {0}")]
    InvalidName(String),
    #[error("invalid email, {0}")]
    InvalidEmail(String),
    #[error("invalid CC entry, {0}")]
    InvalidCc(String),
    #[error("{0} already appears on row {1}")]
    DuplicateEmail(String, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportWarning {
    /// Spreadsheet row number, the header being row 1.
    pub row: usize,
    pub error: ValidationError,
}

impl std::fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Row {}: {}", self.row, self.error)
    }
}

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub records: Vec<RecipientRecord>,
    pub warnings: Vec<ImportWarning>,
}

impl ImportOutcome {
    /// Records that a campaign would actually attempt.
    pub fn sendable(&self) -> usize {
        self.records.iter().filter(|r| r.is_pending()).count()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("couldn't access the recipient file, io error {0}")]
    Io(#[from] std::io::Error),
    #[error("the recipient file is not a valid row list, {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecipientImporter {
    duplicate_policy: DuplicatePolicy,
}

impl RecipientImporter {
    pub fn new(duplicate_policy: DuplicatePolicy) -> Self {
        Self { duplicate_policy }
    }

    #[tracing::instrument(
        name = "Importing recipient rows",
        skip(self, rows),
        fields(rows = rows.len())
    )]
    pub fn import(&self, rows: Vec<RawRow>) -> ImportOutcome {
        let mut outcome = ImportOutcome::default();
        let mut first_seen: HashMap<String, usize> = HashMap::new();

        for (index, raw) in rows.into_iter().enumerate() {
            let row = index + 2;
            let mut record = match parse_row(row, raw) {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(row, %error, "Row excluded from sending");
                    outcome.warnings.push(ImportWarning { row, error });
                    continue;
                }
            };

            let first_row = *first_seen.entry(record.email.normalized()).or_insert(row);
            if first_row != row && self.duplicate_policy == DuplicatePolicy::SkipDuplicates {
                record.status = RecipientStatus::Skipped;
                outcome.warnings.push(ImportWarning {
                    row,
                    error: ValidationError::DuplicateEmail(
                        record.email.as_ref().to_string(),
                        first_row,
                    ),
                });
            }

            outcome.records.push(record);
        }

        tracing::info!(
            imported = outcome.records.len(),
            sendable = outcome.sendable(),
            warnings = outcome.warnings.len(),
            "Recipient import finished"
        );
        outcome
    }
}

fn parse_row(row: usize, raw: RawRow) -> Result<RecipientRecord, ValidationError> {
    let full_name = RecipientName::parse(raw.full_name).map_err(ValidationError::InvalidName)?;
    let email = RecipientEmail::parse(raw.email).map_err(ValidationError::InvalidEmail)?;
    let cc = raw
        .cc
        .split([';', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| RecipientEmail::parse(entry.to_string()).map_err(ValidationError::InvalidCc))
        .collect::<Result<Vec<_>, _>>()?;
    let attachment_path = Some(raw.attachment_path.trim())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);

    Ok(RecipientRecord::new(row, full_name, email, cc, attachment_path))
}

#[tracing::instrument(name = "Loading recipient rows")]
pub async fn load_rows(path: &Path) -> Result<Vec<RawRow>, ImportError> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}

/// Writes a sheet carrying the expected columns and one sample row.
#[tracing::instrument(name = "Exporting recipient sheet template")]
pub async fn export_template(path: &Path) -> Result<(), ImportError> {
    let sample = vec![RawRow {
        full_name: "Dela Cruz, Juan".to_string(),
        email: "juan@email.com".to_string(),
        cc: String::new(),
        attachment_path: "C:\\Path\\To\\Attachment.pdf".to_string(),
    }];
    let contents = serde_json::to_string_pretty(&sample)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}
