use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::html::mail_safe_html;
use crate::domain::{RecipientEmail, RecipientName, RecipientRecord};

pub const FULLNAME_PLACEHOLDER: &str = "{{fullname}}";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateWarning {
    UnresolvedPlaceholder { token: String, in_subject: bool },
}

impl std::fmt::Display for TemplateWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedPlaceholder { token, in_subject } => write!(
                f,
                "unsupported placeholder {} left as is in the {}",
                token,
                if *in_subject { "subject" } else { "body" }
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMessage {
    pub subject: String,
    pub body: String,
    pub warnings: Vec<TemplateWarning>,
}

/// Personalizes a template for one recipient. The subject receives the full
/// name, the body (where the placeholder sits in the greeting) the surname.
#[derive(Debug, Clone, Copy)]
pub struct TemplateEngine {
    paragraph_spacing: u32,
}

impl TemplateEngine {
    pub fn new(paragraph_spacing: u32) -> Self {
        Self { paragraph_spacing }
    }

    pub fn resolve(&self, template: &Template, record: &RecipientRecord) -> ResolvedMessage {
        let subject = template
            .subject
            .replace(FULLNAME_PLACEHOLDER, record.full_name.as_ref());
        let body = template.body.replace(FULLNAME_PLACEHOLDER, &record.surname);

        let mut warnings = unresolved(&subject, true);
        warnings.extend(unresolved(&body, false));

        ResolvedMessage {
            subject,
            body: mail_safe_html(&body, self.paragraph_spacing),
            warnings,
        }
    }

    /// Same resolution as a send, for showing the user what a recipient gets.
    pub fn preview(&self, template: &Template, record: &RecipientRecord) -> ResolvedMessage {
        self.resolve(template, record)
    }
}

fn unresolved(text: &str, in_subject: bool) -> Vec<TemplateWarning> {
    PLACEHOLDER
        .find_iter(text)
        .map(|m| TemplateWarning::UnresolvedPlaceholder {
            token: m.as_str().to_string(),
            in_subject,
        })
        .collect()
}

/// Builds a throwaway record for previews, e.g. `"Smith, John"`.
pub fn sample_recipient(full_name: &str) -> Result<RecipientRecord, String> {
    let full_name = RecipientName::parse(full_name.to_string())?;
    let email = RecipientEmail::parse("preview@example.com".to_string())?;
    Ok(RecipientRecord::new(0, full_name, email, vec![], None))
}
