use validator::ValidateEmail;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientEmail(String);

impl RecipientEmail {
    pub fn parse(s: String) -> Result<RecipientEmail, String> {
        let s = s.trim().to_string();
        if s.is_empty() {
            return Err("Email address is empty".to_string());
        }
        if !s.validate_email() {
            return Err(format!("{} is not a valid recipient email.", s));
        }
        if s.matches('@').count() != 1 {
            return Err(format!("{} must contain exactly one @ symbol.", s));
        }
        // validator accepts dotless hosts such as `localhost`, a mail client won't.
        let domain = s.rsplit('@').next().unwrap_or_default();
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(format!("{} has an invalid domain part.", s));
        }
        Ok(Self(s))
    }

    /// Lowercased address, used to spot the same mailbox across rows.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }
}

impl AsRef<str> for RecipientEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
