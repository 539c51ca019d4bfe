#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientName(String);

impl RecipientName {
    /// Any non-empty name is accepted except one carrying braces, which would
    /// read as a template placeholder once substituted.
    pub fn parse(s: String) -> Result<RecipientName, String> {
        let s = s.trim().to_string();
        if s.is_empty() {
            Err("Full name is empty".to_string())
        } else if s.contains(['{', '}']) {
            Err(format!("{} must not contain braces.", s))
        } else {
            Ok(Self(s))
        }
    }

    /// `"Dela Cruz, Juan"` gives `"Dela Cruz"`; without a comma the first
    /// whitespace-delimited token is used.
    pub fn surname(&self) -> &str {
        match self.0.split_once(',') {
            Some((before, _)) => before.trim(),
            None => self.0.split_whitespace().next().unwrap_or_default(),
        }
    }
}

impl AsRef<str> for RecipientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
