use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod sheet;
mod status;

pub use sheet::{
    format_timestamp, parse_timestamp, SheetRow, NOTE_TIMESTAMP_FORMAT, SHEET_HEADERS,
    TIMESTAMP_FORMAT,
};
pub use status::ApplicationStatus;

/// Placeholder company when neither the classifier nor the sender identifies one
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

/// Placeholder role when no job title could be extracted
pub const UNKNOWN_ROLE: &str = "Unknown Role";

/// A job-related email as seen by the tracker. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Provider-assigned message id, stable across fetches
    pub message_id: String,
    pub thread_id: String,
    /// Raw "From" header
    pub sender: String,
    pub subject: String,
    /// Provider snippet followed by the plain-text body, truncated
    pub body_snippet: String,
    /// Whole-second UTC timestamp
    pub received_at: DateTime<Utc>,
    /// Why the mail filter kept this message
    pub detection_reason: String,
}

impl EmailRecord {
    pub fn sender_address(&self) -> String {
        parse_from_header(&self.sender).0
    }

    /// First label of the sender's domain, e.g. `acme` for `jobs@acme.co.uk`
    pub fn sender_domain(&self) -> Option<String> {
        let address = self.sender_address();
        let (_, domain) = address.rsplit_once('@')?;
        domain
            .split('.')
            .next()
            .filter(|label| !label.is_empty())
            .map(str::to_lowercase)
    }
}

/// Parse a "From" header like "John Doe <john@example.com>" into (address, name)
pub fn parse_from_header(from: &str) -> (String, Option<String>) {
    let from = from.trim();

    if let Some(bracket_start) = from.rfind('<') {
        if let Some(bracket_end) = from.rfind('>') {
            if bracket_end > bracket_start {
                let address = from[bracket_start + 1..bracket_end].trim().to_string();
                let name = from[..bracket_start].trim();
                let name = name.trim_matches('"').trim();
                let name = if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                };
                return (address, name);
            }
        }
    }

    (from.to_string(), None)
}

/// Which stage produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationSource {
    Llm,
    Heuristic,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &str {
        match self {
            ClassificationSource::Llm => "llm",
            ClassificationSource::Heuristic => "heuristic",
        }
    }
}

/// Outcome of classifying one email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub status: ApplicationStatus,
    pub source: ClassificationSource,
    pub company: Option<String>,
    pub role: Option<String>,
    pub reasoning: String,
}

/// Lookup key of a sheet row. Comparison ignores case and surrounding whitespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationKey {
    pub company: String,
    pub role: String,
}

impl ApplicationKey {
    pub fn new(company: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            company: company.into().trim().to_string(),
            role: role.into().trim().to_string(),
        }
    }

    pub fn matches(&self, other: &ApplicationKey) -> bool {
        self.normalized() == other.normalized()
    }

    fn normalized(&self) -> (String, String) {
        (
            self.company.trim().to_lowercase(),
            self.role.trim().to_lowercase(),
        )
    }
}

impl std::fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.company, self.role)
    }
}
