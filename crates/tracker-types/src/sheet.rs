//! Spreadsheet row model for the `Applications` tab.

use crate::{ApplicationKey, ApplicationStatus};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Column headers, in sheet order (A through G)
pub const SHEET_HEADERS: [&str; 7] = [
    "Company",
    "Role",
    "Status",
    "Applied Date",
    "Last Updated",
    "Email Subject",
    "Notes",
];

/// Format used for timestamp cells (always UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used for the timestamp prefix of audit lines in the Notes column
pub const NOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp cell. Accepts the full format plus the minute and
/// date-only forms older sheets were written with.
pub fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(cell, TIMESTAMP_FORMAT) {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

/// One application row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRow {
    pub company: String,
    pub role: String,
    pub status: ApplicationStatus,
    pub applied_date: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub email_subject: String,
    /// Audit log, one line per reconciled email, kept sorted and deduplicated
    pub notes: String,
}

impl SheetRow {
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(&self.company, &self.role)
    }

    /// Build a row from raw cell values. Short rows are padded; cells that
    /// fail to parse become `None`/`Unknown` rather than errors so a
    /// hand-edited sheet never blocks a run.
    pub fn from_cells(cells: &[String]) -> Self {
        let cell = |idx: usize| cells.get(idx).map(|s| s.trim()).unwrap_or_default();

        let status = match ApplicationStatus::from_label(cell(2)) {
            Some(status) => status,
            None => {
                if !cell(2).is_empty() {
                    tracing::debug!("Unrecognised status cell '{}', reading as Unknown", cell(2));
                }
                ApplicationStatus::Unknown
            }
        };

        SheetRow {
            company: cell(0).to_string(),
            role: cell(1).to_string(),
            status,
            applied_date: parse_timestamp(cell(3)),
            last_updated: parse_timestamp(cell(4)),
            email_subject: cell(5).to_string(),
            notes: cells.get(6).cloned().unwrap_or_default(),
        }
    }

    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.company.clone(),
            self.role.clone(),
            self.status.to_string(),
            self.applied_date.map(format_timestamp).unwrap_or_default(),
            self.last_updated.map(format_timestamp).unwrap_or_default(),
            self.email_subject.clone(),
            self.notes.clone(),
        ]
    }

    /// Merge an audit line into the notes. Returns false if it was already there.
    pub fn merge_note(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        let mut lines: BTreeSet<&str> = self
            .notes
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if !lines.insert(line) {
            return false;
        }

        self.notes = lines.into_iter().collect::<Vec<_>>().join("\n");
        true
    }

    /// Whether the row is blank (e.g. a cleared line in the middle of the sheet)
    pub fn is_blank(&self) -> bool {
        self.company.is_empty() && self.role.is_empty()
    }
}
