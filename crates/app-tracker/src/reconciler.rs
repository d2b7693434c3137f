//! Sheet reconciliation: merge one classified email into the tracking sheet.
//!
//! The decision is a pure function of the existing row and the incoming
//! email ([`reconcile`]); [`SheetReconciler`] wraps it in a read-modify-write
//! against a [`SheetStore`].
//!
//! With `t` the email timestamp and `L` the row's last update:
//! - `t > L`: the email is authoritative for status, last update and subject
//! - `t == L`: status and subject change only on forward progress
//! - `t < L`: stale; only the applied date may move earlier
//!
//! Every non-skipped email leaves an audit line in Notes. Notes are a sorted
//! set and the applied date is a minimum, so applying the same email twice is
//! a no-op and the final row does not depend on processing order.

use crate::error::{TrackerError, TrackerResult};
use crate::retry::{retry, RetryPolicy};
use std::fmt;
use tracker_types::{
    ApplicationKey, ApplicationStatus, ClassificationResult, EmailRecord, SheetRow,
    NOTE_TIMESTAMP_FORMAT,
};

/// Spreadsheet collaborator. Row numbers are 1-based sheet rows.
#[allow(async_fn_in_trait)]
pub trait SheetStore {
    /// All data rows (header excluded) with their sheet row numbers
    async fn read_rows(&self) -> TrackerResult<Vec<(u32, SheetRow)>>;

    async fn append_row(&self, row: &SheetRow) -> TrackerResult<()>;

    async fn update_row(&self, row_number: u32, row: &SheetRow) -> TrackerResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New row appended
    Created,
    /// Status, last update or subject changed
    Updated,
    /// Only the audit trail (or the applied date) changed
    AuditOnly,
    /// Email already reflected in the row; nothing written
    Unchanged,
    Skipped(String),
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Created => write!(f, "created"),
            ReconcileOutcome::Updated => write!(f, "updated"),
            ReconcileOutcome::AuditOnly => write!(f, "audit only"),
            ReconcileOutcome::Unchanged => write!(f, "unchanged"),
            ReconcileOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

/// What to write for one email
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(String),
    Create(SheetRow),
    /// Replace the row; outcome is `Updated` or `AuditOnly`
    Update(SheetRow, ReconcileOutcome),
    Unchanged,
}

impl Decision {
    pub fn outcome(&self) -> ReconcileOutcome {
        match self {
            Decision::Skip(reason) => ReconcileOutcome::Skipped(reason.clone()),
            Decision::Create(_) => ReconcileOutcome::Created,
            Decision::Update(_, outcome) => outcome.clone(),
            Decision::Unchanged => ReconcileOutcome::Unchanged,
        }
    }
}

/// Audit line recorded in Notes for an email
pub fn audit_line(status: ApplicationStatus, email: &EmailRecord) -> String {
    let mut line = format!(
        "{} {}: {}",
        email.received_at.format(NOTE_TIMESTAMP_FORMAT),
        status,
        single_line(&email.subject)
    );
    if !email.detection_reason.is_empty() {
        line.push_str(&format!(" ({})", single_line(&email.detection_reason)));
    }
    line
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decide how an email changes the row stored under `key`
pub fn reconcile(
    existing: Option<&SheetRow>,
    key: &ApplicationKey,
    result: &ClassificationResult,
    email: &EmailRecord,
) -> Decision {
    let status = result.status;
    if !status.is_known() {
        return Decision::Skip(format!("status unknown: {}", result.reasoning));
    }

    let t = email.received_at;
    let line = audit_line(status, email);

    let Some(existing) = existing else {
        return Decision::Create(SheetRow {
            company: key.company.clone(),
            role: key.role.clone(),
            status,
            applied_date: Some(t),
            last_updated: Some(t),
            email_subject: email.subject.clone(),
            notes: line,
        });
    };

    let mut row = existing.clone();
    match row.last_updated {
        Some(last) if t < last => {}
        Some(last) if t == last => {
            if status.advances(&row.status) || !row.status.is_known() {
                row.status = status;
                row.email_subject = email.subject.clone();
            }
        }
        _ => {
            row.status = status;
            row.last_updated = Some(t);
            row.email_subject = email.subject.clone();
        }
    }

    row.applied_date = Some(row.applied_date.map_or(t, |applied| applied.min(t)));
    row.merge_note(&line);

    if row == *existing {
        return Decision::Unchanged;
    }

    let outcome = if row.status != existing.status
        || row.last_updated != existing.last_updated
        || row.email_subject != existing.email_subject
    {
        ReconcileOutcome::Updated
    } else {
        ReconcileOutcome::AuditOnly
    };

    Decision::Update(row, outcome)
}

/// Counts per status across the sheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total: usize,
    pub by_status: Vec<(ApplicationStatus, usize)>,
}

impl Statistics {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a SheetRow>) -> Self {
        let mut counts = [0usize; ApplicationStatus::ALL.len()];
        let mut total = 0;

        for row in rows.into_iter().filter(|row| !row.is_blank()) {
            total += 1;
            if let Some(idx) = ApplicationStatus::ALL.iter().position(|s| *s == row.status) {
                counts[idx] += 1;
            }
        }

        Self {
            total,
            by_status: ApplicationStatus::ALL.into_iter().zip(counts).collect(),
        }
    }

    pub fn count(&self, status: ApplicationStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total applications: {}", self.total)?;
        for (status, count) in &self.by_status {
            if *count > 0 {
                writeln!(f, "  {:<10} {}", status.as_str(), count)?;
            }
        }
        Ok(())
    }
}

pub struct SheetReconciler<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: SheetStore> SheetReconciler<S> {
    /// Writes are retried once before surfacing a reconciliation error
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::once())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one classified email to the sheet.
    ///
    /// The whole read-decide-write runs inside the retry, so a retried
    /// append re-reads the sheet first and cannot duplicate a row.
    pub async fn apply(
        &self,
        key: &ApplicationKey,
        result: &ClassificationResult,
        email: &EmailRecord,
    ) -> TrackerResult<ReconcileOutcome> {
        if !result.status.is_known() {
            return Ok(reconcile(None, key, result, email).outcome());
        }

        retry(&self.retry, "Sheet update", || self.apply_once(key, result, email))
            .await
            .map_err(|e| match e {
                TrackerError::Auth(_) => e,
                other => TrackerError::Reconciliation {
                    key: key.to_string(),
                    message: other.to_string(),
                },
            })
    }

    async fn apply_once(
        &self,
        key: &ApplicationKey,
        result: &ClassificationResult,
        email: &EmailRecord,
    ) -> TrackerResult<ReconcileOutcome> {
        let rows = self.store.read_rows().await?;
        let existing = rows
            .iter()
            .find(|(_, row)| !row.is_blank() && row.key().matches(key));

        let decision = reconcile(existing.map(|(_, row)| row), key, result, email);
        match &decision {
            Decision::Create(row) => self.store.append_row(row).await?,
            Decision::Update(row, _) => {
                if let Some((row_number, _)) = existing {
                    self.store.update_row(*row_number, row).await?;
                }
            }
            Decision::Skip(_) | Decision::Unchanged => {}
        }

        Ok(decision.outcome())
    }

    pub async fn statistics(&self) -> TrackerResult<Statistics> {
        let rows = self.store.read_rows().await?;
        Ok(Statistics::from_rows(rows.iter().map(|(_, row)| row)))
    }
}
