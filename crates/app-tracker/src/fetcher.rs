//! Mail fetching: query the mailbox, drop already-processed and non-job
//! messages, and hand back records oldest first.

use crate::error::TrackerResult;
use crate::filter::{EmailFilter, FilterDecision};
use crate::retry::{retry, RetryPolicy};
use crate::state::RunState;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracker_types::EmailRecord;

/// Read-only mailbox collaborator
#[allow(async_fn_in_trait)]
pub trait Mailbox {
    /// Ids of every message matching a provider search query, newest first
    async fn list_message_ids(&self, query: &str) -> TrackerResult<Vec<String>>;

    /// Full message, normalized. `detection_reason` is left empty.
    async fn get_message(&self, message_id: &str) -> TrackerResult<EmailRecord>;
}

/// Time range searched by one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    /// The last N days
    Days(u32),
    /// Everything received after a point in time
    Since(DateTime<Utc>),
}

impl FetchWindow {
    /// Start of the window. Never earlier than the Unix epoch, so an
    /// oversized day count searches the whole mailbox.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = match self {
            FetchWindow::Days(days) => Duration::try_days(*days as i64)
                .and_then(|span| now.checked_sub_signed(span))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            FetchWindow::Since(ts) => *ts,
        };
        start.max(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Gmail search query for a window start. `after:` accepts epoch seconds.
pub fn build_query(start: DateTime<Utc>, job_query: &str) -> String {
    format!("after:{} {}", start.timestamp(), job_query.trim())
}

/// Result of one fetch
#[derive(Debug, Default)]
pub struct FetchedBatch {
    /// Job-related records, ascending by received time
    pub records: Vec<EmailRecord>,
    /// Messages the filter rejected, with their received time
    pub blocked: Vec<(String, DateTime<Utc>)>,
    /// Listed messages whose details could not be retrieved
    pub failed: Vec<String>,
    /// Unprocessed messages left for a later cycle by the per-cycle cap
    pub deferred: usize,
}

impl FetchedBatch {
    /// True when every unprocessed message in the window was retrieved
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.deferred == 0
    }
}

pub struct MailFetcher<M> {
    mailbox: M,
    filter: EmailFilter,
    job_query: String,
    max_results: u32,
    retry: RetryPolicy,
}

impl<M: Mailbox> MailFetcher<M> {
    pub fn new(
        mailbox: M,
        filter: EmailFilter,
        job_query: impl Into<String>,
        max_results: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mailbox,
            filter,
            job_query: job_query.into(),
            max_results,
            retry,
        }
    }

    /// Fetch the window, skipping ids already recorded in `state`.
    ///
    /// Listing failures are retried with backoff and then surface as an
    /// error. At most `max_results` unprocessed messages are retrieved,
    /// oldest first; the rest are counted in `deferred`. A message that
    /// cannot be retrieved is logged and reported in `failed`. Neither kind
    /// is marked processed, so a later cycle over the same window picks
    /// them up.
    pub async fn fetch(&self, window: &FetchWindow, state: &RunState) -> TrackerResult<FetchedBatch> {
        let query = build_query(window.start(Utc::now()), &self.job_query);
        tracing::debug!("Mail query: {}", query);

        let ids = retry(&self.retry, "List messages", || {
            self.mailbox.list_message_ids(&query)
        })
        .await?;

        let mut seen = HashSet::new();
        let mut already_processed = 0;
        let mut pending: Vec<String> = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .filter(|id| {
                let processed = state.is_processed(id);
                if processed {
                    already_processed += 1;
                }
                !processed
            })
            .collect();

        let mut batch = FetchedBatch::default();

        // Listing is newest first; keep the oldest so later cycles move forward
        let cap = self.max_results as usize;
        if pending.len() > cap {
            batch.deferred = pending.len() - cap;
            pending.drain(..batch.deferred);
            tracing::warn!(
                "{} unprocessed messages exceed the limit of {}, deferring {} to the next cycle",
                cap + batch.deferred,
                cap,
                batch.deferred
            );
        }

        for id in pending {
            let email = match retry(&self.retry, "Get message", || self.mailbox.get_message(&id)).await {
                Ok(email) => email,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Failed to fetch message {}: {}", id, e);
                    batch.failed.push(id);
                    continue;
                }
            };

            match self
                .filter
                .check(&email.sender, &email.subject, &email.body_snippet)
            {
                FilterDecision::Keep(reason) => {
                    tracing::debug!("  Kept {} - {} ({})", email.message_id, email.subject, reason);
                    batch.records.push(EmailRecord {
                        detection_reason: reason,
                        ..email
                    });
                }
                FilterDecision::Block(reason) => {
                    tracing::trace!("  Skipped {} - {} ({})", email.message_id, email.subject, reason);
                    batch.blocked.push((email.message_id, email.received_at));
                }
            }
        }

        batch.records.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });

        tracing::info!(
            "Fetched {} job emails ({} filtered out, {} already processed, {} failed)",
            batch.records.len(),
            batch.blocked.len(),
            already_processed,
            batch.failed.len()
        );

        Ok(batch)
    }
}
