//! Run orchestration: fetch, classify and reconcile one batch at a time.

use crate::classifier::llm::CompletionClient;
use crate::classifier::StatusClassifier;
use crate::error::TrackerResult;
use crate::fetcher::{FetchWindow, MailFetcher, Mailbox};
use crate::reconciler::{ReconcileOutcome, SheetReconciler, SheetStore};
use crate::state::RunState;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracker_types::{ApplicationKey, ClassificationResult, EmailRecord, UNKNOWN_COMPANY, UNKNOWN_ROLE};

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub filtered: usize,
    pub created: usize,
    pub updated: usize,
    pub audit_only: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
    pub deferred: usize,
    pub fetch_failed: bool,
}

impl CycleSummary {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created => self.created += 1,
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::AuditOnly => self.audit_only += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
            ReconcileOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fetch_failed {
            return write!(f, "fetch failed, nothing processed");
        }
        write!(
            f,
            "{} fetched ({} filtered out): {} created, {} updated, {} audit only, {} unchanged, {} skipped, {} errors",
            self.fetched,
            self.filtered,
            self.created,
            self.updated,
            self.audit_only,
            self.unchanged,
            self.skipped,
            self.errors
        )?;
        if self.deferred > 0 {
            write!(f, ", {} deferred", self.deferred)?;
        }
        Ok(())
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM. A signal that cannot be
/// registered is logged and never fires.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Row key for a classified email. Missing values become placeholders.
pub fn resolve_key(result: &ClassificationResult) -> ApplicationKey {
    ApplicationKey::new(
        result.company.as_deref().unwrap_or(UNKNOWN_COMPANY),
        result.role.as_deref().unwrap_or(UNKNOWN_ROLE),
    )
}

pub struct Tracker<M, C, S> {
    fetcher: MailFetcher<M>,
    classifier: StatusClassifier<C>,
    reconciler: SheetReconciler<S>,
    overlap: chrono::Duration,
}

impl<M, C, S> Tracker<M, C, S>
where
    M: Mailbox,
    C: CompletionClient,
    S: SheetStore,
{
    pub fn new(
        fetcher: MailFetcher<M>,
        classifier: StatusClassifier<C>,
        reconciler: SheetReconciler<S>,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            reconciler,
            overlap: chrono::Duration::zero(),
        }
    }

    /// Margin subtracted from `last_fetch` when resuming
    pub fn with_overlap(mut self, overlap: chrono::Duration) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn reconciler(&self) -> &SheetReconciler<S> {
        &self.reconciler
    }

    /// Run one fetch-classify-reconcile cycle and return the next checkpoint.
    ///
    /// Records are handled oldest first. A failing record is counted and
    /// left unprocessed, and `last_fetch` stops at its timestamp so the next
    /// cycle picks it up again. When the fetch left messages behind (unreadable
    /// or over the per-cycle cap), `last_fetch` is held so the next resume
    /// window starts where this one did. Only authentication errors abort the
    /// cycle.
    pub async fn run_cycle(
        &self,
        state: RunState,
        window: &FetchWindow,
    ) -> TrackerResult<(RunState, CycleSummary)> {
        let cycle_start = Utc::now();
        let mut summary = CycleSummary::default();

        let batch = match self.fetcher.fetch(window, &state).await {
            Ok(batch) => batch,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!("[{}] Fetch failed, deferring to next cycle: {}", e.stage(), e);
                summary.fetch_failed = true;
                return Ok((state, summary));
            }
        };

        let mut next = state;
        summary.fetched = batch.records.len();
        summary.filtered = batch.blocked.len();
        summary.errors = batch.failed.len();
        summary.deferred = batch.deferred;

        let hold = (!batch.is_complete()).then(|| self.hold_point(window, cycle_start));

        for (message_id, received_at) in &batch.blocked {
            next.mark_processed(message_id, *received_at);
        }

        let mut earliest_failure = None;
        for email in &batch.records {
            match self.process(email).await {
                Ok(outcome) => {
                    summary.record(&outcome);
                    next.mark_processed(&email.message_id, email.received_at);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        "[{}] Failed to process {} ({}): {}",
                        e.stage(),
                        email.message_id,
                        email.subject,
                        e
                    );
                    summary.errors += 1;
                    earliest_failure.get_or_insert(email.received_at);
                }
            }
        }

        next.last_fetch = Some(
            [earliest_failure, hold]
                .into_iter()
                .flatten()
                .fold(cycle_start, |a, b| a.min(b)),
        );

        Ok((next, summary))
    }

    /// Checkpoint whose resume window starts at this window's start
    fn hold_point(&self, window: &FetchWindow, cycle_start: DateTime<Utc>) -> DateTime<Utc> {
        window
            .start(cycle_start)
            .checked_add_signed(self.overlap)
            .unwrap_or(cycle_start)
    }

    async fn process(&self, email: &EmailRecord) -> TrackerResult<ReconcileOutcome> {
        let result = self.classifier.classify(email).await;
        let key = resolve_key(&result);

        tracing::debug!(
            "{} classified as {} by {} ({})",
            email.message_id,
            result.status,
            result.source.as_str(),
            result.reasoning
        );

        let outcome = self.reconciler.apply(&key, &result, email).await?;
        match &outcome {
            ReconcileOutcome::Skipped(reason) => {
                tracing::info!("  Skipped {}: {}", email.subject, reason)
            }
            outcome => tracing::info!("  {} -> {} [{}]", key, result.status, outcome),
        }

        Ok(outcome)
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Each cycle resumes from the checkpoint, and `checkpoint` is called
    /// after every completed cycle. Shutdown is only observed while sleeping
    /// between cycles, so a cycle in progress always finishes.
    pub async fn run_live<F, Fut>(
        &self,
        mut state: RunState,
        interval: Duration,
        default_days: u32,
        mut checkpoint: F,
        shutdown: Fut,
    ) -> TrackerResult<RunState>
    where
        F: FnMut(&mut RunState) -> TrackerResult<()>,
        Fut: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Live mode: polling every {}s", interval.as_secs());

        loop {
            let window = state.resume_window(self.overlap, default_days);
            let (next, summary) = self.run_cycle(state, &window).await?;
            state = next;
            tracing::info!("Cycle complete: {}", summary);

            if let Err(e) = checkpoint(&mut state) {
                tracing::error!("Failed to save checkpoint: {}", e);
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping");
                    return Ok(state);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::filter::EmailFilter;
    use crate::retry::RetryPolicy;
    use crate::testing::{at, email, FakeCompletion, FakeMailbox, FakeSheet};
    use std::cell::Cell;
    use tokio_test::{assert_err, assert_ok};
    use tracker_types::ApplicationStatus;

    fn job_email(id: &str, subject: &str, body: &str, day: u32) -> EmailRecord {
        let mut record = email(id, subject, day);
        record.body_snippet = body.to_string();
        record
    }

    fn applied() -> EmailRecord {
        job_email(
            "m1",
            "Thank you for applying to Acme Corp",
            "We received your application for the Data Engineer position.",
            1,
        )
    }

    fn interview() -> EmailRecord {
        job_email(
            "m2",
            "Interview invitation",
            "We would like to invite you to interview with Acme Corp for the Data Engineer position.",
            5,
        )
    }

    fn late_rejection() -> EmailRecord {
        job_email(
            "m3",
            "Your application to Acme Corp",
            "Unfortunately we will not be moving forward with your application for the Data Engineer position.",
            3,
        )
    }

    fn tracker(
        mailbox: &FakeMailbox,
        sheet: &FakeSheet,
    ) -> Tracker<FakeMailbox, FakeCompletion, FakeSheet> {
        tracker_with_filter(mailbox, sheet, EmailFilter::default())
    }

    fn tracker_with_filter(
        mailbox: &FakeMailbox,
        sheet: &FakeSheet,
        filter: EmailFilter,
    ) -> Tracker<FakeMailbox, FakeCompletion, FakeSheet> {
        build_tracker(mailbox, sheet, filter, 100)
    }

    fn build_tracker(
        mailbox: &FakeMailbox,
        sheet: &FakeSheet,
        filter: EmailFilter,
        max_results: u32,
    ) -> Tracker<FakeMailbox, FakeCompletion, FakeSheet> {
        Tracker::new(
            MailFetcher::new(
                mailbox.clone(),
                filter,
                "subject:(application)",
                max_results,
                RetryPolicy::immediate(2),
            ),
            StatusClassifier::heuristic_only(),
            SheetReconciler::with_retry(sheet.clone(), RetryPolicy::immediate(2)),
        )
        .with_overlap(overlap())
    }

    fn overlap() -> chrono::Duration {
        chrono::Duration::minutes(10)
    }

    #[tokio::test]
    async fn test_application_lifecycle_across_cycles() {
        let mailbox = FakeMailbox::new(vec![applied()]);
        let sheet = FakeSheet::default();
        let tracker = tracker(&mailbox, &sheet);

        let (state, summary) =
            assert_ok!(tracker.run_cycle(RunState::default(), &FetchWindow::Days(30)).await);
        assert_eq!(summary.created, 1);
        let rows = sheet.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].company, "Acme Corp");
        assert_eq!(rows[0].role, "Data Engineer");
        assert_eq!(rows[0].status, ApplicationStatus::Applied);

        mailbox.deliver(interview());
        let (state, summary) = assert_ok!(tracker.run_cycle(state, &FetchWindow::Days(30)).await);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(sheet.rows()[0].status, ApplicationStatus::Interview);

        mailbox.deliver(late_rejection());
        let (state, summary) = assert_ok!(tracker.run_cycle(state, &FetchWindow::Days(30)).await);
        assert_eq!(summary.audit_only, 1);

        let row = &sheet.rows()[0];
        assert_eq!(row.status, ApplicationStatus::Interview);
        assert_eq!(row.last_updated, Some(at(5)));
        assert_eq!(row.applied_date, Some(at(1)));
        assert_eq!(row.notes.lines().count(), 3);
        assert!(state.is_processed("m3"));
    }

    #[tokio::test]
    async fn test_single_batch_is_processed_in_timestamp_order() {
        let mailbox = FakeMailbox::new(vec![interview(), late_rejection(), applied()]);
        let sheet = FakeSheet::default();

        let (_, summary) = assert_ok!(
            tracker(&mailbox, &sheet)
                .run_cycle(RunState::default(), &FetchWindow::Days(30))
                .await
        );
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 2);

        let rows = sheet.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ApplicationStatus::Interview);
        assert_eq!(rows[0].last_updated, Some(at(5)));
    }

    #[tokio::test]
    async fn test_processed_messages_are_not_reapplied() {
        let mailbox = FakeMailbox::new(vec![applied(), interview()]);
        let sheet = FakeSheet::default();
        let tracker = tracker(&mailbox, &sheet);

        let (state, _) =
            assert_ok!(tracker.run_cycle(RunState::default(), &FetchWindow::Days(30)).await);
        let writes = sheet.write_count();

        let (_, summary) = assert_ok!(tracker.run_cycle(state, &FetchWindow::Days(30)).await);
        assert_eq!(summary, CycleSummary::default());
        assert_eq!(sheet.write_count(), writes);
    }

    #[tokio::test]
    async fn test_lost_checkpoint_is_idempotent() {
        let mailbox = FakeMailbox::new(vec![applied(), interview(), late_rejection()]);
        let sheet = FakeSheet::default();
        let tracker = tracker(&mailbox, &sheet);

        assert_ok!(tracker.run_cycle(RunState::default(), &FetchWindow::Days(30)).await);
        let before = sheet.rows();

        let (_, summary) =
            assert_ok!(tracker.run_cycle(RunState::default(), &FetchWindow::Days(30)).await);
        assert_eq!(summary.unchanged, 3);
        assert_eq!(sheet.rows(), before);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_state() {
        let mailbox = FakeMailbox::new(vec![applied()]);
        mailbox.fail_next_lists(5);
        let sheet = FakeSheet::default();

        let mut state = RunState::default();
        state.last_fetch = Some(at(2));
        let (next, summary) = assert_ok!(
            tracker(&mailbox, &sheet)
                .run_cycle(state.clone(), &FetchWindow::Days(30))
                .await
        );
        assert!(summary.fetch_failed);
        assert_eq!(next, state);
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_failed_record_is_retried_next_cycle() {
        let mailbox = FakeMailbox::new(vec![applied()]);
        let sheet = FakeSheet::default();
        sheet.fail_next_writes(2);
        let tracker = tracker(&mailbox, &sheet);

        let (state, summary) =
            assert_ok!(tracker.run_cycle(RunState::default(), &FetchWindow::Days(30)).await);
        assert_eq!(summary.errors, 1);
        assert!(!state.is_processed("m1"));
        assert_eq!(state.last_fetch, Some(at(1)));

        let (state, summary) = assert_ok!(tracker.run_cycle(state, &FetchWindow::Days(30)).await);
        assert_eq!(summary.created, 1);
        assert!(state.is_processed("m1"));
    }

    #[tokio::test]
    async fn test_unreadable_message_holds_checkpoint_until_read() {
        let mailbox = FakeMailbox::new(vec![applied(), interview()]);
        mailbox.fail_message("m1");
        let sheet = FakeSheet::default();
        let tracker = tracker(&mailbox, &sheet);

        let window = FetchWindow::Since(at(1));
        let (state, summary) = assert_ok!(tracker.run_cycle(RunState::default(), &window).await);
        assert_eq!(summary.errors, 1);
        assert!(!state.is_processed("m1"));
        assert!(state.is_processed("m2"));
        assert_eq!(state.resume_window(overlap(), 30), window);

        mailbox.restore_message("m1");
        let window = state.resume_window(overlap(), 30);
        let (state, summary) = assert_ok!(tracker.run_cycle(state, &window).await);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.fetched, 1);
        assert!(state.is_processed("m1"));
        assert!(state.last_fetch > Some(at(5)));
        assert_eq!(sheet.rows()[0].applied_date, Some(at(1)));
    }

    #[tokio::test]
    async fn test_messages_over_cap_are_picked_up_next_cycle() {
        let mailbox = FakeMailbox::new(vec![applied(), late_rejection(), interview()]);
        let sheet = FakeSheet::default();
        let tracker = build_tracker(&mailbox, &sheet, EmailFilter::default(), 2);

        let window = FetchWindow::Days(30);
        let (state, summary) = assert_ok!(tracker.run_cycle(RunState::default(), &window).await);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.deferred, 1);
        assert!(state.is_processed("m1"));
        assert!(state.is_processed("m3"));
        assert!(!state.is_processed("m2"));
        assert!(state.last_fetch < Some(Utc::now() - chrono::Duration::days(29)));

        let window = state.resume_window(overlap(), 30);
        let (state, summary) = assert_ok!(tracker.run_cycle(state, &window).await);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.deferred, 0);
        assert!(state.is_processed("m2"));
        assert_eq!(sheet.rows()[0].status, ApplicationStatus::Interview);
    }

    #[tokio::test]
    async fn test_filtered_messages_are_marked_processed() {
        let mut alert = email("m9", "New jobs for you", 2);
        alert.body_snippet = "Roles you might like".to_string();
        let mailbox = FakeMailbox::new(vec![alert]);
        let sheet = FakeSheet::default();

        let (state, summary) = assert_ok!(
            tracker(&mailbox, &sheet)
                .run_cycle(RunState::default(), &FetchWindow::Days(30))
                .await
        );
        assert_eq!(summary.filtered, 1);
        assert!(state.is_processed("m9"));
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_unclassifiable_email_is_skipped() {
        let mailbox = FakeMailbox::new(vec![job_email(
            "m4",
            "About your candidacy",
            "We will be in touch.",
            2,
        )]);
        let sheet = FakeSheet::default();
        let filter = EmailFilter::from_config(&FilterConfig {
            extra_positive_phrases: vec!["your candidacy".to_string()],
            ..FilterConfig::default()
        });

        let (state, summary) = assert_ok!(
            tracker_with_filter(&mailbox, &sheet, filter)
                .run_cycle(RunState::default(), &FetchWindow::Days(30))
                .await
        );
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.skipped, 1);
        assert!(state.is_processed("m4"));
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let mailbox = FakeMailbox::new(vec![applied()]);
        mailbox.revoke_auth();
        let sheet = FakeSheet::default();

        let result = tracker(&mailbox, &sheet)
            .run_cycle(RunState::default(), &FetchWindow::Days(30))
            .await;
        let err = assert_err!(result);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_live_mode_stops_on_shutdown() {
        let mailbox = FakeMailbox::new(vec![applied()]);
        let sheet = FakeSheet::default();
        let tracker = tracker(&mailbox, &sheet);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut tx = Some(tx);
        let checkpoints = Cell::new(0);

        let state = assert_ok!(
            tracker
                .run_live(
                    RunState::default(),
                    Duration::from_secs(60),
                    30,
                    |state| {
                        checkpoints.set(checkpoints.get() + 1);
                        assert!(state.is_processed("m1"));
                        if let Some(tx) = tx.take() {
                            let _ = tx.send(());
                        }
                        Ok(())
                    },
                    async {
                        let _ = rx.await;
                    },
                )
                .await
        );

        assert_eq!(checkpoints.get(), 1);
        assert!(state.last_fetch.is_some());
        assert_eq!(sheet.rows().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let signal = shutdown_signal();
        tokio::pin!(signal);

        // first poll installs the handlers
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut signal)
            .await
            .is_err());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        assert_ok!(tokio::time::timeout(Duration::from_secs(5), signal).await);
    }

    #[test]
    fn test_resolve_key_placeholders() {
        let result = crate::testing::classified(ApplicationStatus::Applied);
        let key = resolve_key(&result);
        assert_eq!(key.company, UNKNOWN_COMPANY);
        assert_eq!(key.role, UNKNOWN_ROLE);
    }
}
