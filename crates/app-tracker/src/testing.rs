//! In-memory collaborators shared by the unit tests.
//!
//! Fakes are cheap to clone and clones share state, so a test can keep a
//! handle after moving one into the pipeline.

use crate::classifier::llm::CompletionClient;
use crate::error::{TrackerError, TrackerResult};
use crate::fetcher::Mailbox;
use crate::reconciler::SheetStore;
use chrono::{DateTime, TimeZone, Utc};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use tracker_types::{
    ApplicationStatus, ClassificationResult, ClassificationSource, EmailRecord, SheetRow,
};

/// 09:00 UTC on the given day of March 2024
pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
}

pub fn email(message_id: &str, subject: &str, day: u32) -> EmailRecord {
    EmailRecord {
        message_id: message_id.to_string(),
        thread_id: format!("thread-{}", message_id),
        sender: "Acme Careers <careers@acme.com>".to_string(),
        subject: subject.to_string(),
        body_snippet: String::new(),
        received_at: at(day),
        detection_reason: String::new(),
    }
}

pub fn classified(status: ApplicationStatus) -> ClassificationResult {
    ClassificationResult {
        status,
        source: ClassificationSource::Heuristic,
        company: None,
        role: None,
        reasoning: "test".to_string(),
    }
}

#[derive(Default)]
struct MailboxState {
    messages: Vec<EmailRecord>,
    failing_lists: u32,
    failing_messages: HashSet<String>,
    auth_revoked: bool,
    detail_calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Rc<RefCell<MailboxState>>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<EmailRecord>) -> Self {
        let mailbox = Self::default();
        mailbox.state.borrow_mut().messages = messages;
        mailbox
    }

    pub fn deliver(&self, message: EmailRecord) {
        self.state.borrow_mut().messages.push(message);
    }

    pub fn fail_next_lists(&self, count: u32) {
        self.state.borrow_mut().failing_lists = count;
    }

    pub fn fail_message(&self, message_id: &str) {
        self.state
            .borrow_mut()
            .failing_messages
            .insert(message_id.to_string());
    }

    pub fn restore_message(&self, message_id: &str) {
        self.state.borrow_mut().failing_messages.remove(message_id);
    }

    pub fn revoke_auth(&self) {
        self.state.borrow_mut().auth_revoked = true;
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.state.borrow().detail_calls.clone()
    }
}

impl Mailbox for FakeMailbox {
    async fn list_message_ids(&self, _query: &str) -> TrackerResult<Vec<String>> {
        let mut state = self.state.borrow_mut();
        if state.auth_revoked {
            return Err(TrackerError::auth("invalid_grant"));
        }
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(TrackerError::fetch("503 backend error"));
        }

        Ok(state
            .messages
            .iter()
            .rev()
            .map(|m| m.message_id.clone())
            .collect())
    }

    async fn get_message(&self, message_id: &str) -> TrackerResult<EmailRecord> {
        let mut state = self.state.borrow_mut();
        state.detail_calls.push(message_id.to_string());

        if state.failing_messages.contains(message_id) {
            return Err(TrackerError::fetch(format!("{} unavailable", message_id)));
        }

        state
            .messages
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned()
            .ok_or_else(|| TrackerError::fetch(format!("{} not found", message_id)))
    }
}

#[derive(Default)]
struct CompletionState {
    replies: VecDeque<TrackerResult<String>>,
    models_called: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeCompletion {
    state: Rc<RefCell<CompletionState>>,
}

impl FakeCompletion {
    /// Replies are handed out in order, one per call
    pub fn new(replies: Vec<TrackerResult<String>>) -> Self {
        let client = Self::default();
        client.state.borrow_mut().replies = replies.into();
        client
    }

    pub fn models_called(&self) -> Vec<String> {
        self.state.borrow().models_called.clone()
    }
}

impl CompletionClient for FakeCompletion {
    async fn complete(&self, model: &str, _system: &str, _prompt: &str) -> TrackerResult<String> {
        let mut state = self.state.borrow_mut();
        state.models_called.push(model.to_string());
        state
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(TrackerError::classification("no scripted reply")))
    }
}

#[derive(Default)]
struct SheetState {
    rows: Vec<SheetRow>,
    failing_writes: u32,
    writes: usize,
    reads: usize,
}

#[derive(Clone, Default)]
pub struct FakeSheet {
    state: Rc<RefCell<SheetState>>,
}

impl FakeSheet {
    pub fn rows(&self) -> Vec<SheetRow> {
        self.state.borrow().rows.clone()
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.state.borrow_mut().failing_writes = count;
    }

    pub fn write_count(&self) -> usize {
        self.state.borrow().writes
    }

    pub fn read_count(&self) -> usize {
        self.state.borrow().reads
    }

    fn write(&self, apply: impl FnOnce(&mut Vec<SheetRow>)) -> TrackerResult<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TrackerError::sheet("429 quota exceeded"));
        }
        apply(&mut state.rows);
        state.writes += 1;
        Ok(())
    }
}

impl SheetStore for FakeSheet {
    async fn read_rows(&self) -> TrackerResult<Vec<(u32, SheetRow)>> {
        let mut state = self.state.borrow_mut();
        state.reads += 1;
        Ok(state
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx as u32 + 2, row.clone()))
            .collect())
    }

    async fn append_row(&self, row: &SheetRow) -> TrackerResult<()> {
        self.write(|rows| rows.push(row.clone()))
    }

    async fn update_row(&self, row_number: u32, row: &SheetRow) -> TrackerResult<()> {
        let idx = row_number as usize - 2;
        self.write(|rows| rows[idx] = row.clone())
    }
}
