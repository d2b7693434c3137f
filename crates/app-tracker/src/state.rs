//! Persisted run checkpoint.
//!
//! `RunState` is a plain value: loaded once at startup, handed to each cycle,
//! and the returned copy is written back after the cycle completes.

use crate::error::{TrackerError, TrackerResult};
use crate::fetcher::FetchWindow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Start of the last cycle whose records were all handled
    #[serde(default)]
    pub last_fetch: Option<DateTime<Utc>>,

    /// Processed message ids and their received timestamps
    #[serde(default)]
    pub processed: BTreeMap<String, DateTime<Utc>>,

    /// Spreadsheet created on a previous run, when none is configured
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

impl RunState {
    /// Read the checkpoint, or start fresh if the file does not exist.
    pub fn load(path: &Path) -> TrackerResult<Self> {
        if !path.exists() {
            tracing::info!("No checkpoint at {}, starting fresh", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            TrackerError::State(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            TrackerError::State(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Write the checkpoint atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> TrackerResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                TrackerError::State(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::State(format!("Failed to serialize state: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| {
            TrackerError::State(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            TrackerError::State(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            "Saved checkpoint ({} processed ids) to {}",
            self.processed.len(),
            path.display()
        );
        Ok(())
    }

    pub fn is_processed(&self, message_id: &str) -> bool {
        self.processed.contains_key(message_id)
    }

    pub fn mark_processed(&mut self, message_id: &str, received_at: DateTime<Utc>) {
        self.processed.insert(message_id.to_string(), received_at);
    }

    /// Forget ids received before `cutoff`. Returns how many were dropped.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.processed.len();
        self.processed.retain(|_, received| *received >= cutoff);
        before - self.processed.len()
    }

    /// Window for a run that continues from the checkpoint
    pub fn resume_window(&self, overlap: Duration, default_days: u32) -> FetchWindow {
        match self.last_fetch {
            Some(last) => FetchWindow::Since(last - overlap),
            None => FetchWindow::Days(default_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn temp_state_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("app-tracker-{}-{}", name, std::process::id()))
            .join("run_state.json")
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        let state = RunState::load(&temp_state_path("missing")).unwrap();
        assert_eq!(state, RunState::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_state_path("save");
        let mut state = RunState {
            last_fetch: Some(Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()),
            spreadsheet_id: Some("sheet-1".to_string()),
            ..RunState::default()
        };
        state.mark_processed("m1", Utc.with_ymd_and_hms(2026, 3, 30, 8, 0, 0).unwrap());

        state.save(&path).unwrap();
        let loaded = RunState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert!(!path.with_extension("json.tmp").exists());

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_corrupt_file_is_state_error() {
        let path = temp_state_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let result = RunState::load(&path);
        assert!(matches!(result, Err(TrackerError::State(_))));

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_prune_drops_old_ids() {
        let mut state = RunState::default();
        state.mark_processed("old", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        state.mark_processed("new", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        let dropped = state.prune(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(dropped, 1);
        assert!(state.is_processed("new"));
        assert!(!state.is_processed("old"));
    }

    #[test]
    fn test_resume_window() {
        let fresh = RunState::default();
        assert_eq!(fresh.resume_window(Duration::minutes(10), 30), FetchWindow::Days(30));

        let last = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let resumed = RunState {
            last_fetch: Some(last),
            ..RunState::default()
        };
        assert_eq!(
            resumed.resume_window(Duration::minutes(10), 30),
            FetchWindow::Since(Utc.with_ymd_and_hms(2026, 4, 1, 11, 50, 0).unwrap())
        );
    }
}
