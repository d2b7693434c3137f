use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::llm::{DEFAULT_ENDPOINT, DEFAULT_MODELS};
use crate::filter::DEFAULT_JOB_QUERY;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Checkpoint file holding the last fetch time and processed message ids
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// How often to poll in live mode (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Lookback window when no checkpoint exists (days)
    #[serde(default = "default_lookback_days")]
    pub default_days: u32,

    /// Overlap subtracted from the checkpoint when resuming (seconds)
    #[serde(default = "default_overlap")]
    pub overlap_secs: u64,

    /// How long processed message ids are remembered (days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum messages listed per cycle
    #[serde(default = "default_max_fetch")]
    pub max_fetch_per_cycle: u32,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default)]
    pub sheet: SheetConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Path to Google OAuth client credentials JSON file
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    /// Path to store the OAuth token cache
    #[serde(default = "default_token_cache")]
    pub token_cache_path: PathBuf,

    /// Authorized-user credentials; when all three are set the installed
    /// flow (and its browser consent) is skipped
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Timeout for a single Gmail or Sheets request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetConfig {
    /// Existing spreadsheet to write to. When unset the id stored in the
    /// checkpoint is used, and failing that a new spreadsheet is created.
    #[serde(default)]
    pub spreadsheet_id: Option<String>,

    /// Title for newly created spreadsheets
    #[serde(default = "default_spreadsheet_name")]
    pub spreadsheet_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Groq API key; heuristic-only classification when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Models to try, best first
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Timeout per model call (seconds)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Gmail search expression restricting senders and subjects
    #[serde(default = "default_job_query")]
    pub job_query: String,

    /// Sender substrings to block in addition to the built-in list
    #[serde(default)]
    pub extra_ignored_senders: Vec<String>,

    /// Phrases that mark an email as job-related, in addition to the built-in list
    #[serde(default)]
    pub extra_positive_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts for mailbox calls before deferring to the next cycle
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("credentials/run_state.json")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_lookback_days() -> u32 {
    30
}

fn default_overlap() -> u64 {
    600 // 10 minutes
}

fn default_retention_days() -> u32 {
    180
}

fn default_max_fetch() -> u32 {
    500
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials/credentials.json")
}

fn default_token_cache() -> PathBuf {
    PathBuf::from("credentials/token_cache.json")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_spreadsheet_name() -> String {
    "Job Application Tracker".to_string()
}

fn default_llm_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
}

fn default_llm_timeout() -> u64 {
    20
}

fn default_job_query() -> String {
    DEFAULT_JOB_QUERY.to_string()
}

fn default_fetch_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8_000
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_cache_path: default_token_cache(),
            client_id: None,
            client_secret: None,
            refresh_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            spreadsheet_name: default_spreadsheet_name(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_llm_endpoint(),
            models: default_models(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            job_query: default_job_query(),
            extra_ignored_senders: Vec::new(),
            extra_positive_phrases: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: default_fetch_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            poll_interval_secs: default_poll_interval(),
            default_days: default_lookback_days(),
            overlap_secs: default_overlap(),
            retention_days: default_retention_days(),
            max_fetch_per_cycle: default_max_fetch(),
            google: GoogleConfig::default(),
            sheet: SheetConfig::default(),
            llm: LlmConfig::default(),
            filter: FilterConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load the TOML file if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env_from(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`.
    /// Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("GROQ_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(id) = var("SPREADSHEET_ID") {
            self.sheet.spreadsheet_id = Some(id);
        }
        if let Some(name) = var("SPREADSHEET_NAME") {
            self.sheet.spreadsheet_name = name;
        }
        if let Some(interval) = var("POLLING_INTERVAL") {
            self.poll_interval_secs = interval
                .trim()
                .parse()
                .context("POLLING_INTERVAL must be a valid number of seconds")?;
        }
        if let Some(path) = var("TRACKER_STATE_PATH") {
            self.state_path = PathBuf::from(path);
        }
        if let Some(path) = var("GOOGLE_CREDENTIALS_PATH") {
            self.google.credentials_path = PathBuf::from(path);
        }
        if let Some(path) = var("GOOGLE_TOKEN_CACHE") {
            self.google.token_cache_path = PathBuf::from(path);
        }
        if let Some(id) = var("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(id);
        }
        if let Some(secret) = var("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(secret);
        }
        if let Some(token) = var("GOOGLE_REFRESH_TOKEN") {
            self.google.refresh_token = Some(token);
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.default_days == 0 {
            anyhow::bail!("default_days must be greater than zero");
        }
        if self.llm.api_key.is_some() && self.llm.models.is_empty() {
            anyhow::bail!("llm.models must list at least one model when an API key is set");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn overlap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.overlap_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.google.request_timeout_secs)
    }

    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.fetch_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry.initial_backoff_ms),
            max_delay: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn example() -> Self {
        let mut config = Config::default();
        config.sheet.spreadsheet_id = Some("your-spreadsheet-id".to_string());
        config.llm.api_key = Some("your-groq-api-key".to_string());
        config
    }
}
