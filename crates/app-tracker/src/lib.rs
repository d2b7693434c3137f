pub mod auth;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod gmail_client;
pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod sheets_client;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{TrackerError, TrackerResult};
pub use orchestrator::{CycleSummary, Tracker};
pub use state::RunState;
