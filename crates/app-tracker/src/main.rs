use anyhow::{Context, Result};
use app_tracker::auth::authenticate;
use app_tracker::classifier::llm::{GroqClient, LlmClassifier};
use app_tracker::classifier::StatusClassifier;
use app_tracker::fetcher::{FetchWindow, MailFetcher};
use app_tracker::filter::EmailFilter;
use app_tracker::gmail_client::GmailClient;
use app_tracker::orchestrator::shutdown_signal;
use app_tracker::reconciler::SheetReconciler;
use app_tracker::sheets_client::GoogleSheetsStore;
use app_tracker::{Config, RunState, Tracker};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type LiveTracker = Tracker<GmailClient, GroqClient, GoogleSheetsStore>;

#[derive(Parser)]
#[command(name = "app-tracker")]
#[command(about = "Track job applications from Gmail in a Google Sheet")]
#[command(
    long_about = "Scans Gmail for job application emails, classifies each one \
    (Applied, In Review, Interview, Offer, Rejected) and keeps one row per \
    company and role up to date in a Google Sheet.\n\n\
    Without flags, one run resumes from the last checkpoint."
)]
struct Cli {
    /// Scan the last N days instead of resuming from the checkpoint
    #[arg(short, long, value_name = "N", conflicts_with = "live")]
    days: Option<u32>,

    /// Keep polling until interrupted with Ctrl+C or SIGTERM
    #[arg(short, long)]
    live: bool,

    /// Seconds between polls in live mode (overrides config)
    #[arg(short, long, value_name = "SECS")]
    interval: Option<u64>,

    /// TOML config file; missing files fall back to defaults
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "tracker.toml",
        env = "TRACKER_CONFIG"
    )]
    config: PathBuf,

    /// Checkpoint file (overrides config)
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print application counts per status
    Stats,

    /// Delete every application row, keeping the header
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(interval) = cli.interval {
        config.poll_interval_secs = interval;
    }
    if let Some(state_path) = &cli.state {
        config.state_path = state_path.clone();
    }
    config.validate()?;

    if let Some(Commands::Wipe { yes: false }) = cli.command {
        anyhow::bail!("Refusing to wipe the sheet without --yes");
    }

    let mut state = RunState::load(&config.state_path)?;
    let tracker = build_tracker(&config, &mut state).await?;
    let store = tracker.reconciler().store();

    match cli.command {
        Some(Commands::Stats) => {
            let stats = tracker.reconciler().statistics().await?;
            println!("{}", stats);
            println!("Sheet: {}", store.spreadsheet_url());
        }
        Some(Commands::Wipe { .. }) => {
            store.clear().await?;
            println!("Cleared {}", store.spreadsheet_url());
        }
        None if cli.live => {
            let state_path = config.state_path.clone();
            let retention = config.retention();
            tracker
                .run_live(
                    state,
                    config.poll_interval(),
                    config.default_days,
                    |state| {
                        state.prune(Utc::now() - retention);
                        state.save(&state_path)
                    },
                    shutdown_signal(),
                )
                .await?;
        }
        None => {
            let window = match cli.days {
                Some(days) => FetchWindow::Days(days),
                None => state.resume_window(config.overlap(), config.default_days),
            };
            run_once(&tracker, &config, state, window).await?;
        }
    }

    Ok(())
}

async fn build_tracker(config: &Config, state: &mut RunState) -> Result<LiveTracker> {
    let auth = authenticate(&config.google).await?;
    let timeout = config.request_timeout();

    let mailbox = GmailClient::new(auth.clone(), timeout)?;
    let store = GoogleSheetsStore::ensure_spreadsheet(
        auth,
        &config.sheet,
        state.spreadsheet_id.as_deref(),
        timeout,
    )
    .await?;

    if config.sheet.spreadsheet_id.is_none()
        && state.spreadsheet_id.as_deref() != Some(store.spreadsheet_id())
    {
        state.spreadsheet_id = Some(store.spreadsheet_id().to_string());
        save_state(state, &config.state_path)?;
    }

    let classifier = match &config.llm.api_key {
        Some(api_key) => {
            let client = GroqClient::new(
                &config.llm.endpoint,
                api_key,
                Duration::from_secs(config.llm.timeout_secs),
            )?;
            tracing::info!("LLM classification enabled ({} models)", config.llm.models.len());
            StatusClassifier::new(LlmClassifier::from_config(client, &config.llm))
        }
        None => {
            tracing::warn!("GROQ_API_KEY not set, using keyword heuristics only");
            StatusClassifier::heuristic_only()
        }
    };

    let fetcher = MailFetcher::new(
        mailbox,
        EmailFilter::from_config(&config.filter),
        config.filter.job_query.clone(),
        config.max_fetch_per_cycle,
        config.fetch_retry_policy(),
    );

    Ok(Tracker::new(fetcher, classifier, SheetReconciler::new(store)).with_overlap(config.overlap()))
}

async fn run_once(
    tracker: &LiveTracker,
    config: &Config,
    state: RunState,
    window: FetchWindow,
) -> Result<()> {
    let (mut state, summary) = tracker.run_cycle(state, &window).await?;
    tracing::info!("Run complete: {}", summary);

    if !summary.fetch_failed {
        let pruned = state.prune(Utc::now() - config.retention());
        if pruned > 0 {
            tracing::debug!("Pruned {} old message ids", pruned);
        }
        save_state(&state, &config.state_path)?;
    }

    let store = tracker.reconciler().store();
    if let Err(e) = store.sort_by_last_updated().await {
        tracing::warn!("Failed to sort sheet: {}", e);
    }

    let stats = tracker.reconciler().statistics().await?;
    println!("{}", summary);
    println!("{}", stats);
    println!("Sheet: {}", store.spreadsheet_url());

    if summary.fetch_failed {
        anyhow::bail!("Mailbox could not be read; nothing was processed");
    }
    Ok(())
}

fn save_state(state: &RunState, path: &Path) -> Result<()> {
    state
        .save(path)
        .with_context(|| format!("Failed to save checkpoint to {}", path.display()))
}
