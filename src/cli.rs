use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use crate::archive::history::{RunHistory, DEFAULT_HISTORY_DIR};
use crate::archive::store::ArtifactStore;
use crate::config;
use crate::model::issue::TicketId;
use crate::sync::{SyncOptions, SyncOrchestrator};
use crate::tracker::redmine::RedmineClient;

pub const EXIT_CONFIG_ERROR: u8 = 2;

const EXAMPLES: &str = "\
EXAMPLES:
  redmine-fetch --output-dir /tmp/redmine_data 49121 50001
  redmine-fetch -o ./data --skip-existing 49122
  redmine-fetch -o ./data --no-attachments 12345 12346 12347
  redmine-fetch --show-history                 today's runs
  redmine-fetch --show-history --date 20240501
  redmine-fetch --list-history-dates

Connection settings come from --url/--api-key, REDMINE_URL/REDMINE_API_KEY
(also read from ./.env), or [redmine] url/api_key in ~/.redmine-fetch/config.toml.
Every run is appended to <history-dir>/yyyymmdd.log.";

/// Fetch Redmine tickets with their comments and attachments into JSON files.
#[derive(Debug, Parser)]
#[command(name = "redmine-fetch", version, after_help = EXAMPLES)]
pub struct Cli {
    /// Directory that receives issues/ and attachments/
    #[arg(
        short,
        long,
        value_name = "DIR",
        required_unless_present_any = ["show_history", "list_history_dates"]
    )]
    pub output_dir: Option<PathBuf>,

    /// Ticket ids to fetch, processed in the given order
    #[arg(
        value_name = "ISSUE_ID",
        required_unless_present_any = ["show_history", "list_history_dates"]
    )]
    pub issue_ids: Vec<TicketId>,

    /// Log each step in detail
    #[arg(short, long)]
    pub verbose: bool,

    /// Leave issue and attachment files from earlier runs untouched
    #[arg(long)]
    pub skip_existing: bool,

    /// Do not download attachments
    #[arg(long)]
    pub no_attachments: bool,

    /// Skip the connection check before the first ticket
    #[arg(long)]
    pub no_preflight: bool,

    /// Where run history is kept
    #[arg(long, value_name = "DIR", default_value = DEFAULT_HISTORY_DIR)]
    pub history_dir: PathBuf,

    #[arg(long, env = "REDMINE_URL")]
    pub url: Option<String>,

    #[arg(long, env = "REDMINE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Config file (defaults to ~/.redmine-fetch/config.toml)
    #[arg(long, value_name = "FILE", env = "REDMINE_FETCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print today's run history and exit
    #[arg(long, conflicts_with = "list_history_dates")]
    pub show_history: bool,

    /// Day to show with --show-history (yyyymmdd)
    #[arg(long, requires = "show_history", value_parser = parse_day)]
    pub date: Option<NaiveDate>,

    /// List the days that have run history and exit
    #[arg(long)]
    pub list_history_dates: bool,
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| format!("expected yyyymmdd, got {s:?}"))
}

impl Cli {
    /// Ticket ids in input order with repeats removed.
    pub fn unique_ids(&self) -> Vec<TicketId> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for &id in &self.issue_ids {
            if seen.insert(id) {
                ids.push(id);
            } else {
                warn!(ticket = %id, "duplicate ticket id ignored");
            }
        }
        ids
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            skip_existing: self.skip_existing,
            download_attachments: !self.no_attachments,
            preflight: !self.no_preflight,
        }
    }
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let history = RunHistory::new(&cli.history_dir);

    if cli.show_history {
        show_history(&history, cli.date)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.list_history_dates {
        list_history_dates(&history)?;
        return Ok(ExitCode::SUCCESS);
    }

    run_sync(&cli, history).await
}

async fn run_sync(cli: &Cli, history: RunHistory) -> Result<ExitCode> {
    let output_dir = cli
        .output_dir
        .clone()
        .context("--output-dir is required")?;

    let loaded = config::load_config(cli.url.clone(), cli.api_key.clone(), cli.config.as_deref());
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return Ok(ExitCode::from(EXIT_CONFIG_ERROR));
        }
    };

    let ids = cli.unique_ids();
    info!("tickets: {:?}", ids.iter().map(|id| id.get()).collect::<Vec<_>>());
    info!("output directory: {}", output_dir.display());
    if cli.no_attachments {
        info!("attachment download disabled");
    }

    let client = RedmineClient::new(&config.url, config.api_key.clone());
    let orchestrator = SyncOrchestrator::new(
        Box::new(client),
        ArtifactStore::new(output_dir),
        history,
        cli.sync_options(),
    );

    let interrupted = orchestrator.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current ticket");
            interrupted.store(true, Ordering::SeqCst);
        }
    });

    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let summary = orchestrator.run(&ids, &command_line).await;
    Ok(ExitCode::from(summary.exit_code()))
}

fn show_history(history: &RunHistory, date: Option<NaiveDate>) -> Result<()> {
    let entries = match date {
        Some(day) => history.read_date(day),
        None => history.read_today(),
    }
    .context("Failed to read run history")?;

    if entries.is_empty() {
        println!("No history for this day");
        return Ok(());
    }
    println!("=== Run history ===");
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}

fn list_history_dates(history: &RunHistory) -> Result<()> {
    let dates = history
        .list_dates()
        .context("Failed to list history files")?;

    if dates.is_empty() {
        println!("No history files");
        return Ok(());
    }
    println!("=== Days with history ===");
    for date in dates {
        println!("{} ({})", date.format("%Y%m%d"), date.format("%Y-%m-%d"));
    }
    Ok(())
}
