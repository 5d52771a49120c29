use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use proctor::api::ApiClient;
use proctor::config::{self, ProctorConfig};
use proctor::detector::ScriptedFeed;
use proctor::logging;
use proctor::monitor::{Collaborators, HostUi, Monitor, Notice, Route};
use proctor::session_log::{ExamRef, Identity, SessionStatus};
use proctor::submitter::LogStore;
use proctor::upload::{BlobStore, DisabledStore, UploadcareStore};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "proctor", version, about = "Webcam violation monitor for online exams")]
struct Cli {
    /// Config file to use instead of ~/.config/proctor.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded detection script through the monitor
    Run(RunArgs),
    /// Print the stored cheating logs for an exam
    Logs {
        /// Durable exam id or exam code
        exam_id: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    exam_id: String,

    /// Human-facing exam code, sent alongside the durable id
    #[arg(long)]
    exam_code: Option<String>,

    #[arg(long)]
    username: String,

    #[arg(long)]
    email: String,

    /// JSON-lines detection script, one step per tick
    #[arg(long)]
    script: PathBuf,

    /// Submit the session log once the script runs out
    #[arg(long)]
    submit: bool,
}

/// Host that reports notices and navigation through the log.
struct LoggingHost;

impl HostUi for LoggingHost {
    fn show_notice(&self, notice: Notice) {
        match notice {
            Notice::Warning { .. } => warn!("{notice}"),
            Notice::Terminated { .. } => error!("{notice}"),
        }
    }

    fn navigate(&self, route: Route) {
        info!("Navigating to {route:?}");
    }
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    match cli.command {
        Command::Run(args) => run(&config, args),
        Command::Logs { exam_id } => print_logs(&config, &exam_id),
    }
}

fn api_client(config: &ProctorConfig) -> Result<ApiClient> {
    let base = config.resolve_api_base();
    info!("Using cheating log API at {base}");
    Ok(ApiClient::new(&base, config.api_token())?)
}

fn blob_store(config: &ProctorConfig) -> Arc<dyn BlobStore> {
    let Some(key) = config.upload_key() else {
        warn!("No upload key configured, violations will be counted without evidence");
        return Arc::new(DisabledStore);
    };
    match UploadcareStore::new(&config.upload.upload_url, &config.upload.cdn_url, key) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!("Evidence uploads disabled: {err}");
            Arc::new(DisabledStore)
        }
    }
}

fn run(config: &ProctorConfig, args: RunArgs) -> Result<()> {
    let feed = ScriptedFeed::load(&args.script).context("Detector failed to initialize, monitoring cannot start")?;
    let feed = Arc::new(feed);
    info!("Detector ready with {} scripted ticks", feed.remaining());

    let identity = Identity::new(ExamRef::new(args.exam_id, args.exam_code), args.username, args.email);
    let monitor = Monitor::new(
        identity,
        config.monitoring.clone(),
        Collaborators {
            camera: feed.clone(),
            detector: feed.clone(),
            blob_store: blob_store(config),
            log_store: Box::new(api_client(config)?),
            host: Arc::new(LoggingHost),
        },
    );

    monitor.start_timer()?;
    while !feed.is_exhausted() && monitor.status() == SessionStatus::Monitoring {
        thread::sleep(POLL_INTERVAL);
    }
    monitor.stop_timer();

    let counts = monitor.counts();
    info!(
        "Monitoring finished: {} violations (noFace {}, multipleFace {}, cellPhone {}, prohibitedObject {}), {} uploads pending",
        counts.total(),
        counts.no_face,
        counts.multiple_face,
        counts.cell_phone,
        counts.prohibited_object,
        monitor.pending_uploads()
    );

    match monitor.status() {
        SessionStatus::Terminated => {
            monitor.join_auto_persist();
        }
        SessionStatus::Monitoring if args.submit => match monitor.submit() {
            Ok(persisted) => info!("Session log saved as {}", persisted.id),
            Err(err) => {
                if err.is_retryable() {
                    warn!("Submission failed but can be retried");
                }
                return Err(err.into());
            }
        },
        status => info!("Session log left unsubmitted ({status})"),
    }
    Ok(())
}

fn print_logs(config: &ProctorConfig, exam_id: &str) -> Result<()> {
    let logs = api_client(config)?.fetch_logs(exam_id)?;
    info!("{} cheating logs for exam {exam_id}", logs.len());
    println!("{}", serde_json::to_string_pretty(&logs)?);
    Ok(())
}
