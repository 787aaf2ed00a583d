use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ticketload::config;
use ticketload::harness::{RunSummary, WorkerHarness, WorkerOutcome, WorkerReport};
use ticketload::protocol::Action;

#[derive(Parser)]
#[command(name = "ticketload", about = "Concurrent exerciser for the ticket booking service", version)]
struct Cli {
    /// Number of concurrent workers
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    num_workers: u32,

    /// What each worker does after logging in
    action: ActionArg,

    /// Tickets each worker books (required for `book`)
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    num_tickets: Option<u32>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Where log records are written
    #[arg(long, default_value = "client.log")]
    log_file: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Query,
    Book,
}

impl Cli {
    fn action(&self) -> Action {
        match self.action {
            ActionArg::Query => Action::Query,
            ActionArg::Book => match self.num_tickets {
                Some(num_tickets) => Action::Book { num_tickets },
                None => Cli::command()
                    .error(
                        clap::error::ErrorKind::MissingRequiredArgument,
                        "`book` needs <NUM_TICKETS>",
                    )
                    .exit(),
            },
        }
    }
}

fn init_logging(path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let action = cli.action();

    init_logging(&cli.log_file)?;
    info!(
        "Client starting with {} workers for {action} operation",
        cli.num_workers
    );

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::ClientConfig::load_or_default(&config_path)?.with_env_overrides()?;
    if let Some(host) = cli.host.clone() {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!("Config loaded, target {}:{}", config.host, config.port);

    let harness = WorkerHarness::new(config)?;
    let reports = harness.run(cli.num_workers as usize, action).await;

    for report in &reports {
        print_report(report);
    }
    let summary = RunSummary::from_reports(&reports);
    println!(
        "{} workers: {} completed, {} aborted ({} succeeded, {} rejected, {} failed)",
        summary.workers,
        summary.completed,
        summary.aborted,
        summary.succeeded,
        summary.rejected,
        summary.failed
    );

    if summary.aborted > 0 {
        anyhow::bail!(
            "{} of {} workers aborted (run {})",
            summary.aborted,
            summary.workers,
            harness.run_id()
        );
    }
    Ok(())
}

fn print_report(report: &WorkerReport) {
    let id = report.identity;
    match &report.outcome {
        WorkerOutcome::Completed(Ok(resp)) => {
            println!("----------------------------------------");
            println!(
                "Worker {} (user {}, session {}) req_id={}:",
                id.index,
                id.user_id,
                report.session_id.unwrap_or_default(),
                resp.header.req_id
            );
            match resp.opcode {
                Some(opcode) => println!("  OpCode: {:#X} ({opcode})", resp.header.opcode),
                None => println!("  OpCode: {:#X} (unknown)", resp.header.opcode),
            }
            println!(
                "  Status: {}",
                if resp.is_success() { "SUCCESS" } else { "FAIL" }
            );
            println!("  Remaining Tickets: {}", resp.body.remaining_tickets);
            println!("  Message: {}", resp.body.message);
            println!("----------------------------------------");
        }
        WorkerOutcome::Completed(Err(e)) => {
            eprintln!("Worker {} (user {}): operation failed: {e}", id.index, id.user_id);
        }
        WorkerOutcome::Aborted(e) => {
            eprintln!("Worker {} (user {}): aborted: {e}", id.index, id.user_id);
        }
        WorkerOutcome::Crashed(reason) => {
            eprintln!("Worker {} (user {}): crashed: {reason}", id.index, id.user_id);
        }
    }
}
