//! sec-agent: security reconnaissance with gated command execution
//!
//! Usage:
//!   sec-agent --scan-logs                    # Scan the host's well-known logs
//!   sec-agent --scan-logs /var/log/auth.log  # Scan specific log files
//!   sec-agent --scan-directory ./uploads     # Flag risky file names
//!   sec-agent --scan-website https://x.test  # Security header check (+ nikto)
//!   sec-agent --audit-system                 # Startup, scheduled, ports, accounts
//!   sec-agent --command "ss -tulpn"          # Run one gated command
//!
//! Every run writes `report-YYYYMMDD-HHMMSS.json` to the output directory.
//!
//! Exit codes: 0 on completion, 1 when the run was refused or failed,
//! 130 when interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use tracing::{error, info};

use sec_agent::agent::{Agent, AgentSettings, StdinConfirm, Task};
use sec_agent::config::AgentConfig;
use sec_agent::error::ConfigError;
use sec_agent::event::{self, AgentEvent};
use sec_agent::platform::OsContext;
use sec_agent::report::{render_summary, save};
use sec_agent::utils::logger;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "sec-agent", version, about = "Security reconnaissance agent")]
#[command(group(ArgGroup::new("action").required(true).multiple(false)))]
struct Cli {
    /// Scan log files; the host's well-known logs when no path is given
    #[arg(long, value_name = "PATH", num_args = 0.., group = "action")]
    scan_logs: Option<Vec<PathBuf>>,

    /// Check an http(s) site you are authorized to test
    #[arg(long, value_name = "URL", group = "action")]
    scan_website: Option<String>,

    /// Walk a directory tree for risky file names
    #[arg(long, value_name = "DIR", group = "action")]
    scan_directory: Option<PathBuf>,

    /// Inspect startup entries, scheduled tasks, listening ports and accounts
    #[arg(long, group = "action")]
    audit_system: bool,

    /// Run a single shell command through the safety gate
    #[arg(long, value_name = "CMD", group = "action")]
    command: Option<String>,

    /// Assume consent for every prompt (recorded in the report)
    #[arg(short = 'y', long, visible_alias = "non-interactive")]
    yes: bool,

    /// Allow commands matching a danger pattern, after confirmation
    #[arg(long)]
    allow_destructive: bool,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Retries after a failed attempt
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Directory for the report and logs
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Install missing scanners with the host package manager
    #[arg(long)]
    install_tools: bool,
}

impl Cli {
    fn task(&self) -> Option<Task> {
        if let Some(paths) = &self.scan_logs {
            return Some(Task::ScanLogs(paths.clone()));
        }
        if let Some(url) = &self.scan_website {
            return Some(Task::ScanWebsite(url.clone()));
        }
        if let Some(dir) = &self.scan_directory {
            return Some(Task::ScanDirectory(dir.clone()));
        }
        if self.audit_system {
            return Some(Task::AuditSystem);
        }
        self.command.clone().map(Task::RunCommand)
    }

    fn settings(&self) -> AgentSettings {
        AgentSettings {
            allow_destructive: self.allow_destructive,
            non_interactive: self.yes,
            install_tools: self.install_tools,
        }
    }

    /// Config file (or defaults) with CLI overrides applied on top.
    fn config(&self) -> Result<AgentConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::default(),
        };
        if let Some(timeout) = self.timeout {
            config.execution.timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.execution.retries = retries;
        }
        if let Some(dir) = &self.output_dir {
            config.report.output_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let exit = runtime.block_on(run(cli));
    // An unanswered confirmation prompt leaves a stdin read parked on the
    // blocking pool; do not wait for it.
    runtime.shutdown_background();
    exit
}

async fn run(cli: Cli) -> ExitCode {
    let Some(task) = cli.task() else {
        eprintln!("Error: no action given");
        return ExitCode::from(EXIT_FAILURE);
    };
    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    // Held until exit so buffered log lines are flushed
    let _log_guard = logger::init_logging(&config.report.output_dir.join("logs"));

    let os = OsContext::detect();
    info!(%os, %task, "starting run");

    let (events, mut rx) = event::init_event_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{event}");
        }
    });

    let mut agent = match Agent::new(config, task, cli.settings(), os, Box::new(StdinConfirm)) {
        Ok(agent) => agent.with_events(events.clone()),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    // Signal branch first so the handler is installed before any prompt
    let outcome = tokio::select! {
        biased;
        Ok(()) = tokio::signal::ctrl_c() => None,
        result = agent.run() => Some(result),
    };
    let mut exit = match outcome {
        Some(Ok(())) => ExitCode::SUCCESS,
        Some(Err(e)) => {
            error!(error = %e, "run refused");
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_FAILURE)
        }
        None => {
            agent.interrupt();
            ExitCode::from(EXIT_INTERRUPTED)
        }
    };

    let report = agent.finish();
    let output_dir = report.metadata().options.output_dir.clone();
    let saved = match save(&report, &output_dir) {
        Ok(path) => {
            event::emit(
                Some(&events),
                AgentEvent::Report {
                    path: path.clone(),
                    summary: report.summary(),
                },
            );
            Some(path)
        }
        Err(e) => {
            error!(error = %e, "failed to save report");
            eprintln!("Error: failed to save report: {e:#}");
            exit = ExitCode::from(EXIT_FAILURE);
            None
        }
    };

    drop(events);
    if let Err(e) = printer.await {
        eprintln!("Warning: event printer stopped: {e}");
    }

    print!("\n{}", render_summary(&report, saved.as_deref()));
    exit
}
