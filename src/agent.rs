//! Run orchestration.
//!
//! The `Agent` owns the report for one run and is the only thing that
//! appends to it. Every user-supplied command passes through `authorize`,
//! the single gated entry point, before the engine sees it. Engine and
//! extractor results come back as values and are appended here in
//! execution order.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use url::Url;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::event::{self, AgentEvent, EventSink};
use crate::platform::{OsContext, ToolInstaller};
use crate::report::{Action, ActionCategory, Metadata, Report, ReportBuilder, RunOptions};
use crate::scan::{
    AuditPlan, DirectoryScanner, Finding, LogScanner, ScanOutcome, SystemAuditor, WebsiteScanner,
    validate_target,
};
use crate::security::{CONFIRMATION_TOKEN, Decision, SafetyGate, is_affirmative};
use crate::shell::{CommandRecord, CommandRunner, ExecutionRequest, quote_arg};

/// Stderr fragments that mean a command lacked privileges.
const PERMISSION_MARKERS: &[&str] = &["permission denied", "operation not permitted", "access is denied"];

/// Pending operator answer.
pub type ConfirmFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Source of operator confirmations. Nothing runs while one is pending, but
/// the wait yields, so a run can still be interrupted at the prompt.
pub trait Confirm: Send {
    /// Show `prompt` and resolve to whether the operator granted it.
    fn confirm<'a>(&'a mut self, prompt: &'a str) -> ConfirmFuture<'a>;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool + Send,
{
    fn confirm<'a>(&'a mut self, prompt: &'a str) -> ConfirmFuture<'a> {
        let granted = self(prompt);
        Box::pin(async move { granted })
    }
}

/// Prompts on stdout and reads one line from stdin.
#[derive(Debug, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm<'a>(&'a mut self, prompt: &'a str) -> ConfirmFuture<'a> {
        Box::pin(async move {
            let text = format!("\n{prompt}\nType '{CONFIRMATION_TOKEN}' to continue: ");
            let mut stdout = tokio::io::stdout();
            let shown = async {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await
            };
            if let Err(e) = shown.await {
                warn!(error = %e, "failed to show confirmation prompt");
                return false;
            }

            let mut answer = String::new();
            match BufReader::new(tokio::io::stdin()).read_line(&mut answer).await {
                Ok(_) => is_affirmative(&answer),
                Err(e) => {
                    warn!(error = %e, "failed to read confirmation");
                    false
                }
            }
        })
    }
}

/// What a run does. Exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    RunCommand(String),
    /// Empty means the host's well-known log files.
    ScanLogs(Vec<PathBuf>),
    ScanDirectory(PathBuf),
    ScanWebsite(String),
    AuditSystem,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::RunCommand(command) => write!(f, "command: {command}"),
            Task::ScanLogs(paths) if paths.is_empty() => write!(f, "scan-logs: default paths"),
            Task::ScanLogs(paths) => {
                let joined = paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>();
                write!(f, "scan-logs: {}", joined.join(", "))
            }
            Task::ScanDirectory(path) => write!(f, "scan-directory: {}", path.display()),
            Task::ScanWebsite(url) => write!(f, "scan-website: {url}"),
            Task::AuditSystem => write!(f, "audit-system"),
        }
    }
}

/// Operator policy flags for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentSettings {
    pub allow_destructive: bool,
    /// Treat every confirmation as pre-granted (recorded as an action).
    pub non_interactive: bool,
    pub install_tools: bool,
}

pub struct Agent {
    config: AgentConfig,
    settings: AgentSettings,
    task: Task,
    os: OsContext,
    gate: SafetyGate,
    runner: CommandRunner,
    report: ReportBuilder,
    events: Option<EventSink>,
    confirm: Box<dyn Confirm>,
}

impl Agent {
    /// Validate `config` and prepare a run. Fails only on invalid
    /// configuration; nothing has executed yet.
    pub fn new(
        config: AgentConfig,
        task: Task,
        settings: AgentSettings,
        os: OsContext,
        confirm: Box<dyn Confirm>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let gate = SafetyGate::new(config.danger_patterns()?);
        let runner = CommandRunner::new(config.runner_config());
        let options = RunOptions {
            task: task.to_string(),
            timeout_secs: config.execution.timeout_secs,
            retries: config.execution.retries,
            allow_destructive: settings.allow_destructive,
            non_interactive: settings.non_interactive,
            install_tools: settings.install_tools,
            output_dir: config.report.output_dir.clone(),
        };
        let report = ReportBuilder::new(Metadata::capture(os.clone(), options));
        Ok(Self {
            config,
            settings,
            task,
            os,
            gate,
            runner,
            report,
            events: None,
            confirm,
        })
    }

    /// Send console events, including streamed command output, to `sink`.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.runner = self.runner.clone().with_events(sink.clone());
        self.events = Some(sink);
        self
    }

    pub fn report(&self) -> &ReportBuilder {
        &self.report
    }

    /// Execute the run's task. Errors are pre-execution refusals (blocked,
    /// cancelled, invalid input); the report stays valid either way.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        let task = self.task.clone();
        info!(%task, "run started");
        match task {
            Task::RunCommand(command) => self.run_command(&command).await,
            Task::ScanLogs(paths) => {
                self.scan_logs(paths);
                Ok(())
            }
            Task::ScanDirectory(path) => {
                self.think(format!("Scanning directory: {}", path.display()));
                for finding in DirectoryScanner::new().scan(&path) {
                    self.add_finding(finding);
                }
                Ok(())
            }
            Task::ScanWebsite(url) => self.scan_website(&url).await,
            Task::AuditSystem => {
                self.think("Starting system audit...");
                let auditor = SystemAuditor::new(AuditPlan::for_family(self.os.os_family), self.config.timeout());
                let outcome = auditor.run(&self.runner).await;
                self.add_outcome(outcome);
                Ok(())
            }
        }
    }

    /// Record that the run was interrupted. Any in-flight command was
    /// cancelled with its future.
    pub fn interrupt(&mut self) {
        warn!("run interrupted");
        self.think("Interrupted by user.");
        self.report.add_action(Action::new(
            ActionCategory::CommandAttempted,
            format!("Run interrupted by user during {}; in-flight command cancelled", self.task),
        ));
    }

    pub fn finish(self) -> Report {
        self.report.finalize()
    }

    fn emit(&self, event: AgentEvent) {
        event::emit(self.events.as_ref(), event);
    }

    fn think(&self, message: impl Into<String>) {
        self.emit(AgentEvent::Thinking(message.into()));
    }

    fn add_finding(&mut self, finding: Finding) {
        self.emit(AgentEvent::Finding {
            severity: finding.severity,
            title: finding.title.clone(),
            remediation: finding.remediation().to_string(),
        });
        self.report.add_finding(finding);
    }

    fn add_command(&mut self, record: CommandRecord) {
        if !record.succeeded() {
            let stderr = record.stderr().to_lowercase();
            if PERMISSION_MARKERS.iter().any(|m| stderr.contains(m)) {
                self.think("Command failed with a permission error; elevated privileges may be required");
                self.report.add_action(Action::new(
                    ActionCategory::EscalationSuggested,
                    format!(
                        "`{}` failed with a permission error; rerun with elevated privileges (sudo or Administrator)",
                        record.command()
                    ),
                ));
            }
        }
        self.report.add_command(record);
    }

    fn add_outcome(&mut self, outcome: ScanOutcome) {
        for record in outcome.records {
            self.add_command(record);
        }
        for finding in outcome.findings {
            self.add_finding(finding);
        }
    }

    /// Single gate for user-supplied commands.
    ///
    /// - `Blocked`: recorded as an action, returned as an error.
    /// - `RequiresConfirmation`: non-interactive runs proceed with consent
    ///   recorded; interactive runs proceed only on a literal "YES".
    /// - `Permitted`: proceed.
    async fn authorize(&mut self, request: &ExecutionRequest) -> Result<(), AgentError> {
        let command = request.command();
        match self.gate.evaluate(command, request.is_destructive_allowed()) {
            Decision::Permitted => Ok(()),
            Decision::Blocked { pattern, reason } => {
                warn!(command, %pattern, "command blocked");
                self.think(format!("Blocked dangerous command (pattern '{pattern}': {reason})"));
                self.report.add_action(Action::new(
                    ActionCategory::CommandAttempted,
                    format!("Blocked `{command}`: matches '{pattern}' ({reason})"),
                ));
                Err(AgentError::Blocked { pattern, reason })
            }
            Decision::RequiresConfirmation { pattern, reason } => {
                if !request.is_interactive() {
                    info!(command, %pattern, "destructive command pre-approved by non-interactive mode");
                    self.report.add_action(Action::new(
                        ActionCategory::CommandAttempted,
                        format!(
                            "Destructive `{command}` matched '{pattern}' ({reason}); consent pre-granted by non-interactive mode"
                        ),
                    ));
                    return Ok(());
                }

                let prompt = format!("WARNING: `{command}` matches dangerous pattern '{pattern}' ({reason}).");
                if self.confirm.confirm(&prompt).await {
                    self.report.add_action(Action::new(
                        ActionCategory::CommandAttempted,
                        format!("Destructive `{command}` matched '{pattern}'; confirmed by operator"),
                    ));
                    Ok(())
                } else {
                    self.think("Command cancelled.");
                    self.report.add_action(Action::new(
                        ActionCategory::CommandAttempted,
                        format!("Destructive `{command}` matched '{pattern}'; confirmation declined"),
                    ));
                    Err(AgentError::Cancelled {
                        command: command.to_string(),
                    })
                }
            }
        }
    }

    async fn run_command(&mut self, command: &str) -> Result<(), AgentError> {
        let request = ExecutionRequest::new(command, self.config.timeout())?
            .with_retries(self.config.execution.retries)
            .allow_destructive(self.settings.allow_destructive)
            .interactive(!self.settings.non_interactive);
        self.think(format!("Preparing to run command: {command}"));
        self.authorize(&request).await?;
        let record = self.runner.run(&request).await;
        self.add_command(record);
        Ok(())
    }

    fn scan_logs(&mut self, paths: Vec<PathBuf>) {
        self.think("Starting log scan...");
        let paths = if paths.is_empty() {
            self.os.os_family.default_log_paths()
        } else {
            paths
        };
        if paths.is_empty() {
            self.add_finding(
                Finding::informational("No log paths known for this platform")
                    .description("Pass log files explicitly with --scan-logs PATH"),
            );
            return;
        }

        let scanner = LogScanner::new(self.config.scan.log_tail_lines);
        for path in paths {
            self.think(format!("Scanning {}...", path.display()));
            for finding in scanner.scan_file(&path) {
                self.add_finding(finding);
            }
        }
    }

    async fn scan_website(&mut self, raw: &str) -> Result<(), AgentError> {
        let url = validate_target(raw)?;
        if !self.settings.non_interactive {
            let prompt = format!(
                "Legal notice: only scan websites you own or are explicitly authorized to test.\n\
                 Unauthorized scanning may be illegal.\nAbout to scan: {url}"
            );
            if !self.confirm.confirm(&prompt).await {
                self.think("Scan cancelled.");
                self.report.add_action(Action::new(
                    ActionCategory::CommandAttempted,
                    format!("Website scan of {url} cancelled: authorization not confirmed"),
                ));
                return Err(AgentError::Cancelled {
                    command: format!("website scan of {url}"),
                });
            }
        }

        self.think(format!("Starting website scan of {url}..."));
        let timeout = Duration::from_secs(self.config.scan.website_timeout_secs);
        let outcome = WebsiteScanner::new(timeout).scan(&self.runner, &url).await?;
        self.add_outcome(outcome);
        self.run_nikto(&url).await
    }

    async fn run_nikto(&mut self, url: &Url) -> Result<(), AgentError> {
        let tool_timeout = Duration::from_secs(self.config.scan.tool_timeout_secs);
        if !ToolInstaller::is_available("nikto") {
            if !self.settings.install_tools {
                self.think("nikto not available. Rerun with --install-tools to use it.");
                return Ok(());
            }
            self.think("Installing nikto...");
            let installer = ToolInstaller::new(self.os.package_manager, tool_timeout);
            let (record, action) = installer.install(&self.runner, "nikto").await;
            let installed = action.category == ActionCategory::ToolInstalled;
            if let Some(record) = record {
                self.add_command(record);
            }
            self.report.add_action(action);
            if !installed {
                return Ok(());
            }
        }

        self.think("Running nikto scan...");
        let request = ExecutionRequest::new(format!("nikto -h {}", quote_arg(url.as_str())), tool_timeout)?;
        let record = self.runner.run(&request).await;
        self.add_command(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternConfig;
    use crate::platform::OsFamily;
    use crate::scan::Severity;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.execution.timeout_secs = 5;
        config.execution.backoff_base_ms = 1;
        config.execution.backoff_cap_ms = 2;
        config.safety.extra_patterns.push(PatternConfig {
            name: "test-marker".to_string(),
            pattern: "danger-marker".to_string(),
            description: "test-only destructive marker".to_string(),
        });
        config
    }

    fn host() -> OsContext {
        OsContext {
            os_family: OsFamily::current(),
            distribution: None,
            version: None,
            package_manager: None,
        }
    }

    fn agent(task: Task, settings: AgentSettings, confirm: impl Confirm + 'static) -> Agent {
        Agent::new(test_config(), task, settings, host(), Box::new(confirm)).unwrap()
    }

    fn never_asked() -> impl Confirm {
        |prompt: &str| -> bool { panic!("unexpected confirmation prompt: {prompt}") }
    }

    #[tokio::test]
    async fn test_blocked_command_never_executes() {
        let mut agent = agent(
            Task::RunCommand("rm -rf /".to_string()),
            AgentSettings::default(),
            never_asked(),
        );
        let err = agent.run().await.unwrap_err();
        assert!(matches!(err, AgentError::Blocked { .. }));

        let report = agent.finish();
        assert!(report.command_history().is_empty());
        assert_eq!(report.actions().len(), 1);
        assert_eq!(report.actions()[0].category, ActionCategory::CommandAttempted);
        assert!(report.actions()[0].detail.contains("Blocked"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permitted_command_recorded() {
        let mut agent = agent(
            Task::RunCommand("echo hello".to_string()),
            AgentSettings::default(),
            never_asked(),
        );
        agent.run().await.unwrap();
        let report = agent.finish();
        assert_eq!(report.command_history().len(), 1);
        let record = &report.command_history()[0];
        assert_eq!(record.attempt_count(), 1);
        assert!(record.succeeded());
        assert!(record.stdout().contains("hello"));
        assert_eq!(report.summary().successful_commands, 1);
    }

    #[tokio::test]
    async fn test_declined_confirmation_cancels() {
        let prompts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&prompts);
        let mut agent = agent(
            Task::RunCommand("echo danger-marker".to_string()),
            AgentSettings {
                allow_destructive: true,
                ..AgentSettings::default()
            },
            move |prompt: &str| {
                assert!(prompt.contains("test-marker"));
                counter.fetch_add(1, Ordering::SeqCst);
                false
            },
        );
        let err = agent.run().await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled { .. }));
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        assert!(agent.finish().command_history().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_confirmed_destructive_command_runs() {
        let mut agent = agent(
            Task::RunCommand("echo danger-marker".to_string()),
            AgentSettings {
                allow_destructive: true,
                ..AgentSettings::default()
            },
            |_: &str| true,
        );
        agent.run().await.unwrap();
        let report = agent.finish();
        assert_eq!(report.command_history().len(), 1);
        assert!(report.actions()[0].detail.contains("confirmed by operator"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_interactive_consent_is_recorded() {
        let mut agent = agent(
            Task::RunCommand("echo danger-marker".to_string()),
            AgentSettings {
                allow_destructive: true,
                non_interactive: true,
                install_tools: false,
            },
            never_asked(),
        );
        agent.run().await.unwrap();
        let report = agent.finish();
        assert_eq!(report.command_history().len(), 1);
        assert_eq!(report.actions().len(), 1);
        assert!(report.actions()[0].detail.contains("non-interactive"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permission_failure_suggests_escalation() {
        let mut agent = agent(
            Task::RunCommand("echo 'cat: /etc/shadow: Permission denied' 1>&2; exit 1".to_string()),
            AgentSettings::default(),
            never_asked(),
        );
        agent.run().await.unwrap();
        let report = agent.finish();
        assert_eq!(report.summary().failed_commands, 1);
        assert_eq!(report.actions().len(), 1);
        assert_eq!(report.actions()[0].category, ActionCategory::EscalationSuggested);
    }

    #[tokio::test]
    async fn test_log_scan_emits_findings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sshd[1]: Failed password for root from 203.0.113.7 port 22 ssh2").unwrap();

        let (tx, mut rx) = event::init_event_channel();
        let mut agent = agent(
            Task::ScanLogs(vec![file.path().to_path_buf()]),
            AgentSettings::default(),
            never_asked(),
        )
        .with_events(tx);
        agent.run().await.unwrap();
        let report = agent.finish();

        assert_eq!(report.findings().len(), 1);
        assert_eq!(report.findings()[0].severity, Severity::Medium);
        let mut saw_finding = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Finding { severity, .. } = event {
                assert_eq!(severity, Severity::Medium);
                saw_finding = true;
            }
        }
        assert!(saw_finding);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_prompt() {
        let mut agent = agent(
            Task::ScanWebsite("gopher://example.com".to_string()),
            AgentSettings::default(),
            never_asked(),
        );
        assert!(matches!(agent.run().await, Err(AgentError::InvalidUrl { .. })));
        let report = agent.finish();
        assert!(report.command_history().is_empty());
        assert!(report.actions().is_empty());
    }

    #[tokio::test]
    async fn test_website_scan_requires_authorization() {
        let mut agent = agent(
            Task::ScanWebsite("https://example.com".to_string()),
            AgentSettings::default(),
            |prompt: &str| {
                assert!(prompt.contains("authorized"));
                false
            },
        );
        assert!(matches!(agent.run().await, Err(AgentError::Cancelled { .. })));
        let report = agent.finish();
        assert!(report.command_history().is_empty());
        assert_eq!(report.actions().len(), 1);
    }

    /// An operator who never answers.
    struct SilentOperator;

    impl Confirm for SilentOperator {
        fn confirm<'a>(&'a mut self, _prompt: &'a str) -> ConfirmFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn test_pending_confirmation_can_be_interrupted() {
        let mut agent = agent(
            Task::RunCommand("echo danger-marker".to_string()),
            AgentSettings {
                allow_destructive: true,
                ..AgentSettings::default()
            },
            SilentOperator,
        );
        let waited = tokio::time::timeout(Duration::from_millis(200), agent.run()).await;
        assert!(waited.is_err());

        agent.interrupt();
        let report = agent.finish();
        assert!(report.command_history().is_empty());
        assert_eq!(report.actions().len(), 1);
        assert!(report.actions()[0].detail.contains("interrupted"));
    }

    #[tokio::test]
    async fn test_interrupt_recorded() {
        let mut agent = agent(Task::AuditSystem, AgentSettings::default(), never_asked());
        agent.interrupt();
        let report = agent.finish();
        assert!(report.actions()[0].detail.contains("interrupted"));
        assert_eq!(report.metadata().options.task, "audit-system");
    }

    #[test]
    fn test_invalid_config_fails_before_run() {
        let mut config = test_config();
        config.execution.timeout_secs = 0;
        let result = Agent::new(config, Task::AuditSystem, AgentSettings::default(), host(), Box::new(never_asked()));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
