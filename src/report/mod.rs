//! Report aggregation.
//!
//! A `ReportBuilder` is owned by the orchestrator and appended to between
//! engine calls. `finalize` stamps the generation time, computes the summary
//! and returns a `Report` that exposes no way to change it.

mod persistence;
mod render;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::platform::OsContext;
use crate::scan::Finding;
use crate::shell::CommandRecord;

pub use persistence::{load, report_file_name, save};
pub use render::{render_summary, serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionCategory {
    ToolInstalled,
    CommandAttempted,
    EscalationSuggested,
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionCategory::ToolInstalled => "tool-installed",
            ActionCategory::CommandAttempted => "command-attempted",
            ActionCategory::EscalationSuggested => "escalation-suggested",
        };
        f.write_str(name)
    }
}

/// A side effect or decision that is not itself a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub category: ActionCategory,
    pub detail: String,
}

impl Action {
    pub fn new(category: ActionCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
        }
    }
}

/// Effective options of the run, as recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub task: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub allow_destructive: bool,
    pub non_interactive: bool,
    pub install_tools: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub agent_version: String,
    pub user: String,
    pub started_at: DateTime<Local>,
    /// Generation time, set by `finalize`.
    pub timestamp: DateTime<Local>,
    pub cwd: PathBuf,
    pub os: OsContext,
    pub options: RunOptions,
}

impl Metadata {
    /// Metadata for a run starting now, filled from the process environment.
    pub fn capture(os: OsContext, options: RunOptions) -> Self {
        let now = Local::now();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            agent_version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            user,
            started_at: now,
            timestamp: now,
            cwd,
            os,
            options,
        }
    }
}

/// Counters derived from the command history and findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_commands: usize,
    pub successful_commands: usize,
    pub failed_commands: usize,
    pub findings_count: usize,
}

impl Summary {
    pub fn compute(commands: &[CommandRecord], findings: &[Finding]) -> Self {
        let successful_commands = commands.iter().filter(|r| r.succeeded()).count();
        Self {
            total_commands: commands.len(),
            successful_commands,
            failed_commands: commands.len() - successful_commands,
            findings_count: findings.len(),
        }
    }
}

/// Accumulates one run's records, findings and actions.
#[derive(Debug)]
pub struct ReportBuilder {
    metadata: Metadata,
    commands: Vec<CommandRecord>,
    findings: Vec<Finding>,
    actions: Vec<Action>,
}

impl ReportBuilder {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            commands: Vec::new(),
            findings: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn add_command(&mut self, record: CommandRecord) {
        self.commands.push(record);
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn finalize(self) -> Report {
        let mut metadata = self.metadata;
        metadata.timestamp = Local::now();
        let summary = Summary::compute(&self.commands, &self.findings);
        Report {
            metadata,
            command_history: self.commands,
            findings: self.findings,
            actions: self.actions,
            summary,
        }
    }
}

/// A finalized report. Field order is the document's key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    metadata: Metadata,
    command_history: Vec<CommandRecord>,
    findings: Vec<Finding>,
    actions: Vec<Action>,
    summary: Summary,
}

impl Report {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn command_history(&self) -> &[CommandRecord] {
        &self.command_history
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Findings ordered most severe first; ties keep insertion order.
    pub fn findings_by_severity(&self) -> Vec<&Finding> {
        let mut sorted: Vec<&Finding> = self.findings.iter().collect();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        sorted
    }
}
