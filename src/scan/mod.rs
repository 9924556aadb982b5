//! Finding model and the extractors that produce findings.
//!
//! Extractors never touch the report. Log and directory scans are pure
//! functions over the filesystem. Website and audit scans run their commands
//! through the execution engine and hand back both the command records and
//! the findings, which the orchestrator appends in order.

mod audit;
mod directory;
mod logs;
mod website;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shell::CommandRecord;

pub use audit::{AuditCheck, AuditPlan, AuditStep, SystemAuditor};
pub use directory::DirectoryScanner;
pub use logs::LogScanner;
pub use website::{WebsiteScanner, header_command, validate_target};

/// How bad a finding is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Every severity, most severe first.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Vulnerability,
    Suspicious,
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One security observation.
///
/// Built once through the chained setters and never changed afterwards.
/// `location` is the file path or URL the observation came from and is empty
/// only for audit-derived findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub evidence: String,
    pub location: String,
    pub suggested_fix: String,
    pub confidence: Confidence,
}

impl Finding {
    pub fn new(kind: FindingKind, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            description: String::new(),
            severity,
            evidence: String::new(),
            location: String::new(),
            suggested_fix: String::new(),
            confidence: Confidence::Medium,
        }
    }

    /// Shorthand for an informational, `info`-severity finding.
    pub fn informational(title: impl Into<String>) -> Self {
        Self::new(FindingKind::Informational, title, Severity::Info)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = fix.into();
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    /// Remediation text for console output.
    pub fn remediation(&self) -> &str {
        if self.suggested_fix.is_empty() {
            "Review manually"
        } else {
            &self.suggested_fix
        }
    }
}

/// Result of an extractor that runs commands.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<CommandRecord>,
    pub findings: Vec<Finding>,
}

/// Cut `text` to at most `max_chars` characters for use as evidence.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
