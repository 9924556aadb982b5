//! Recursive directory scan for dropped scripts and disguised executables.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{Confidence, Finding, FindingKind, Severity};

/// File-name rules in priority order: (rule, pattern, severity, confidence, fix).
/// The first matching rule wins.
const FILE_RULES: &[(&str, &str, Severity, Confidence, &str)] = &[
    (
        "double extension",
        r"\.(pdf|docx?|xlsx?|pptx?|txt|rtf|jpe?g|png|gif|zip|mp3|mp4)\.(exe|scr|bat|cmd|com|vbs|js|ps1|sh)$",
        Severity::High,
        Confidence::High,
        "Quarantine the file; a document extension followed by an executable one is a common lure",
    ),
    (
        "hidden script",
        r"^\..+\.(sh|bash|py|pl|rb|ps1|bat|vbs|exe)$",
        Severity::Medium,
        Confidence::Medium,
        "Identify who created the hidden script and what runs it",
    ),
    (
        "script or executable",
        r"\.(exe|sh|bat|ps1|vbs|scr)$",
        Severity::Low,
        Confidence::Low,
        "Review file contents and purpose",
    ),
];

struct FileRule {
    name: &'static str,
    regex: Regex,
    severity: Severity,
    confidence: Confidence,
    suggested_fix: &'static str,
}

/// Flags files whose names match the rule table.
pub struct DirectoryScanner {
    rules: Vec<FileRule>,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryScanner {
    pub fn new() -> Self {
        let rules = FILE_RULES
            .iter()
            .filter_map(|(name, pattern, severity, confidence, fix)| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(FileRule {
                        name,
                        regex,
                        severity: *severity,
                        confidence: *confidence,
                        suggested_fix: fix,
                    }),
                    Err(e) => {
                        warn!(rule = name, error = %e, "file rule failed to compile");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// Walk `root` (symlinks not followed) and return one finding per
    /// flagged file, located by absolute path.
    pub fn scan(&self, root: &Path) -> Vec<Finding> {
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        if !root.exists() {
            return vec![
                Finding::informational(format!("Directory not found: {}", root.display()))
                    .description("The scan target does not exist and was skipped")
                    .location(root.display().to_string())
                    .confidence(Confidence::High),
            ];
        }

        let mut findings = Vec::new();
        let mut scanned = 0usize;
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let location = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    warn!(path = %location.display(), error = %e, "directory entry not accessible");
                    findings.push(
                        Finding::informational(format!("Path not accessible: {}", location.display()))
                            .description("Part of the tree could not be read and was skipped")
                            .evidence(e.to_string())
                            .location(location.display().to_string()),
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            scanned += 1;
            if let Some(finding) = self.classify(entry.path()) {
                findings.push(finding);
            }
        }
        debug!(root = %root.display(), scanned, flagged = findings.len(), "directory scan complete");
        findings
    }

    /// Apply the rule table to one file path.
    pub fn classify(&self, path: &Path) -> Option<Finding> {
        let name = path.file_name()?.to_string_lossy();
        let rule = self.rules.iter().find(|rule| rule.regex.is_match(&name))?;
        Some(
            Finding::new(
                FindingKind::Suspicious,
                format!("Suspicious file detected: {name}"),
                rule.severity,
            )
            .description(format!("File name matches the {} rule", rule.name))
            .location(path.display().to_string())
            .suggested_fix(rule.suggested_fix)
            .confidence(rule.confidence),
        )
    }
}
