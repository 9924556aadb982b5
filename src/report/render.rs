//! JSON document and human-readable summary of a finalized report.

use std::fmt;
use std::path::Path;

use super::Report;
use crate::scan::{Severity, excerpt};

const RULE_WIDTH: usize = 70;
const TOP_FINDINGS: usize = 5;
const FIX_PREVIEW_CHARS: usize = 80;

/// Pretty-printed JSON for `report`. Same report, same bytes.
pub fn serialize(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Console summary: totals, counts per severity, and the most severe findings.
pub fn render_summary(report: &Report, path: Option<&Path>) -> String {
    SummaryView { report, path }.to_string()
}

struct SummaryView<'a> {
    report: &'a Report,
    path: Option<&'a Path>,
}

impl fmt::Display for SummaryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        let summary = self.report.summary();
        let findings = self.report.findings();

        writeln!(f, "{rule}")?;
        match self.path {
            Some(path) => writeln!(f, "REPORT: saved to {}", path.display())?,
            None => writeln!(f, "REPORT")?,
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Summary:")?;
        writeln!(f, "  Total Commands: {}", summary.total_commands)?;
        writeln!(f, "  Successful: {}", summary.successful_commands)?;
        writeln!(f, "  Failed: {}", summary.failed_commands)?;
        writeln!(f, "  Findings: {}", summary.findings_count)?;

        if findings.is_empty() {
            return Ok(());
        }

        writeln!(f, "\nFindings by Severity:")?;
        for severity in Severity::DESCENDING {
            let count = findings.iter().filter(|x| x.severity == severity).count();
            if count > 0 {
                writeln!(f, "  {}: {count}", capitalize(severity.as_str()))?;
            }
        }

        writeln!(f, "\nTop Findings:")?;
        let top = self.report.findings_by_severity();
        for (rank, finding) in top.iter().take(TOP_FINDINGS).enumerate() {
            writeln!(f, "  {}. [{}] {}", rank + 1, finding.severity, finding.title)?;
            if !finding.suggested_fix.is_empty() {
                writeln!(f, "     Fix: {}", excerpt(&finding.suggested_fix, FIX_PREVIEW_CHARS))?;
            }
        }
        Ok(())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
