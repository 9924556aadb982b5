//! Disk persistence for reports.
//!
//! One file per run, `report-YYYYMMDD-HHMMSS.json`, written through a temp
//! file and a rename so a crash never leaves a half-written report behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Local};
use tracing::info;

use super::{Report, Summary, serialize};

/// File name for a report generated at `timestamp`.
pub fn report_file_name(timestamp: &DateTime<Local>) -> String {
    format!("report-{}.json", timestamp.format("%Y%m%d-%H%M%S"))
}

/// First free path for a report generated at `timestamp` in `dir`.
fn unique_report_path(dir: &Path, timestamp: &DateTime<Local>) -> PathBuf {
    let base = report_file_name(timestamp);
    let mut candidate = dir.join(&base);
    let stem = base.trim_end_matches(".json");
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{n}.json"));
        n += 1;
    }
    candidate
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "Failed to replace {} with {}",
            path.display(),
            tmp.display()
        )
    })?;
    Ok(())
}

/// Write `report` into `dir`, creating it if needed. Returns the file path.
pub fn save(report: &Report, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
    let path = unique_report_path(dir, &report.metadata().timestamp);
    let data = serialize(report).context("Failed to serialize report")?;
    write_atomic(&path, data.as_bytes())?;
    info!(path = %path.display(), "report saved");
    Ok(path)
}

/// Read a report back. Command entries are validated while parsing and the
/// stored summary must agree with the contents.
pub fn load(path: &Path) -> anyhow::Result<Report> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report: Report =
        serde_json::from_str(&raw).with_context(|| format!("Invalid report JSON at {}", path.display()))?;
    let expected = Summary::compute(report.command_history(), report.findings());
    anyhow::ensure!(
        report.summary() == expected,
        "Summary in {} does not match its contents (stored {:?}, computed {:?})",
        path.display(),
        report.summary(),
        expected
    );
    Ok(report)
}
