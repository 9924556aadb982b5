//! Destructive command pattern table.
//!
//! Each entry is plain data: a name, a case-insensitive regex over the raw
//! command line, and a human description. Adding a rule means adding a row
//! here (or an `extra_patterns` entry in the config file); no logic changes.

use regex::{Regex, RegexBuilder};

use crate::config::PatternConfig;
use crate::error::ConfigError;

/// Built-in rules as (name, pattern, description).
const DEFAULT_PATTERNS: &[(&str, &str, &str)] = &[
    (
        "recursive-root-delete",
        r"\brm\s+(?:-\S+\s+)*-[a-z]*(?:r[a-z]*f|f[a-z]*r)[a-z]*\s+(?:-\S+\s+)*/",
        "recursive forced deletion of an absolute path",
    ),
    (
        "filesystem-create",
        r"\bmkfs(?:\.\w+)?\b",
        "filesystem creation wipes the target device",
    ),
    (
        "disk-dump",
        r"\bdd\s+if=",
        "raw block copy with dd can overwrite devices",
    ),
    (
        "raw-device-write",
        r">\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk)",
        "redirecting output onto a raw block device",
    ),
    (
        "format-volume",
        r"\bformat\s+[a-z]:",
        "formatting a Windows volume",
    ),
    (
        "partition-write",
        r"\bfdisk\b.*w",
        "writing a partition table with fdisk",
    ),
    (
        "partition-create",
        r"\bparted\b.*\bmkpart\b",
        "creating partitions with parted",
    ),
    ("shutdown", r"\bshutdown\b", "shuts the host down"),
    ("reboot", r"\breboot\b", "reboots the host"),
    ("halt", r"\b(?:halt|poweroff)\b", "halts or powers off the host"),
    ("runlevel-change", r"\binit\s+[06]\b", "switches to runlevel 0 or 6"),
    (
        "systemctl-power",
        r"\bsystemctl\s+(?:halt|poweroff|reboot)\b",
        "power state change through systemctl",
    ),
    (
        "windows-recursive-delete",
        r"\bdel\s+/f\s+/s\s+/q\b",
        "forced recursive deletion on Windows",
    ),
    ("diskpart", r"\bdiskpart\b", "Windows disk partitioning tool"),
    (
        "fork-bomb",
        r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        "fork bomb exhausts the process table",
    ),
    (
        "recursive-root-chmod",
        r"\bchmod\s+-R\s+[0-7]{3,4}\s+/(?:\s|$)",
        "recursive permission reset from the filesystem root",
    ),
];

/// An immutable rule identifying command text as potentially destructive.
#[derive(Debug, Clone)]
pub struct DangerPattern {
    name: String,
    matcher: Regex,
    description: String,
}

impl DangerPattern {
    /// Compile a rule. Matching is always case-insensitive.
    pub fn new(name: &str, pattern: &str, description: &str) -> Result<Self, ConfigError> {
        let matcher = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::Pattern {
                name: name.to_string(),
                source,
            })?;
        Ok(Self {
            name: name.to_string(),
            matcher,
            description: description.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_match(&self, command: &str) -> bool {
        self.matcher.is_match(command)
    }
}

/// The full rule table, loaded once at start-up and never mutated.
#[derive(Debug, Clone)]
pub struct DangerPatternSet {
    patterns: Vec<DangerPattern>,
}

impl DangerPatternSet {
    /// The built-in table.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::with_extra(&[])
    }

    /// The built-in table followed by caller-supplied rules.
    pub fn with_extra(extra: &[PatternConfig]) -> Result<Self, ConfigError> {
        let mut patterns = Vec::with_capacity(DEFAULT_PATTERNS.len() + extra.len());
        for (name, pattern, description) in DEFAULT_PATTERNS {
            patterns.push(DangerPattern::new(name, pattern, description)?);
        }
        for rule in extra {
            patterns.push(DangerPattern::new(&rule.name, &rule.pattern, &rule.description)?);
        }
        Ok(Self { patterns })
    }

    /// First rule matching the literal command line, if any.
    pub fn find_match(&self, command: &str) -> Option<&DangerPattern> {
        self.patterns.iter().find(|p| p.is_match(command))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
