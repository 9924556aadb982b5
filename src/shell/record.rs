//! Execution requests, attempts and command records.
//!
//! A `CommandRecord` always holds at least one attempt, with attempt numbers
//! contiguous from 1. Only the engine can build or extend one; everything
//! else sees it by value or shared reference.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RequestError;

/// Synthetic exit code for a process that could not be started at all.
pub const SPAWN_FAILURE_EXIT: i32 = -1;

/// Exit status of one attempt: a numeric code or a timeout.
///
/// Serialized as the bare integer, or as the string `"timeout"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Code(i32),
    TimedOut,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            ExitStatus::TimedOut => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "{code}"),
            ExitStatus::TimedOut => write!(f, "timeout"),
        }
    }
}

impl Serialize for ExitStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExitStatus::Code(code) => serializer.serialize_i32(*code),
            ExitStatus::TimedOut => serializer.serialize_str("timeout"),
        }
    }
}

impl<'de> Deserialize<'de> for ExitStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Ok(ExitStatus::Code(code)),
            Raw::Text(text) if text == "timeout" => Ok(ExitStatus::TimedOut),
            Raw::Text(other) => Err(serde::de::Error::custom(format!(
                "expected an exit code or \"timeout\", got {other:?}"
            ))),
        }
    }
}

/// A request to run one shell command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    command: String,
    timeout: Duration,
    max_retries: u32,
    allow_destructive: bool,
    interactive_confirmation: bool,
}

impl ExecutionRequest {
    /// Build a request with no retries, destructive commands disallowed and
    /// interactive confirmation enabled.
    pub fn new(command: impl Into<String>, timeout: Duration) -> Result<Self, RequestError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(RequestError::EmptyCommand);
        }
        if timeout.is_zero() {
            return Err(RequestError::ZeroTimeout);
        }
        Ok(Self {
            command,
            timeout,
            max_retries: 0,
            allow_destructive: false,
            interactive_confirmation: true,
        })
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive_confirmation = interactive;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_destructive_allowed(&self) -> bool {
        self.allow_destructive
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive_confirmation
    }
}

/// One physical execution of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_number: u32,
    pub start_ts: DateTime<Local>,
    pub end_ts: DateTime<Local>,
    #[serde(rename = "elapsed_seconds", with = "seconds")]
    pub elapsed: Duration,
    #[serde(rename = "exit_code")]
    pub exit: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.exit.is_success()
    }
}

/// All attempts for one logical command request.
///
/// Serialized as one `command_history` entry whose top-level fields are those
/// of the final attempt, with every attempt (final included) under
/// `attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "HistoryEntry", try_from = "HistoryEntry")]
pub struct CommandRecord {
    id: String,
    command: String,
    earlier: Vec<Attempt>,
    last: Attempt,
}

impl CommandRecord {
    pub(crate) fn new(command: impl Into<String>, first: Attempt) -> Self {
        debug_assert_eq!(first.attempt_number, 1);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            earlier: Vec::new(),
            last: first,
        }
    }

    pub(crate) fn push(&mut self, attempt: Attempt) {
        debug_assert_eq!(attempt.attempt_number, self.attempt_count() + 1);
        let previous = std::mem::replace(&mut self.last, attempt);
        self.earlier.push(previous);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Attempts in execution order.
    pub fn attempts(&self) -> impl Iterator<Item = &Attempt> {
        self.earlier.iter().chain(std::iter::once(&self.last))
    }

    pub fn attempt_count(&self) -> u32 {
        self.last.attempt_number
    }

    pub fn final_attempt(&self) -> &Attempt {
        &self.last
    }

    pub fn final_status(&self) -> ExitStatus {
        self.last.exit
    }

    pub fn succeeded(&self) -> bool {
        self.last.succeeded()
    }

    pub fn stdout(&self) -> &str {
        &self.last.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.last.stderr
    }

    /// Wall-clock time across all attempts, backoff excluded.
    pub fn total_elapsed(&self) -> Duration {
        self.attempts().map(|a| a.elapsed).sum()
    }
}

/// Persisted shape of a `CommandRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryEntry {
    id: String,
    command: String,
    start_ts: DateTime<Local>,
    end_ts: DateTime<Local>,
    #[serde(with = "seconds")]
    elapsed_seconds: Duration,
    exit_code: ExitStatus,
    stdout: String,
    stderr: String,
    attempt_number: u32,
    attempts: Vec<Attempt>,
}

impl From<CommandRecord> for HistoryEntry {
    fn from(record: CommandRecord) -> Self {
        let last = record.last.clone();
        let mut attempts = record.earlier;
        attempts.push(record.last);
        Self {
            id: record.id,
            command: record.command,
            start_ts: last.start_ts,
            end_ts: last.end_ts,
            elapsed_seconds: last.elapsed,
            exit_code: last.exit,
            stdout: last.stdout,
            stderr: last.stderr,
            attempt_number: last.attempt_number,
            attempts,
        }
    }
}

impl TryFrom<HistoryEntry> for CommandRecord {
    type Error = String;

    fn try_from(entry: HistoryEntry) -> Result<Self, Self::Error> {
        for (index, attempt) in entry.attempts.iter().enumerate() {
            let expected = u32::try_from(index + 1).map_err(|e| e.to_string())?;
            if attempt.attempt_number != expected {
                return Err(format!(
                    "command {}: attempt numbers are not contiguous (found {} at position {})",
                    entry.id, attempt.attempt_number, expected
                ));
            }
        }
        let mut attempts = entry.attempts;
        let last = attempts
            .pop()
            .ok_or_else(|| format!("command {} has no attempts", entry.id))?;
        if last.attempt_number != entry.attempt_number || last.exit != entry.exit_code {
            return Err(format!(
                "command {}: top-level fields disagree with its final attempt",
                entry.id
            ));
        }
        Ok(Self {
            id: entry.id,
            command: entry.command,
            earlier: attempts,
            last,
        })
    }
}

/// `Duration` as fractional seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
