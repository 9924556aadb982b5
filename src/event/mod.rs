//! Console event stream.
//!
//! The engine and the orchestrator never print. They emit `AgentEvent`s on an
//! unbounded channel and the binary decides how to present them. Each output
//! line is tagged with its stream of origin before it enters the channel, so
//! stdout and stderr lines arrive whole and in emission order.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::report::Summary;
use crate::scan::Severity;
use crate::shell::ExitStatus;

/// The closed set of events a run can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Status narration (attempt started, retry scheduled, scan progress).
    Thinking(String),
    /// One line of a child's stdout.
    Stdout(String),
    /// One line of a child's stderr.
    Stderr(String),
    /// A command finished all of its attempts.
    Result {
        command: String,
        exit: ExitStatus,
        elapsed: Duration,
        attempts: u32,
    },
    /// A finding was appended to the report.
    Finding {
        severity: Severity,
        title: String,
        remediation: String,
    },
    /// The report was written.
    Report { path: PathBuf, summary: Summary },
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEvent::Thinking(message) => write!(f, "THINKING {message}"),
            AgentEvent::Stdout(line) => write!(f, "STDOUT {line}"),
            AgentEvent::Stderr(line) => write!(f, "STDERR {line}"),
            AgentEvent::Result {
                command,
                exit,
                elapsed,
                attempts,
            } => write!(
                f,
                "RESULT command={command:?} exit={exit} elapsed={:.1}s attempts={attempts}",
                elapsed.as_secs_f64()
            ),
            AgentEvent::Finding {
                severity,
                title,
                remediation,
            } => write!(
                f,
                "FINDING severity={severity} title={title:?} remediation={remediation:?}"
            ),
            AgentEvent::Report { path, summary } => write!(
                f,
                "REPORT path={} summary=commands:{} succeeded:{} failed:{} findings:{}",
                path.display(),
                summary.total_commands,
                summary.successful_commands,
                summary.failed_commands,
                summary.findings_count
            ),
        }
    }
}

pub type EventSink = UnboundedSender<AgentEvent>;

/// Creates the event channel.
///
/// Unbounded so that emitting never suspends the engine while a child is
/// producing output; the consumer is a plain printer.
pub fn init_event_channel() -> (EventSink, UnboundedReceiver<AgentEvent>) {
    mpsc::unbounded_channel()
}

/// Send an event if a sink is attached. A closed sink is not an error: the
/// report remains the record of truth.
pub fn emit(sink: Option<&EventSink>, event: AgentEvent) {
    if let Some(tx) = sink {
        if tx.send(event).is_err() {
            tracing::debug!("event sink closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_events_are_prefixed() {
        assert_eq!(AgentEvent::Stdout("hello".into()).to_string(), "STDOUT hello");
        assert_eq!(AgentEvent::Stderr("oops".into()).to_string(), "STDERR oops");
        assert_eq!(
            AgentEvent::Thinking("Scanning /var/log/auth.log".into()).to_string(),
            "THINKING Scanning /var/log/auth.log"
        );
    }

    #[test]
    fn test_result_event_format() {
        let event = AgentEvent::Result {
            command: "echo hi".into(),
            exit: ExitStatus::TimedOut,
            elapsed: Duration::from_millis(1500),
            attempts: 2,
        };
        assert_eq!(
            event.to_string(),
            "RESULT command=\"echo hi\" exit=timeout elapsed=1.5s attempts=2"
        );
    }

    #[test]
    fn test_finding_event_format() {
        let event = AgentEvent::Finding {
            severity: Severity::Medium,
            title: "Missing X-Frame-Options header".into(),
            remediation: "Add 'X-Frame-Options: DENY'".into(),
        };
        let text = event.to_string();
        assert!(text.starts_with("FINDING severity=medium"));
        assert!(text.contains("Missing X-Frame-Options header"));
    }

    #[test]
    fn test_emit_without_sink_or_with_closed_sink() {
        emit(None, AgentEvent::Thinking("nobody listens".into()));

        let (tx, rx) = init_event_channel();
        drop(rx);
        emit(Some(&tx), AgentEvent::Thinking("receiver gone".into()));
    }

    #[test]
    fn test_emit_delivers_in_order() {
        let (tx, mut rx) = init_event_channel();
        emit(Some(&tx), AgentEvent::Stdout("one".into()));
        emit(Some(&tx), AgentEvent::Stderr("two".into()));
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Stdout("one".into()));
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Stderr("two".into()));
    }
}
