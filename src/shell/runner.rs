//! Command execution with streamed output, timeouts and bounded retries.
//!
//! Each attempt spawns the command under the configured shell in its own
//! process group, drains stdout and stderr on two tasks, and waits for the
//! child under a deadline. On expiry, or when the attempt is dropped
//! mid-flight, the whole group is killed.

use std::process::Stdio;
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::record::{Attempt, CommandRecord, ExecutionRequest, ExitStatus, SPAWN_FAILURE_EXIT};
use crate::event::{self, AgentEvent, EventSink};

// Lines buffered between the drain tasks and the engine loop
const LINE_BUFFER: usize = 256;
// How long to collect trailing output after a kill before giving up on it
const KILL_GRACE: Duration = Duration::from_millis(250);
// How long to keep reading pipes after the shell exits. Background jobs may
// hold them open indefinitely.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Interpreter used to run command text, e.g. `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    program: String,
    args: Vec<String>,
}

impl ShellSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `cmd /C` on Windows, `sh -c` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new("cmd", vec!["/C".to_string()])
        } else {
            Self::new("sh", vec!["-c".to_string()])
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Quote `arg` as one word for the platform shell.
pub fn quote_arg(arg: &str) -> String {
    if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\"\""))
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to wait after attempt number `attempt` (1-based) fails.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub shell: ShellSpec,
    pub retry: RetryPolicy,
    /// Max bytes kept per stream per attempt.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: ShellSpec::platform_default(),
            retry: RetryPolicy::default(),
            max_output_bytes: 500_000,
        }
    }
}

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// How an attempt ended, beyond its exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptEnd {
    Finished,
    /// The process never started; retrying cannot help.
    SpawnFailed,
}

/// Runs `ExecutionRequest`s. Holds no per-run state, so one runner can be
/// shared by every producer in a run.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    config: RunnerConfig,
    events: Option<EventSink>,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Stream output lines and status narration to `sink` as they happen.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn emit(&self, event: AgentEvent) {
        event::emit(self.events.as_ref(), event);
    }

    /// Run `request` until an attempt exits 0 or attempts are exhausted.
    ///
    /// Never fails: timeouts, non-zero exits and spawn failures all end up
    /// as attempts in the returned record.
    pub async fn run(&self, request: &ExecutionRequest) -> CommandRecord {
        let max_attempts = request.max_attempts();
        let (first, mut end) = self.run_attempt(request, 1).await;
        let mut record = CommandRecord::new(request.command(), first);

        while !record.succeeded()
            && end == AttemptEnd::Finished
            && record.attempt_count() < max_attempts
        {
            let delay = self.config.retry.delay_after(record.attempt_count());
            let reason = match record.final_status() {
                ExitStatus::TimedOut => "Command timed out".to_string(),
                ExitStatus::Code(code) => format!("Command failed with exit code {code}"),
            };
            self.emit(AgentEvent::Thinking(format!(
                "{reason}. Retrying in {:.1}s...",
                delay.as_secs_f64()
            )));
            tokio::time::sleep(delay).await;

            let (next, next_end) = self.run_attempt(request, record.attempt_count() + 1).await;
            record.push(next);
            end = next_end;
        }

        info!(
            command = %request.command(),
            exit = %record.final_status(),
            attempts = record.attempt_count(),
            "command finished"
        );
        self.emit(AgentEvent::Result {
            command: request.command().to_string(),
            exit: record.final_status(),
            elapsed: record.final_attempt().elapsed,
            attempts: record.attempt_count(),
        });
        record
    }

    async fn run_attempt(&self, request: &ExecutionRequest, number: u32) -> (Attempt, AttemptEnd) {
        let command = request.command();
        self.emit(AgentEvent::Thinking(format!(
            "Attempt {number} running `{command}` (timeout={}s)",
            request.timeout().as_secs_f64()
        )));

        let start_ts = Local::now();
        let started = Instant::now();

        let mut cmd = Command::new(self.config.shell.program());
        cmd.args(self.config.shell.args())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take down the whole tree
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "failed to spawn command");
                let attempt = Attempt {
                    attempt_number: number,
                    start_ts,
                    end_ts: Local::now(),
                    elapsed: started.elapsed(),
                    exit: ExitStatus::Code(SPAWN_FAILURE_EXIT),
                    stdout: String::new(),
                    stderr: format!("failed to start {}: {e}", self.config.shell.program()),
                };
                return (attempt, AttemptEnd::SpawnFailed);
            }
        };
        // Declared after `child` so it drops first when the future is cancelled
        let mut tree_guard = TreeGuard { pid: child.id() };

        let (line_tx, mut line_rx) = mpsc::channel::<(Stream, String)>(LINE_BUFFER);
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_lines(stdout, Stream::Stdout, line_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_lines(stderr, Stream::Stderr, line_tx.clone())));
        }
        drop(line_tx);

        let mut stdout = BoundedText::new(self.config.max_output_bytes);
        let mut stderr = BoundedText::new(self.config.max_output_bytes);
        let deadline = started + request.timeout();
        let mut window_end = deadline;
        let mut exit: Option<std::io::Result<std::process::ExitStatus>> = None;
        let mut streams_open = true;

        loop {
            if exit.is_some() && !streams_open {
                break;
            }
            tokio::select! {
                line = line_rx.recv(), if streams_open => match line {
                    Some((stream, text)) => self.observe(stream, text, &mut stdout, &mut stderr),
                    None => streams_open = false,
                },
                status = child.wait(), if exit.is_none() => {
                    exit = Some(status);
                    window_end = window_end.min(Instant::now() + EXIT_DRAIN_GRACE);
                }
                () = tokio::time::sleep_until(window_end) => break,
            }
        }

        let timed_out = exit.is_none();
        if timed_out {
            kill_process_tree(&mut child).await;
        } else if streams_open {
            debug!(command, "shell exited but a background process still holds its output; not waiting for it");
        }
        tree_guard.disarm();
        let elapsed = started.elapsed();
        let end_ts = Local::now();

        if timed_out && streams_open {
            let collected = timeout(KILL_GRACE, async {
                while let Some((stream, text)) = line_rx.recv().await {
                    self.observe(stream, text, &mut stdout, &mut stderr);
                }
            })
            .await;
            if collected.is_err() {
                debug!(command, "output after kill not fully collected");
            }
        }
        for task in drains {
            task.abort();
        }

        let status = match exit {
            Some(Ok(status)) => ExitStatus::Code(exit_code(status)),
            Some(Err(e)) => {
                stderr.push_line(&format!("failed to wait for process: {e}"));
                ExitStatus::Code(SPAWN_FAILURE_EXIT)
            }
            None => {
                if timeout(KILL_GRACE, child.wait()).await.is_err() {
                    warn!(command, "process did not exit after kill");
                }
                ExitStatus::TimedOut
            }
        };
        debug!(command, attempt = number, exit = %status, ?elapsed, "attempt finished");

        let attempt = Attempt {
            attempt_number: number,
            start_ts,
            end_ts,
            elapsed,
            exit: status,
            stdout: stdout.finish(),
            stderr: stderr.finish(),
        };
        (attempt, AttemptEnd::Finished)
    }

    fn observe(&self, stream: Stream, text: String, stdout: &mut BoundedText, stderr: &mut BoundedText) {
        match stream {
            Stream::Stdout => {
                stdout.push_line(&text);
                self.emit(AgentEvent::Stdout(text));
            }
            Stream::Stderr => {
                stderr.push_line(&text);
                self.emit(AgentEvent::Stderr(text));
            }
        }
    }
}

/// Forward complete lines from one child stream, tagged with their origin.
async fn drain_lines<R: AsyncRead + Unpin>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?stream, error = %e, "stream read failed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(SPAWN_FAILURE_EXIT)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(SPAWN_FAILURE_EXIT)
}

#[cfg(unix)]
fn tree_kill_command(pid: u32) -> Option<std::process::Command> {
    let mut cmd = std::process::Command::new("kill");
    cmd.arg("-KILL").arg("--").arg(format!("-{pid}"));
    Some(cmd)
}

#[cfg(windows)]
fn tree_kill_command(pid: u32) -> Option<std::process::Command> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T", "/F"]);
    Some(cmd)
}

#[cfg(not(any(unix, windows)))]
fn tree_kill_command(_pid: u32) -> Option<std::process::Command> {
    None
}

/// Kills the attempt's process tree if the attempt is dropped before it
/// finished, e.g. when the run is interrupted. `kill_on_drop` alone only
/// reaches the shell, not its descendants.
struct TreeGuard {
    pid: Option<u32>,
}

impl TreeGuard {
    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for TreeGuard {
    fn drop(&mut self) {
        let Some(mut cmd) = self.pid.take().and_then(tree_kill_command) else {
            return;
        };
        let result = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match result {
            Ok(_) => debug!("killed process tree of cancelled attempt"),
            Err(e) => warn!(error = %e, "failed to kill process tree of cancelled attempt"),
        }
    }
}

/// Kill the child's process group (or tree on Windows), then the child itself.
async fn kill_process_tree(child: &mut Child) {
    if let Some(cmd) = child.id().and_then(tree_kill_command) {
        let result = Command::from(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "process tree kill failed, falling back to direct kill");
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "direct kill failed (process likely gone)");
    }
}

/// Captured text bounded to `limit` bytes. Overflow is counted, not kept.
#[derive(Debug)]
struct BoundedText {
    text: String,
    limit: usize,
    total: usize,
    /// Set at the first cut; nothing is appended after it.
    full: bool,
}

impl BoundedText {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            total: 0,
            full: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.total += line.len() + 1;
        if self.full {
            return;
        }
        let remaining = self.limit.saturating_sub(self.text.len());
        if line.len() < remaining {
            self.text.push_str(line);
            self.text.push('\n');
        } else {
            self.text.push_str(utf8_prefix(line, remaining));
            self.full = true;
        }
    }

    fn finish(mut self) -> String {
        if self.total > self.text.len() {
            self.text
                .push_str(&format!("\n... (truncated, {} bytes total)", self.total));
        }
        self.text
    }
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
fn utf8_prefix(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = 0usize;
    for (idx, _) in s.char_indices() {
        if idx > max_bytes {
            break;
        }
        cut = idx;
    }
    &s[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_runner() -> CommandRunner {
        CommandRunner::new(RunnerConfig {
            retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5)),
            ..RunnerConfig::default()
        })
    }

    fn request(command: &str, timeout_ms: u64) -> ExecutionRequest {
        ExecutionRequest::new(command, Duration::from_millis(timeout_ms)).unwrap()
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_never_decreases() {
        let policy = RetryPolicy::new(Duration::from_millis(7), Duration::from_secs(3));
        let delays: Vec<Duration> = (1..64).map(|n| policy.delay_after(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_bounded_text_truncates_on_char_boundary() {
        let mut text = BoundedText::new(8);
        text.push_line("héllo");
        text.push_line("wörld");
        let out = text.finish();
        assert!(out.starts_with("héllo\n"));
        assert!(out.contains("(truncated, 14 bytes total)"));
    }

    #[test]
    fn test_bounded_text_stops_after_partial_cut() {
        let mut text = BoundedText::new(5);
        text.push_line("abcdé");
        text.push_line("x");
        text.push_line("");
        assert_eq!(text.finish(), "abcd\n... (truncated, 10 bytes total)");
    }

    #[test]
    fn test_bounded_text_keeps_small_output_verbatim() {
        let mut text = BoundedText::new(100);
        text.push_line("a");
        text.push_line("b");
        assert_eq!(text.finish(), "a\nb\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_quote_arg_escapes_single_quotes() {
        assert_eq!(quote_arg("https://example.com/"), "'https://example.com/'");
        assert_eq!(quote_arg("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_utf8_prefix() {
        assert_eq!(utf8_prefix("abc", 10), "abc");
        assert_eq!(utf8_prefix("aé", 2), "a");
        assert_eq!(utf8_prefix("abcdef", 3), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_hello_single_attempt() {
        let record = fast_runner().run(&request("echo hello", 5000)).await;
        assert_eq!(record.attempt_count(), 1);
        assert_eq!(record.final_status(), ExitStatus::Code(0));
        assert!(record.succeeded());
        assert!(record.stdout().contains("hello"));
        assert_eq!(record.stderr(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_always_failing_command_uses_every_attempt() {
        let req = request("exit 3", 5000).with_retries(2);
        let record = fast_runner().run(&req).await;
        assert_eq!(record.attempt_count(), 3);
        let numbers: Vec<u32> = record.attempts().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(record.attempts().all(|a| a.exit == ExitStatus::Code(3)));
        assert!(!record.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retry_stops_on_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-once");
        let cmd = format!(
            "if [ -f '{0}' ]; then echo recovered; else touch '{0}'; exit 1; fi",
            marker.display()
        );
        let record = fast_runner().run(&request(&cmd, 5000).with_retries(4)).await;
        assert_eq!(record.attempt_count(), 2);
        assert!(record.succeeded());
        assert!(record.stdout().contains("recovered"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_marks_attempt_and_kills_child() {
        let started = std::time::Instant::now();
        let record = fast_runner().run(&request("sleep 5", 300)).await;
        assert_eq!(record.attempt_count(), 1);
        assert_eq!(record.final_status(), ExitStatus::TimedOut);
        assert!(record.final_attempt().elapsed < Duration::from_millis(1300));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let record = fast_runner()
            .run(&request("echo before; sleep 5; echo after", 400))
            .await;
        assert_eq!(record.final_status(), ExitStatus::TimedOut);
        assert!(record.stdout().contains("before"));
        assert!(!record.stdout().contains("after"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_attempts_are_retried() {
        let record = fast_runner().run(&request("sleep 5", 200).with_retries(1)).await;
        assert_eq!(record.attempt_count(), 2);
        assert!(record.attempts().all(|a| a.exit == ExitStatus::TimedOut));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure_is_a_terminal_attempt() {
        let runner = CommandRunner::new(RunnerConfig {
            shell: ShellSpec::new("/nonexistent/interpreter", vec!["-c".to_string()]),
            retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1)),
            max_output_bytes: 1024,
        });
        let record = runner.run(&request("echo hi", 1000).with_retries(3)).await;
        assert_eq!(record.attempt_count(), 1);
        assert_eq!(record.final_status(), ExitStatus::Code(SPAWN_FAILURE_EXIT));
        assert!(record.stderr().contains("failed to start /nonexistent/interpreter"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_are_captured_separately() {
        let record = fast_runner()
            .run(&request("echo out; echo err 1>&2; exit 2", 5000))
            .await;
        assert_eq!(record.stdout(), "out\n");
        assert_eq!(record.stderr(), "err\n");
        assert_eq!(record.final_status(), ExitStatus::Code(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_heavy_output_on_both_streams_does_not_deadlock() {
        let cmd = "i=0; while [ $i -lt 20000 ]; do echo out$i; echo err$i 1>&2; i=$((i+1)); done";
        let record = fast_runner().run(&request(cmd, 30_000)).await;
        assert!(record.succeeded());
        assert_eq!(record.stdout().lines().count(), 20000);
        assert_eq!(record.stderr().lines().count(), 20000);
        assert!(record.stdout().lines().last().unwrap().ends_with("out19999"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_bounded() {
        let runner = CommandRunner::new(RunnerConfig {
            max_output_bytes: 64,
            ..RunnerConfig::default()
        });
        let record = runner
            .run(&request("i=0; while [ $i -lt 500 ]; do echo line$i; i=$((i+1)); done", 10_000))
            .await;
        assert!(record.succeeded());
        assert!(record.stdout().contains("truncated"));
        assert!(record.stdout().len() < 64 + 64);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_events_stream_lines_then_result() {
        let (tx, mut rx) = crate::event::init_event_channel();
        let runner = fast_runner().with_events(tx);
        let record = runner.run(&request("echo one; echo two 1>&2", 5000)).await;
        drop(runner);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(AgentEvent::Thinking(_))));
        assert!(events.contains(&AgentEvent::Stdout("one".to_string())));
        assert!(events.contains(&AgentEvent::Stderr("two".to_string())));
        match events.last() {
            Some(AgentEvent::Result { command, exit, attempts, .. }) => {
                assert_eq!(command, "echo one; echo two 1>&2");
                assert_eq!(*exit, record.final_status());
                assert_eq!(*attempts, 1);
            }
            other => panic!("Expected Result event last, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lines_stream_before_command_finishes() {
        let (tx, mut rx) = crate::event::init_event_channel();
        let runner = fast_runner().with_events(tx);
        let handle = tokio::spawn(async move { runner.run(&request("echo first; sleep 2", 10_000)).await });

        let seen = timeout(Duration::from_millis(1500), async {
            while let Some(event) = rx.recv().await {
                if event == AgentEvent::Stdout("first".to_string()) {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(seen, Ok(true)));
        assert!(!handle.is_finished());

        let record = handle.await.unwrap();
        assert!(record.succeeded());
        assert_eq!(record.stdout(), "first\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_job_holding_stdout_does_not_stall_attempt() {
        let command = "sleep 30.17 & echo started";
        let record = fast_runner().run(&request(command, 10_000)).await;
        let survived = process_running("sleep 30.17");
        kill_matching("sleep 30.17");

        assert_eq!(record.final_status(), ExitStatus::Code(0));
        assert!(record.stdout().contains("started"));
        assert!(record.final_attempt().elapsed < Duration::from_secs(3));
        // The operator's background job is left alone
        assert!(survived);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_kills_process_group() {
        let runner = fast_runner();
        let req = request("sleep 41.73; echo done", 60_000);
        let cancelled = timeout(Duration::from_millis(500), runner.run(&req)).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let alive = process_running("sleep 41.73");
        if alive {
            kill_matching("sleep 41.73");
        }
        assert!(!alive, "grandchild survived cancellation");
    }

    #[cfg(unix)]
    fn process_running(cmdline: &str) -> bool {
        std::process::Command::new("pgrep")
            .args(["-f", "-x", cmdline])
            .stdout(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn kill_matching(cmdline: &str) {
        if let Err(e) = std::process::Command::new("pkill").args(["-f", "-x", cmdline]).status() {
            eprintln!("cleanup of '{cmdline}' failed: {e}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retry_narration_is_emitted() {
        let (tx, mut rx) = crate::event::init_event_channel();
        let runner = fast_runner().with_events(tx);
        runner.run(&request("exit 1", 5000).with_retries(1)).await;
        drop(runner);

        let mut saw_retry = false;
        while let Some(event) = rx.recv().await {
            if let AgentEvent::Thinking(msg) = event {
                saw_retry |= msg.contains("Retrying");
            }
        }
        assert!(saw_retry);
    }
}
