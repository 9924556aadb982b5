//! Read-only system audit.
//!
//! The commands for each check come from an `AuditPlan`, a table keyed by OS
//! family. The auditor's control flow is the same on every platform: for
//! each step, try its commands in order until one succeeds, then interpret
//! the output.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::{Confidence, Finding, FindingKind, ScanOutcome, Severity, excerpt};
use crate::platform::OsFamily;
use crate::shell::{CommandRecord, CommandRunner, ExecutionRequest};

const EVIDENCE_CHARS: usize = 500;

/// Ports commonly bound by backdoors and IRC botnets.
const BACKDOOR_PORTS: &[u16] = &[4444, 1337, 31337, 6667, 12345];
const TELNET_PORT: u16 = 23;

// Local address column of ss/netstat output: ":22 ", ".631 ", "]:8080 "
static LOCAL_PORT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[:.](\d{1,5})\s").ok());

/// TCP states of connected or closing sockets. Lines in these states are
/// connections, not listeners. Listening and stateless (UDP) lines pass.
const CONNECTION_STATES: &[&str] = &[
    "ESTABLISHED",
    "ESTAB",
    "SYN_SENT",
    "SYN-SENT",
    "SYN_RECV",
    "SYN-RECV",
    "SYN_RECEIVED",
    "FIN_WAIT1",
    "FIN_WAIT_1",
    "FIN-WAIT-1",
    "FIN_WAIT2",
    "FIN_WAIT_2",
    "FIN-WAIT-2",
    "TIME_WAIT",
    "TIME-WAIT",
    "CLOSE_WAIT",
    "CLOSE-WAIT",
    "LAST_ACK",
    "LAST-ACK",
    "CLOSING",
    "CLOSED",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCheck {
    StartupEntries,
    ScheduledTasks,
    ListeningPorts,
    LocalAccounts,
}

impl fmt::Display for AuditCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditCheck::StartupEntries => "startup entries",
            AuditCheck::ScheduledTasks => "scheduled tasks",
            AuditCheck::ListeningPorts => "listening ports",
            AuditCheck::LocalAccounts => "local accounts",
        };
        f.write_str(name)
    }
}

/// One check and its alternative commands, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditStep {
    pub check: AuditCheck,
    pub commands: Vec<String>,
}

impl AuditStep {
    pub fn new(check: AuditCheck, commands: &[&str]) -> Self {
        Self {
            check,
            commands: commands.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuditPlan {
    steps: Vec<AuditStep>,
}

impl AuditPlan {
    pub fn new(steps: Vec<AuditStep>) -> Self {
        Self { steps }
    }

    /// The built-in plan for `family`. Empty for unknown platforms.
    pub fn for_family(family: OsFamily) -> Self {
        use AuditCheck::*;
        let steps = match family {
            OsFamily::Linux => vec![
                AuditStep::new(
                    StartupEntries,
                    &[
                        "systemctl list-unit-files --type=service --state=enabled --no-pager",
                        "ls -1 /etc/init.d",
                    ],
                ),
                AuditStep::new(ScheduledTasks, &["crontab -l", "ls -1 /etc/cron.d"]),
                AuditStep::new(ListeningPorts, &["ss -tuln", "netstat -tuln"]),
                AuditStep::new(LocalAccounts, &["cat /etc/passwd"]),
            ],
            OsFamily::Macos => vec![
                AuditStep::new(StartupEntries, &["launchctl list"]),
                AuditStep::new(ScheduledTasks, &["crontab -l"]),
                AuditStep::new(
                    ListeningPorts,
                    &["netstat -an | grep LISTEN", "lsof -nP -iTCP -sTCP:LISTEN"],
                ),
                AuditStep::new(LocalAccounts, &["cat /etc/passwd"]),
            ],
            OsFamily::Windows => vec![
                AuditStep::new(StartupEntries, &["wmic startup get caption,command"]),
                AuditStep::new(ScheduledTasks, &["schtasks /query /fo LIST"]),
                AuditStep::new(ListeningPorts, &["netstat -ano"]),
                AuditStep::new(LocalAccounts, &["net user"]),
            ],
            OsFamily::Other => Vec::new(),
        };
        Self { steps }
    }

    pub fn steps(&self) -> &[AuditStep] {
        &self.steps
    }
}

pub struct SystemAuditor {
    plan: AuditPlan,
    timeout: Duration,
}

impl SystemAuditor {
    pub fn new(plan: AuditPlan, timeout: Duration) -> Self {
        Self { plan, timeout }
    }

    /// Run every step of the plan. Each command run is returned as a record,
    /// in execution order.
    pub async fn run(&self, runner: &CommandRunner) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if self.plan.steps().is_empty() {
            warn!("no audit plan for this platform");
            outcome.findings.push(
                Finding::informational("System audit not supported on this platform")
                    .description("No inspection commands are defined for the host's OS family"),
            );
            return outcome;
        }

        for step in self.plan.steps() {
            info!(check = %step.check, "audit step");
            let mut succeeded: Option<usize> = None;
            for command in &step.commands {
                let request = match ExecutionRequest::new(command.as_str(), self.timeout) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(command, error = %e, "skipping invalid audit command");
                        continue;
                    }
                };
                let record = runner.run(&request).await;
                let ok = record.succeeded();
                outcome.records.push(record);
                if ok {
                    succeeded = Some(outcome.records.len() - 1);
                    break;
                }
                debug!(command, "audit command failed, trying next alternative");
            }

            let findings = match succeeded.and_then(|idx| outcome.records.get(idx)) {
                Some(record) => interpret(step.check, record),
                None => vec![unavailable(step, outcome.records.last())],
            };
            outcome.findings.extend(findings);
        }
        outcome
    }
}

fn unavailable(step: &AuditStep, last: Option<&CommandRecord>) -> Finding {
    let evidence = last.map(|r| excerpt(r.stderr().trim(), EVIDENCE_CHARS)).unwrap_or_default();
    Finding::informational(format!("Could not inspect {}", step.check))
        .description(format!("None of the {} command(s) for this check succeeded", step.commands.len()))
        .evidence(evidence)
        .suggested_fix("Rerun the audit with sufficient privileges")
}

/// Turn one successful command's output into findings.
pub(crate) fn interpret(check: AuditCheck, record: &CommandRecord) -> Vec<Finding> {
    let output = record.stdout();
    match check {
        AuditCheck::StartupEntries => vec![
            Finding::informational("Startup entries enumerated")
                .description(format!("Listed startup entries with `{}`", record.command()))
                .evidence(excerpt(output, EVIDENCE_CHARS))
                .suggested_fix("Review enabled startup entries for unnecessary or unknown programs"),
        ],
        AuditCheck::ScheduledTasks => {
            let entries = output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .count();
            let title = if entries == 0 {
                "No scheduled tasks found"
            } else {
                "Scheduled tasks found"
            };
            vec![
                Finding::informational(title)
                    .description(format!("{entries} scheduled entr(ies) listed by `{}`", record.command()))
                    .evidence(excerpt(output, EVIDENCE_CHARS))
                    .suggested_fix("Review scheduled tasks for commands you do not recognize"),
            ]
        }
        AuditCheck::ListeningPorts => port_findings(output),
        AuditCheck::LocalAccounts => account_findings(output),
    }
}

/// Local ports found in ss/netstat/lsof output.
fn listening_ports(output: &str) -> BTreeSet<u16> {
    let Some(regex) = LOCAL_PORT.as_ref() else {
        return BTreeSet::new();
    };
    output
        .lines()
        .filter(|line| !is_connection_line(line))
        .filter_map(|line| regex.captures(line))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .filter(|port| *port != 0)
        .collect()
}

fn is_connection_line(line: &str) -> bool {
    line.split_whitespace()
        .any(|token| CONNECTION_STATES.contains(&token.trim_matches(['(', ')']).to_ascii_uppercase().as_str()))
}

fn port_findings(output: &str) -> Vec<Finding> {
    let ports = listening_ports(output);
    let list = ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ");
    let mut findings = vec![
        Finding::informational("Listening ports enumerated")
            .description(format!("Found {} listening port(s): {list}", ports.len()))
            .evidence(excerpt(output, EVIDENCE_CHARS))
            .suggested_fix("Close ports for services that are not needed"),
    ];

    for port in ports.iter().filter(|p| BACKDOOR_PORTS.contains(p)) {
        findings.push(
            Finding::new(
                FindingKind::Suspicious,
                format!("Listening on known backdoor port {port}"),
                Severity::High,
            )
            .description(format!("Port {port} is commonly used by backdoors and remote shells"))
            .evidence(port_lines(output, *port))
            .suggested_fix("Identify the owning process (ss -tlnp / netstat -ano) and terminate it if unexpected")
            .confidence(Confidence::Medium),
        );
    }
    if ports.contains(&TELNET_PORT) {
        findings.push(
            Finding::new(FindingKind::Vulnerability, "Telnet service listening", Severity::Medium)
                .description("Telnet sends credentials in cleartext")
                .evidence(port_lines(output, TELNET_PORT))
                .suggested_fix("Disable telnet and use SSH instead")
                .confidence(Confidence::High),
        );
    }
    findings
}

fn port_lines(output: &str, port: u16) -> String {
    let needles = [format!(":{port} "), format!(".{port} ")];
    output
        .lines()
        .filter(|line| {
            let padded = format!("{line} ");
            needles.iter().any(|n| padded.contains(n.as_str()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn account_findings(output: &str) -> Vec<Finding> {
    // passwd format: name:password:uid:gid:...
    let passwd_entries: Vec<&str> = output.lines().filter(|l| l.split(':').count() >= 7).collect();
    if passwd_entries.is_empty() {
        return vec![
            Finding::informational("Local accounts enumerated")
                .evidence(excerpt(output, EVIDENCE_CHARS))
                .suggested_fix("Remove unnecessary or unknown accounts"),
        ];
    }

    let root_users: Vec<&str> = passwd_entries
        .iter()
        .copied()
        .filter(|l| l.split(':').nth(2) == Some("0"))
        .collect();
    let mut findings = vec![
        Finding::informational("Local accounts enumerated")
            .description(format!(
                "{} account(s), {} with UID 0",
                passwd_entries.len(),
                root_users.len()
            ))
            .suggested_fix("Remove unnecessary or unknown accounts"),
    ];
    if root_users.len() > 1 {
        findings.push(
            Finding::new(FindingKind::Vulnerability, "Multiple users with UID 0 detected", Severity::High)
                .description("More than one account has root privileges (UID 0)")
                .evidence(root_users.join("\n"))
                .suggested_fix("Review users with UID 0 and remove unnecessary privileged accounts")
                .confidence(Confidence::High),
        );
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ExitStatus;
    use crate::shell::record::tests::record;
    use crate::shell::{RunnerConfig, RetryPolicy};

    const SS_OUTPUT: &str = "\
Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port
tcp   LISTEN 0      128    0.0.0.0:22         0.0.0.0:*
tcp   LISTEN 0      128    0.0.0.0:4444       0.0.0.0:*
tcp   LISTEN 0      5      [::]:23            [::]:*
udp   UNCONN 0      0      127.0.0.53%lo:53   0.0.0.0:*
";

    #[test]
    fn test_plans_cover_every_check() {
        for family in [OsFamily::Linux, OsFamily::Macos, OsFamily::Windows] {
            let plan = AuditPlan::for_family(family);
            let checks: Vec<AuditCheck> = plan.steps().iter().map(|s| s.check).collect();
            assert_eq!(
                checks,
                vec![
                    AuditCheck::StartupEntries,
                    AuditCheck::ScheduledTasks,
                    AuditCheck::ListeningPorts,
                    AuditCheck::LocalAccounts
                ]
            );
            assert!(plan.steps().iter().all(|s| !s.commands.is_empty()));
        }
        assert!(AuditPlan::for_family(OsFamily::Other).steps().is_empty());
    }

    #[test]
    fn test_listening_ports_parsed() {
        let ports: Vec<u16> = listening_ports(SS_OUTPUT).into_iter().collect();
        assert_eq!(ports, vec![22, 23, 53, 4444]);

        let mac = "tcp4  0  0  *.22   *.*   LISTEN\ntcp4  0  0  127.0.0.1.631  *.*  LISTEN\n";
        let ports: Vec<u16> = listening_ports(mac).into_iter().collect();
        assert_eq!(ports, vec![22, 631]);
    }

    #[test]
    fn test_connections_are_not_listeners() {
        let netstat = "\
  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1012
  TCP    192.168.1.5:12345      93.184.216.34:443      ESTABLISHED     4321
  TCP    192.168.1.5:4444       93.184.216.34:443      TIME_WAIT       0
  UDP    0.0.0.0:5353           *:*                                    2200
";
        let ports: Vec<u16> = listening_ports(netstat).into_iter().collect();
        assert_eq!(ports, vec![135, 5353]);

        let rec = record("netstat -ano", ExitStatus::Code(0), netstat, "");
        let findings = interpret(AuditCheck::ListeningPorts, &rec);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("2 listening port(s): 135, 5353"));

        let ss = "tcp ESTAB 0 0 10.0.0.2:31337 10.0.0.9:22\ntcp LISTEN 0 128 0.0.0.0:22 0.0.0.0:*\n";
        let ports: Vec<u16> = listening_ports(ss).into_iter().collect();
        assert_eq!(ports, vec![22]);
    }

    #[test]
    fn test_backdoor_and_telnet_ports_flagged() {
        let rec = record("ss -tuln", ExitStatus::Code(0), SS_OUTPUT, "");
        let findings = interpret(AuditCheck::ListeningPorts, &rec);

        assert_eq!(findings[0].severity, Severity::Info);
        let backdoor = findings.iter().find(|f| f.title.contains("4444")).unwrap();
        assert_eq!(backdoor.severity, Severity::High);
        assert!(backdoor.evidence.contains("0.0.0.0:4444"));
        let telnet = findings.iter().find(|f| f.title.contains("Telnet")).unwrap();
        assert_eq!(telnet.severity, Severity::Medium);
        assert!(findings.iter().all(|f| f.location.is_empty()));
    }

    #[test]
    fn test_multiple_uid_zero_accounts() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\n\
                      daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
                      toor:x:0:0::/root:/bin/sh\n";
        let rec = record("cat /etc/passwd", ExitStatus::Code(0), passwd, "");
        let findings = interpret(AuditCheck::LocalAccounts, &rec);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].severity, Severity::High);
        assert_eq!(findings[1].kind, FindingKind::Vulnerability);
        assert!(findings[1].evidence.contains("toor"));

        let single = "root:x:0:0:root:/root:/bin/bash\nbob:x:1000:1000::/home/bob:/bin/bash\n";
        let rec = record("cat /etc/passwd", ExitStatus::Code(0), single, "");
        assert_eq!(interpret(AuditCheck::LocalAccounts, &rec).len(), 1);
    }

    #[test]
    fn test_scheduled_tasks_ignore_comments() {
        let rec = record("crontab -l", ExitStatus::Code(0), "# m h dom mon dow command\n", "");
        let findings = interpret(AuditCheck::ScheduledTasks, &rec);
        assert_eq!(findings[0].title, "No scheduled tasks found");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_alternatives_tried_in_order() {
        let plan = AuditPlan::new(vec![
            AuditStep::new(AuditCheck::StartupEntries, &["exit 1", "echo unit.service enabled"]),
            AuditStep::new(AuditCheck::ScheduledTasks, &["exit 1", "exit 2"]),
        ]);
        let runner = CommandRunner::new(RunnerConfig {
            retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1)),
            ..RunnerConfig::default()
        });
        let outcome = SystemAuditor::new(plan, Duration::from_secs(5)).run(&runner).await;

        let commands: Vec<&str> = outcome.records.iter().map(|r| r.command()).collect();
        assert_eq!(commands, vec!["exit 1", "echo unit.service enabled", "exit 1", "exit 2"]);
        assert_eq!(outcome.findings.len(), 2);
        assert_eq!(outcome.findings[0].title, "Startup entries enumerated");
        assert!(outcome.findings[0].evidence.contains("unit.service"));
        assert_eq!(outcome.findings[1].title, "Could not inspect scheduled tasks");
    }

    #[tokio::test]
    async fn test_empty_plan_yields_notice() {
        let runner = CommandRunner::new(RunnerConfig::default());
        let outcome = SystemAuditor::new(AuditPlan::default(), Duration::from_secs(1))
            .run(&runner)
            .await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.findings.len(), 1);
    }
}
