//! Security tool installation through the host package manager.

use std::time::Duration;

use tracing::{info, warn};

use super::os::PackageManager::{self, Apt, Brew, Choco, Dnf, Pacman, Yum};
use super::os::find_in_path;
use crate::report::{Action, ActionCategory};
use crate::scan::excerpt;
use crate::shell::{CommandRecord, CommandRunner, ExecutionRequest};

/// Package name per (tool, package manager).
const TOOL_PACKAGES: &[(&str, &[(PackageManager, &str)])] = &[
    (
        "nmap",
        &[
            (Apt, "nmap"),
            (Yum, "nmap"),
            (Dnf, "nmap"),
            (Pacman, "nmap"),
            (Brew, "nmap"),
            (Choco, "nmap"),
        ],
    ),
    (
        "nikto",
        &[(Apt, "nikto"), (Yum, "nikto"), (Dnf, "nikto"), (Brew, "nikto")],
    ),
    ("gobuster", &[(Apt, "gobuster"), (Pacman, "gobuster"), (Brew, "gobuster")]),
];

pub fn package_for(tool: &str, manager: PackageManager) -> Option<&'static str> {
    TOOL_PACKAGES
        .iter()
        .find(|(name, _)| *name == tool)?
        .1
        .iter()
        .find(|(pm, _)| *pm == manager)
        .map(|(_, package)| *package)
}

/// Installs tools with the host's package manager, if there is one.
#[derive(Debug, Clone)]
pub struct ToolInstaller {
    manager: Option<PackageManager>,
    timeout: Duration,
}

impl ToolInstaller {
    pub fn new(manager: Option<PackageManager>, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub fn is_available(tool: &str) -> bool {
        find_in_path(tool).is_some()
    }

    /// The shell command that installs `tool`, if the tool is known for the
    /// host's package manager.
    pub fn install_command(&self, tool: &str) -> Option<String> {
        let manager = self.manager?;
        let package = package_for(tool, manager)?;
        let command = match manager {
            Apt => format!("sudo apt-get update && sudo apt-get install -y {package}"),
            Yum | Dnf => format!("sudo {manager} install -y {package}"),
            Pacman => format!("sudo pacman -S --noconfirm {package}"),
            Brew => format!("brew install {package}"),
            Choco => format!("choco install {package} -y"),
        };
        Some(command)
    }

    /// Install `tool`. Returns the install command's record when one ran,
    /// and the action describing the outcome.
    pub async fn install(&self, runner: &CommandRunner, tool: &str) -> (Option<CommandRecord>, Action) {
        let Some(command) = self.install_command(tool) else {
            let detail = match self.manager {
                Some(manager) => format!("Cannot install {tool}: no {manager} package known"),
                None => format!("Cannot install {tool}: no package manager detected"),
            };
            warn!(tool, "no install recipe");
            return (None, Action::new(ActionCategory::CommandAttempted, detail));
        };

        let request = match ExecutionRequest::new(&command, self.timeout) {
            Ok(request) => request,
            Err(e) => {
                let detail = format!("Cannot install {tool}: {e}");
                return (None, Action::new(ActionCategory::CommandAttempted, detail));
            }
        };
        let record = runner.run(&request).await;
        let action = if record.succeeded() {
            info!(tool, "tool installed");
            Action::new(
                ActionCategory::ToolInstalled,
                format!("Installed {tool} with `{command}`"),
            )
        } else {
            warn!(tool, exit = %record.final_status(), "tool install failed");
            Action::new(
                ActionCategory::CommandAttempted,
                format!(
                    "Failed to install {tool} with `{command}` (exit {}): {}",
                    record.final_status(),
                    excerpt(record.stderr().trim(), 200)
                ),
            )
        };
        (Some(record), action)
    }
}
