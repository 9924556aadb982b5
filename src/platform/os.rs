//! Host operating system context.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Macos,
    Windows,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::Macos,
            "windows" => OsFamily::Windows,
            _ => OsFamily::Other,
        }
    }

    /// Well-known log files for this family.
    pub fn default_log_paths(&self) -> Vec<PathBuf> {
        let paths: &[&str] = match self {
            OsFamily::Linux => &[
                "/var/log/auth.log",
                "/var/log/syslog",
                "/var/log/secure",
                "/var/log/messages",
            ],
            OsFamily::Macos => &["/var/log/system.log", "/var/log/secure.log"],
            OsFamily::Windows | OsFamily::Other => &[],
        };
        paths.iter().map(PathBuf::from).collect()
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsFamily::Linux => "linux",
            OsFamily::Macos => "macos",
            OsFamily::Windows => "windows",
            OsFamily::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Yum,
    Dnf,
    Pacman,
    Brew,
    Choco,
}

impl PackageManager {
    /// Detection order, with the executable each one is found by.
    const PROBES: [(&'static str, PackageManager); 6] = [
        ("apt-get", PackageManager::Apt),
        ("yum", PackageManager::Yum),
        ("dnf", PackageManager::Dnf),
        ("pacman", PackageManager::Pacman),
        ("brew", PackageManager::Brew),
        ("choco", PackageManager::Choco),
    ];

    pub fn detect() -> Option<Self> {
        Self::PROBES
            .iter()
            .find(|(program, _)| find_in_path(program).is_some())
            .map(|(_, manager)| *manager)
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PackageManager::Apt => "apt",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::Brew => "brew",
            PackageManager::Choco => "choco",
        };
        f.write_str(name)
    }
}

/// What the orchestrator knows about the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsContext {
    pub os_family: OsFamily,
    pub distribution: Option<String>,
    pub version: Option<String>,
    pub package_manager: Option<PackageManager>,
}

impl OsContext {
    pub fn detect() -> Self {
        let os_family = OsFamily::current();
        let (distribution, version) = if os_family == OsFamily::Linux {
            match std::fs::read_to_string("/etc/os-release") {
                Ok(text) => parse_os_release(&text),
                Err(e) => {
                    debug!(error = %e, "no /etc/os-release");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };
        let context = Self {
            os_family,
            distribution,
            version,
            package_manager: PackageManager::detect(),
        };
        debug!(?context, "detected host");
        context
    }
}

impl fmt::Display for OsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.os_family)?;
        if let Some(distribution) = &self.distribution {
            write!(f, " ({distribution}")?;
            if let Some(version) = &self.version {
                write!(f, " {version}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// `ID` and `VERSION_ID` from an os-release file.
pub fn parse_os_release(text: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut version = None;
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        match key {
            "ID" => id = Some(value),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }
    (id, version)
}

/// Locate an executable on `PATH`.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
