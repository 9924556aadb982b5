//! Host collaborators: operating system context and tool installation.
//!
//! Both are called by the orchestrator only. The engine, the gate and the
//! extractors never look at the host beyond running commands.

mod installer;
mod os;

pub use installer::{ToolInstaller, package_for};
pub use os::{OsContext, OsFamily, PackageManager, find_in_path, parse_os_release};
