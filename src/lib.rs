//! sec-agent - security reconnaissance with gated command execution
//!
//! This library provides the core of the agent:
//! - A safety gate that classifies commands against a danger pattern table
//! - An execution engine with streamed output, timeouts and retries
//! - Finding extractors for logs, directories, websites and host audits
//! - A report aggregator with JSON persistence and a console summary
//!
//! # Example
//!
//! ```no_run
//! use sec_agent::agent::{Agent, AgentSettings, StdinConfirm, Task};
//! use sec_agent::config::AgentConfig;
//! use sec_agent::event::init_event_channel;
//! use sec_agent::platform::OsContext;
//! use sec_agent::report::save;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (events, mut rx) = init_event_channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             println!("{event}");
//!         }
//!     });
//!
//!     let mut agent = Agent::new(
//!         AgentConfig::default(),
//!         Task::RunCommand("uname -a".to_string()),
//!         AgentSettings::default(),
//!         OsContext::detect(),
//!         Box::new(StdinConfirm),
//!     )?
//!     .with_events(events);
//!     agent.run().await?;
//!
//!     let path = save(&agent.finish(), std::path::Path::new("."))?;
//!     println!("report written to {}", path.display());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod platform;
pub mod report;
pub mod scan;
pub mod security;
pub mod shell;
pub mod utils;

// Re-export commonly used types
pub use agent::{Agent, AgentSettings, Confirm, ConfirmFuture, StdinConfirm, Task};
pub use config::AgentConfig;
pub use error::{AgentError, ConfigError, RequestError};
pub use event::{AgentEvent, EventSink, init_event_channel};
pub use report::{Report, ReportBuilder};
pub use scan::{Finding, Severity};
pub use shell::{CommandRecord, CommandRunner, ExecutionRequest};
