//! # relay-core
//!
//! Coordination core of the Relay task runner.
//!
//! This crate provides:
//! - The correlation registry linking a child's input request to a later answer
//! - The event hub fanning events out to per-account and admin feeds
//! - The per-account task runner that drives a child process
//! - The task manager tracking which accounts currently have a runner
//! - The submission gateway used by external callers to answer requests
//! - YAML configuration for all of the above

pub mod config;
mod gateway;
mod hub;
pub mod launcher;
mod manager;
mod registry;
mod runner;

pub use config::{ConfigError, InputConfig, RelayConfig, ServerConfig, TaskConfig};
pub use gateway::{SubmissionGateway, SubmitError};
pub use hub::{EventHub, Feed};
pub use launcher::{Credentials, Launcher, OutputLines, ProcessLauncher, TaskIo};
pub use manager::{ActiveTaskInfo, ManagerError, TaskManager};
pub use registry::{CorrelationRegistry, PendingHandle, PendingSummary, RegistryError, WaitOutcome};
pub use runner::{InputPolicy, RunnerError, RunnerState, TaskRunner};

pub use relay_proto::{AccountId, Event, Scope};
