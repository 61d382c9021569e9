//! Turn orchestration, tool execution and command sessions.
//!
//! [`orchestrator::TurnOrchestrator`] drives one user turn across as many
//! backend rounds as the model's tool use requires. Tools live in a
//! [`registry::ToolRegistry`]; the built-in ones operate on the shell
//! sessions kept by [`commands::CommandSessionManager`].

pub mod accumulate;
pub mod commands;
pub mod correlate;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod tools;
pub mod truncate;

#[cfg(test)]
mod testing;

pub use commands::{CommandSessionConfig, CommandSessionManager};
pub use error::CommandError;
pub use orchestrator::{OrchestratorConfig, ReplyRequest, TurnOrchestrator};
pub use registry::{ToolFilter, ToolRegistry};
