//! Long-lived shell command sessions.

pub mod buffer;
pub mod manager;
mod process_group;
pub mod session;

pub use manager::{
    parse_command_id, CommandRequest, CommandSessionConfig, CommandSessionManager, SendInput,
    StatusQuery,
};
pub use session::{CommandSnapshot, CommandStatus};
