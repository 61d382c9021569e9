//! HTTP surface for command sessions and reply generation.

pub mod error;
pub mod handlers;
pub mod replies;
pub mod server;

pub use error::ApiError;
pub use replies::{ReplyAccepted, ReplyEvent, ReplyParams, ReplyService};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
