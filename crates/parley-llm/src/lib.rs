//! # parley-llm
//!
//! Backend implementations for the turn orchestrator: a streaming Gemini
//! client and a scripted mock used throughout the test suites.

pub mod converter;
pub mod gemini;
pub mod mock;
pub mod sse;
pub mod types;

pub use gemini::{GeminiBackend, GeminiConfig};
pub use mock::{MockBackend, MockRound};
