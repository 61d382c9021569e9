//! # parley-core
//!
//! Shared vocabulary for the parley workspace: branded ids, the backend turn
//! format, streamed chunks, the backend and tool traits, token accounting and
//! the step/progress types a Turn produces.

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tokens;
pub mod tools;
pub mod turn;
