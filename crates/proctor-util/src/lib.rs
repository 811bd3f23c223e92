//! Shared utilities for proctord
//!
//! This crate provides:
//! - ID types (ExamId, SessionId, ClientId)
//! - Clock helpers (mock time, schedule time parsing, minute arithmetic)
//! - Error types
//! - Default paths for socket, data, and config

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
