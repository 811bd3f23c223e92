//! Protocol types for proctord
//!
//! This crate defines the stable API between proctord and its clients:
//! - Schedule and snapshot types (the dashboard wire shape)
//! - Missed exam listing
//! - Commands (requests from clients) and responses
//! - Versioning

mod commands;
mod types;

pub use commands::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
