//! Exam session tracking engine for proctord
//!
//! This crate is the heart of proctord, containing:
//! - Display window resolution (which session is on screen, and for how long)
//! - Exam status state machine (pending -> active -> selesai) with access tokens
//! - The makeup exam overlay and its merge into today's schedule
//! - Missed exam resolution for makeup scheduling
//! - The periodic tracker task

mod engine;
mod missed;
mod overlay;
mod status;
mod tracker;
mod window;

pub use engine::*;
pub use missed::*;
pub use overlay::*;
pub use status::*;
pub use tracker::*;
pub use window::*;

use proctor_api::GradeLevel;
use proctor_store::StoreError;
use proctor_util::ExamId;
use thiserror::Error;

/// Tracking errors
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Exam {exam_id} is already a makeup exam for grade {grade}")]
    DuplicateEntry { grade: GradeLevel, exam_id: ExamId },

    #[error("Makeup duration must be at least one minute")]
    InvalidDuration,

    #[error("Access token unavailable: {0}")]
    Token(#[from] TokenError),

    #[error("Tracking state lock poisoned")]
    LockPoisoned,

    #[error("Tick task failed: {0}")]
    Task(String),
}

pub type TrackResult<T> = Result<T, TrackError>;
