//! Error types shared across proctord crates

use thiserror::Error;

use crate::ExamId;

/// Top-level error type for proctord operations
#[derive(Debug, Error)]
pub enum ProctorError {
    #[error("Exam not found: {0}")]
    ExamNotFound(ExamId),

    #[error("Exam {0} is already open as a makeup exam")]
    DuplicateEntry(ExamId),

    #[error("A scheduled exam for grade {0} starts within the pre-show margin")]
    SessionStartingSoon(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProctorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ProctorError>;
