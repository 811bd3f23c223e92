//! Exam status derivation and access tokens

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use proctor_api::{Exam, ExamStatus};
use proctor_util::{at_date, minutes_until_ceil, ExamId};
use rand::{rngs::OsRng, TryRngCore};
use thiserror::Error;
use tracing::warn;

/// Length of the access token students type to enter an exam
pub const TOKEN_LENGTH: usize = 5;

const TOKEN_ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read OS randomness: {0}")]
    Rng(String),
}

/// Fresh uppercase token from the OS random source.
pub fn generate_access_token() -> Result<String, TokenError> {
    let mut bytes = [0u8; TOKEN_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| TokenError::Rng(e.to_string()))?;

    Ok(bytes
        .iter()
        .map(|b| TOKEN_ALPHABET[*b as usize % TOKEN_ALPHABET.len()] as char)
        .collect())
}

/// Start and end of one exam on the dashboard clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ExamWindow {
    /// The exam's own times when they parse, otherwise the session's.
    pub fn for_exam(date: NaiveDate, exam: &Exam, session: ExamWindow) -> Self {
        match (at_date(date, &exam.start_time), at_date(date, &exam.end_time)) {
            (Some(start), Some(end)) if start < end => Self { start, end },
            _ => session,
        }
    }

    pub fn status_at(&self, now: NaiveDateTime) -> ExamStatus {
        if now >= self.end {
            ExamStatus::Finished
        } else if now >= self.start {
            ExamStatus::Active
        } else {
            ExamStatus::Pending
        }
    }
}

/// A status change that still has to reach the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub exam_id: ExamId,
    pub from: ExamStatus,
    pub to: ExamStatus,
    pub token: String,
}

/// Advance a scheduled exam to its status at `now`.
///
/// `exam.status` holds the last persisted value on entry. The result never
/// moves backwards. A change is returned only when the status differs from
/// that value; entering `Active` issues a new token, every other change keeps
/// the current one. When no token can be issued the exam stays at its prior
/// status so the next tick tries again.
pub fn advance_regular(
    exam: &mut Exam,
    window: ExamWindow,
    now: NaiveDateTime,
    countdown_minutes: i64,
) -> Option<StatusChange> {
    advance_regular_with(exam, window, now, countdown_minutes, generate_access_token)
}

fn advance_regular_with(
    exam: &mut Exam,
    window: ExamWindow,
    now: NaiveDateTime,
    countdown_minutes: i64,
    issue_token: impl FnOnce() -> Result<String, TokenError>,
) -> Option<StatusChange> {
    let prior = exam.status;
    let mut status = prior.max(window.status_at(now));

    if status != prior && status == ExamStatus::Active {
        match issue_token() {
            Ok(token) => exam.access_token = token,
            Err(e) => {
                warn!(exam_id = %exam.id, error = %e, "Could not issue access token");
                status = prior;
            }
        }
    }

    exam.minutes_remaining = 0;
    exam.countdown_active = false;
    if status == ExamStatus::Pending {
        let wait = minutes_until_ceil(now, window.start).max(0);
        exam.minutes_remaining = wait;
        exam.countdown_active = wait <= countdown_minutes;
    }

    if status == prior {
        return None;
    }
    exam.status = status;

    Some(StatusChange {
        exam_id: exam.id.clone(),
        from: prior,
        to: status,
        token: exam.access_token.clone(),
    })
}

/// Status of a makeup exam, which runs on its own clock from creation to
/// expiry instead of a session window.
pub fn advance_makeup(
    exam: &mut Exam,
    created_at: DateTime<Local>,
    expires_at: DateTime<Local>,
    now: DateTime<Local>,
    countdown_minutes: i64,
) {
    let (now, created, expires) = (now.naive_local(), created_at.naive_local(), expires_at.naive_local());

    exam.countdown_active = false;
    if now < created {
        exam.status = ExamStatus::Pending;
        exam.minutes_remaining = minutes_until_ceil(now, created);
        exam.countdown_active = exam.minutes_remaining <= countdown_minutes;
    } else if now <= expires {
        exam.status = ExamStatus::Active;
        exam.minutes_remaining = minutes_until_ceil(now, expires);
    } else {
        exam.status = ExamStatus::Finished;
        exam.minutes_remaining = 0;
    }
}

/// Mark every exam but the last as having a successor.
pub fn link_exams(exams: &mut [Exam]) {
    let last = exams.len().saturating_sub(1);
    for (i, exam) in exams.iter_mut().enumerate() {
        exam.has_next_exam = i < last;
    }
}
