//! Store trait definitions

use chrono::{DateTime, Days, Local, NaiveDate};
use proctor_api::{Exam, ExamStatus, GradeLevel, GradeSchedule};
use proctor_util::{ExamId, SessionId};

use crate::StoreResult;

/// Read side: the multi-day exam schedule.
pub trait ScheduleRepository: Send + Sync {
    /// All exam days from `from` through `to` inclusive, grouped by grade,
    /// ordered by date with sessions and exams attached in start order.
    fn get_schedule_range(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<GradeSchedule>;

    /// Today plus the next `days_ahead` days.
    fn get_schedule(&self, now: DateTime<Local>, days_ahead: i64) -> StoreResult<GradeSchedule> {
        let today = now.date_naive();
        let ahead = u64::try_from(days_ahead).unwrap_or(0);
        let until = today.checked_add_days(Days::new(ahead)).unwrap_or(today);
        self.get_schedule_range(today, until)
    }
}

/// Write side: exam status transitions.
pub trait ExamStatusStore: Send + Sync {
    /// Persist a status together with the access token in effect.
    fn update_status(&self, exam_id: &ExamId, status: ExamStatus, token: &str) -> StoreResult<()>;

    /// Mark every listed exam finished in one transaction.
    fn batch_mark_finished(&self, exam_ids: &[ExamId]) -> StoreResult<()>;

    /// Look up one exam with its placement in the schedule
    fn get_exam(&self, exam_id: &ExamId) -> StoreResult<Option<ExamRecord>>;

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// An exam as stored, with the session and day it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamRecord {
    pub exam: Exam,
    pub grade: GradeLevel,
    pub date: NaiveDate,
    pub session_id: SessionId,
    pub session_number: u32,
    /// Working time in minutes, when one was recorded
    pub duration_minutes: Option<u32>,
}
