//! Makeup exam overlay
//!
//! Makeup exams live in memory only, keyed by grade, until they expire. Each
//! tick merges the live entries into today's displayed sessions.

use chrono::{DateTime, Duration, Local};
use proctor_api::{Exam, ExamStatus, GradeLevel, Session};
use proctor_util::{format_clock, ExamId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::{
    advance_makeup, generate_access_token, link_exams, TokenError, TrackError, TrackResult,
};

/// A re-opened exam with its own expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeupExamEntry {
    pub exam: Exam,
    pub grade: GradeLevel,
    pub created_at: DateTime<Local>,
    pub expires_at: DateTime<Local>,
    pub target_session_id: SessionId,
}

impl MakeupExamEntry {
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct MakeupOverlay {
    entries: RwLock<HashMap<GradeLevel, Vec<MakeupExamEntry>>>,
}

impl MakeupOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> TrackResult<RwLockReadGuard<'_, HashMap<GradeLevel, Vec<MakeupExamEntry>>>> {
        self.entries.read().map_err(|_| TrackError::LockPoisoned)
    }

    fn write(&self) -> TrackResult<RwLockWriteGuard<'_, HashMap<GradeLevel, Vec<MakeupExamEntry>>>> {
        self.entries.write().map_err(|_| TrackError::LockPoisoned)
    }

    /// Register a makeup exam running from `now` for `duration_minutes`.
    ///
    /// An empty `target_session_id` is replaced with a generated one so the
    /// exam still lands in a session of its own.
    pub fn add(
        &self,
        grade: GradeLevel,
        exam: Exam,
        duration_minutes: u32,
        target_session_id: SessionId,
        now: DateTime<Local>,
    ) -> TrackResult<MakeupExamEntry> {
        self.add_with(
            grade,
            exam,
            duration_minutes,
            target_session_id,
            now,
            generate_access_token,
        )
    }

    fn add_with(
        &self,
        grade: GradeLevel,
        mut exam: Exam,
        duration_minutes: u32,
        target_session_id: SessionId,
        now: DateTime<Local>,
        issue_token: impl FnOnce() -> Result<String, TokenError>,
    ) -> TrackResult<MakeupExamEntry> {
        if duration_minutes == 0 {
            return Err(TrackError::InvalidDuration);
        }

        let mut entries = self.write()?;
        let list = entries.entry(grade).or_default();
        if list.iter().any(|e| e.exam.id == exam.id) {
            return Err(TrackError::DuplicateEntry {
                grade,
                exam_id: exam.id,
            });
        }

        let expires_at = now + Duration::minutes(i64::from(duration_minutes));
        let target_session_id = if target_session_id.is_empty() {
            SessionId::new(format!("susulan_{}_{}_{}", grade, now.timestamp(), exam.id))
        } else {
            target_session_id
        };

        exam.is_makeup = true;
        exam.start_time = format_clock(now.time());
        exam.end_time = format_clock(expires_at.time());
        exam.duration_minutes = duration_minutes;
        exam.access_token = issue_token()?;
        exam.status = ExamStatus::Active;

        let entry = MakeupExamEntry {
            exam,
            grade,
            created_at: now,
            expires_at,
            target_session_id,
        };
        list.push(entry.clone());

        Ok(entry)
    }

    /// Drop every entry past its expiry and return the dropped exam ids.
    pub fn purge_expired(&self, now: DateTime<Local>) -> TrackResult<Vec<ExamId>> {
        let mut entries = self.write()?;
        let mut purged = Vec::new();

        for list in entries.values_mut() {
            list.retain(|entry| {
                if entry.is_expired(now) {
                    debug!(exam_id = %entry.exam.id, grade = %entry.grade, "Makeup exam expired");
                    purged.push(entry.exam.id.clone());
                    false
                } else {
                    true
                }
            });
        }
        entries.retain(|_, list| !list.is_empty());

        Ok(purged)
    }

    /// Live entries of one grade in insertion order
    pub fn entries_for(&self, grade: GradeLevel) -> TrackResult<Vec<MakeupExamEntry>> {
        Ok(self.read()?.get(&grade).cloned().unwrap_or_default())
    }

    pub fn exam_ids(&self) -> TrackResult<HashSet<ExamId>> {
        Ok(self
            .read()?
            .values()
            .flatten()
            .map(|e| e.exam.id.clone())
            .collect())
    }

    pub fn len(&self) -> TrackResult<usize> {
        Ok(self.read()?.values().map(Vec::len).sum())
    }

    pub fn is_empty(&self) -> TrackResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Virtual session id for makeup exams whose target is not on screen
pub fn virtual_session_id(grade: GradeLevel, target: &SessionId) -> SessionId {
    SessionId::new(format!("susulan_gabungan_{}_{}", grade, target))
}

/// Merge a grade's makeup entries into today's displayed sessions.
///
/// Entries targeting a displayed session join it, replacing a scheduled exam
/// with the same id. The rest are grouped by target into virtual sessions
/// numbered 0 that run from `now` for `virtual_minutes`.
pub fn merge_makeups(
    grade: GradeLevel,
    sessions: &mut Vec<Session>,
    entries: &[MakeupExamEntry],
    now: DateTime<Local>,
    virtual_minutes: i64,
    countdown_minutes: i64,
) {
    let mut groups: Vec<(&SessionId, Vec<Exam>)> = Vec::new();
    for entry in entries {
        let mut exam = entry.exam.clone();
        advance_makeup(
            &mut exam,
            entry.created_at,
            entry.expires_at,
            now,
            countdown_minutes,
        );

        match groups.iter_mut().find(|(target, _)| **target == entry.target_session_id) {
            Some((_, exams)) => exams.push(exam),
            None => groups.push((&entry.target_session_id, vec![exam])),
        }
    }

    for (target, exams) in groups {
        match sessions.iter_mut().find(|s| s.is_displayed && s.id == *target) {
            Some(session) => {
                for exam in exams {
                    session.exams.retain(|e| e.id != exam.id);
                    session.exams.push(exam);
                }
                session.has_makeup = true;
                link_exams(&mut session.exams);
            }
            None => {
                let end = now + Duration::minutes(virtual_minutes);
                let mut session = Session::new(
                    virtual_session_id(grade, target),
                    0,
                    format_clock(now.time()),
                    format_clock(end.time()),
                )
                .with_exams(exams);
                session.is_displayed = true;
                session.has_makeup = true;
                session.minutes_to_window_close = virtual_minutes;
                link_exams(&mut session.exams);
                sessions.push(session);
            }
        }
    }
}
