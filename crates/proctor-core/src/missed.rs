//! Missed exam resolution
//!
//! Lists exams whose display window has lapsed so an administrator can
//! re-open them as makeup exams.

use chrono::NaiveDateTime;
use proctor_api::{DaySchedule, Exam, ExamStatus, GradeSchedule, MissedExam, MissedExams, MissedSession};
use proctor_config::WindowRules;
use proctor_util::{at_date, ExamId};
use std::collections::HashSet;

use crate::{resolve_display, ExamWindow};

/// Collect missed exams per grade, most recent day first.
///
/// Days before today count in full. On today the displayed session is left
/// out and the rest contribute exams that are finished or past their end.
/// Ids in `exclude` are never reported.
pub fn find_missed_exams(
    schedule: &GradeSchedule,
    now: NaiveDateTime,
    rules: &WindowRules,
    exclude: &HashSet<ExamId>,
) -> MissedExams {
    let today = now.date();
    let mut missed = MissedExams::new();

    for (grade, days) in schedule.iter() {
        let mut days: Vec<&DaySchedule> = days.iter().filter(|d| d.date <= today).collect();
        days.sort_by(|a, b| b.date.cmp(&a.date));

        let out = missed.get_mut(grade);
        for day in days {
            let displayed = if day.date == today {
                resolve_display(day.date, &day.sessions, now, rules).map(|d| d.index)
            } else {
                None
            };

            let mut sessions: Vec<_> = day
                .sessions
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != displayed)
                .map(|(_, s)| s)
                .collect();
            sessions.sort_by_key(|s| s.number);

            for session in sessions {
                let session_window = match (
                    at_date(day.date, &session.start_time),
                    at_date(day.date, &session.end_time),
                ) {
                    (Some(start), Some(end)) if start < end => Some(ExamWindow { start, end }),
                    _ => None,
                };

                let exams: Vec<MissedExam> = session
                    .exams
                    .iter()
                    .filter(|e| !exclude.contains(&e.id))
                    .filter(|e| day.date < today || lapsed(day, e, session_window, now))
                    .map(|e| MissedExam {
                        id: e.id.clone(),
                        subject: e.subject.clone(),
                        grade,
                    })
                    .collect();

                if !exams.is_empty() {
                    out.push(MissedSession {
                        session_id: session.id.clone(),
                        session_number: session.number,
                        exams,
                    });
                }
            }
        }
    }

    missed
}

fn lapsed(day: &DaySchedule, exam: &Exam, session: Option<ExamWindow>, now: NaiveDateTime) -> bool {
    if exam.status == ExamStatus::Finished {
        return true;
    }
    let end = match session {
        Some(window) => Some(ExamWindow::for_exam(day.date, exam, window).end),
        None => at_date(day.date, &exam.end_time),
    };
    end.is_some_and(|end| end <= now)
}
