//! SQLite-based store implementation

use chrono::NaiveDate;
use proctor_api::{DaySchedule, Exam, ExamStatus, GradeLevel, GradeSchedule, Session};
use proctor_util::{ExamId, SessionId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ExamRecord, ExamStatusStore, ScheduleRepository, StoreError, StoreResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// `busy_timeout` bounds how long any call waits on a locked database
    /// before failing, so a wedged writer cannot stall the tick loop forever.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS exam_days (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                grade TEXT NOT NULL,
                date TEXT NOT NULL,
                UNIQUE (grade, date)
            );

            CREATE TABLE IF NOT EXISTS exam_sessions (
                id TEXT PRIMARY KEY,
                day_id INTEGER NOT NULL REFERENCES exam_days(id) ON DELETE CASCADE,
                number INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exams (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES exam_sessions(id) ON DELETE CASCADE,
                subject TEXT NOT NULL,
                start_time TEXT NOT NULL DEFAULT '',
                end_time TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                token TEXT NOT NULL DEFAULT '',
                duration_minutes INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_exam_days_date ON exam_days(date);
            CREATE INDEX IF NOT EXISTS idx_exam_sessions_day ON exam_sessions(day_id);
            CREATE INDEX IF NOT EXISTS idx_exams_session ON exams(session_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    /// Insert or replace one exam day with its sessions and exams.
    pub fn import_day(&self, grade: GradeLevel, day: &DaySchedule) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let date = day.date.format(DATE_FORMAT).to_string();

        tx.execute(
            "INSERT INTO exam_days (grade, date) VALUES (?1, ?2) ON CONFLICT(grade, date) DO NOTHING",
            params![grade.as_str(), date],
        )?;
        let day_id: i64 = tx.query_row(
            "SELECT id FROM exam_days WHERE grade = ?1 AND date = ?2",
            params![grade.as_str(), date],
            |row| row.get(0),
        )?;

        for session in &day.sessions {
            tx.execute(
                r#"
                INSERT INTO exam_sessions (id, day_id, number, start_time, end_time)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    day_id = excluded.day_id,
                    number = excluded.number,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time
                "#,
                params![
                    session.id.as_str(),
                    day_id,
                    session.number,
                    session.start_time,
                    session.end_time
                ],
            )?;

            for exam in &session.exams {
                let duration = (exam.duration_minutes > 0).then_some(exam.duration_minutes);
                tx.execute(
                    r#"
                    INSERT INTO exams (id, session_id, subject, start_time, end_time, status, token, duration_minutes)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(id) DO UPDATE SET
                        session_id = excluded.session_id,
                        subject = excluded.subject,
                        start_time = excluded.start_time,
                        end_time = excluded.end_time,
                        status = excluded.status,
                        token = excluded.token,
                        duration_minutes = excluded.duration_minutes
                    "#,
                    params![
                        exam.id.as_str(),
                        session.id.as_str(),
                        exam.subject,
                        exam.start_time,
                        exam.end_time,
                        exam.status.as_str(),
                        exam.access_token,
                        duration
                    ],
                )?;
            }
        }

        tx.commit()?;
        debug!(grade = %grade, date = %date, sessions = day.sessions.len(), "Exam day imported");
        Ok(())
    }
}

struct ScheduleRow {
    grade: String,
    date: String,
    session_id: Option<String>,
    session_number: Option<u32>,
    session_start: Option<String>,
    session_end: Option<String>,
    exam_id: Option<String>,
    subject: Option<String>,
    exam_start: Option<String>,
    exam_end: Option<String>,
    status: Option<String>,
    token: Option<String>,
    duration_minutes: Option<u32>,
}

fn exam_from_columns(
    id: String,
    subject: String,
    start: String,
    end: String,
    status: &str,
    token: String,
    duration_minutes: Option<u32>,
) -> Exam {
    let mut exam = Exam::new(id, subject, start, end);
    exam.status = ExamStatus::from_stored(status);
    exam.access_token = token;
    exam.duration_minutes = duration_minutes.unwrap_or(0);
    exam
}

fn parse_date(value: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| StoreError::InvalidData(format!("date '{}': {}", value, e)))
}

impl ScheduleRepository for SqliteStore {
    fn get_schedule_range(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<GradeSchedule> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT d.grade, d.date,
                   s.id, s.number, s.start_time, s.end_time,
                   e.id, e.subject, e.start_time, e.end_time, e.status, e.token, e.duration_minutes
            FROM exam_days d
            LEFT JOIN exam_sessions s ON s.day_id = d.id
            LEFT JOIN exams e ON e.session_id = s.id
            WHERE d.date BETWEEN ?1 AND ?2
            ORDER BY d.date, d.grade, s.start_time, s.number, e.start_time, e.id
            "#,
        )?;

        let rows = stmt.query_map(
            params![from.format(DATE_FORMAT).to_string(), to.format(DATE_FORMAT).to_string()],
            |row| {
                Ok(ScheduleRow {
                    grade: row.get(0)?,
                    date: row.get(1)?,
                    session_id: row.get(2)?,
                    session_number: row.get(3)?,
                    session_start: row.get(4)?,
                    session_end: row.get(5)?,
                    exam_id: row.get(6)?,
                    subject: row.get(7)?,
                    exam_start: row.get(8)?,
                    exam_end: row.get(9)?,
                    status: row.get(10)?,
                    token: row.get(11)?,
                    duration_minutes: row.get(12)?,
                })
            },
        )?;

        let mut schedule = GradeSchedule::new();
        for row in rows {
            let row = row?;

            let grade: GradeLevel = match row.grade.parse() {
                Ok(grade) => grade,
                Err(e) => {
                    warn!(error = %e, date = %row.date, "Skipping exam day with unknown grade");
                    continue;
                }
            };
            let date = parse_date(&row.date)?;

            let days = schedule.get_mut(grade);
            if days.last().map(|d| d.date) != Some(date) {
                days.push(DaySchedule::new(date, Vec::new()));
            }
            let Some(day) = days.last_mut() else { continue };

            let Some(session_id) = row.session_id else { continue };
            if day.sessions.last().map(|s| s.id.as_str()) != Some(session_id.as_str()) {
                day.sessions.push(Session::new(
                    session_id,
                    row.session_number.unwrap_or(0),
                    row.session_start.unwrap_or_default(),
                    row.session_end.unwrap_or_default(),
                ));
            }
            let Some(session) = day.sessions.last_mut() else { continue };

            if let Some(exam_id) = row.exam_id {
                session.exams.push(exam_from_columns(
                    exam_id,
                    row.subject.unwrap_or_default(),
                    row.exam_start.unwrap_or_default(),
                    row.exam_end.unwrap_or_default(),
                    row.status.as_deref().unwrap_or_default(),
                    row.token.unwrap_or_default(),
                    row.duration_minutes,
                ));
            }
        }

        Ok(schedule)
    }
}

impl ExamStatusStore for SqliteStore {
    fn update_status(&self, exam_id: &ExamId, status: ExamStatus, token: &str) -> StoreResult<()> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE exams SET status = ?1, token = ?2 WHERE id = ?3",
            params![status.as_str(), token, exam_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("exam {}", exam_id)));
        }

        debug!(exam_id = %exam_id, status = %status, "Exam status updated");
        Ok(())
    }

    fn batch_mark_finished(&self, exam_ids: &[ExamId]) -> StoreResult<()> {
        if exam_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE exams SET status = ?1 WHERE id = ?2")?;
            for id in exam_ids {
                stmt.execute(params![ExamStatus::Finished.as_str(), id.as_str()])?;
            }
        }
        tx.commit()?;

        debug!(count = exam_ids.len(), "Exams marked finished");
        Ok(())
    }

    fn get_exam(&self, exam_id: &ExamId) -> StoreResult<Option<ExamRecord>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                r#"
                SELECT e.id, e.subject, e.start_time, e.end_time, e.status, e.token, e.duration_minutes,
                       s.id, s.number, d.grade, d.date
                FROM exams e
                JOIN exam_sessions s ON s.id = e.session_id
                JOIN exam_days d ON d.id = s.day_id
                WHERE e.id = ?1
                "#,
                [exam_id.as_str()],
                |row| {
                    Ok((
                        (
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<u32>>(6)?,
                        ),
                        row.get::<_, String>(7)?,
                        row.get::<_, u32>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some(((id, subject, start, end, status, token, duration), session_id, number, grade, date)) =
            row
        else {
            return Ok(None);
        };

        let grade: GradeLevel = grade
            .parse()
            .map_err(|e: proctor_api::UnknownGrade| StoreError::InvalidData(e.to_string()))?;

        Ok(Some(ExamRecord {
            exam: exam_from_columns(id, subject, start, end, &status, token, duration),
            grade,
            date: parse_date(&date)?,
            session_id: SessionId::new(session_id),
            session_number: number,
            duration_minutes: duration,
        }))
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn day(date: NaiveDate) -> DaySchedule {
        let mut mtk = Exam::new("e1", "Matematika", "07:30", "09:00");
        mtk.duration_minutes = 90;
        let bio = Exam::new("e2", "Biologi", "07:30", "09:00");
        let fis = Exam::new("e3", "Fisika", "10:00", "11:30");

        DaySchedule::new(
            date,
            vec![
                Session::new("s2", 2, "10:00", "11:30").with_exams(vec![fis]),
                Session::new("s1", 1, "07:30", "09:00").with_exams(vec![mtk, bio]),
            ],
        )
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn schedule_comes_back_in_start_order() {
        let store = SqliteStore::in_memory().unwrap();
        store.import_day(GradeLevel::X, &day(date(10))).unwrap();

        let schedule = store.get_schedule_range(date(10), date(10)).unwrap();
        assert!(schedule.xi.is_empty());
        assert_eq!(schedule.x.len(), 1);

        let sessions = &schedule.x[0].sessions;
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id.as_str(), "s1");
        assert_eq!(sessions[0].exams.len(), 2);
        assert_eq!(sessions[0].exams[0].duration_minutes, 90);
        assert_eq!(sessions[1].exams[0].subject, "Fisika");
    }

    #[test]
    fn range_filters_days() {
        let store = SqliteStore::in_memory().unwrap();
        store.import_day(GradeLevel::XII, &day(date(10))).unwrap();
        store
            .import_day(
                GradeLevel::XII,
                &DaySchedule::new(
                    date(20),
                    vec![Session::new("s9", 1, "07:30", "09:00")
                        .with_exams(vec![Exam::new("e9", "Kimia", "07:30", "09:00")])],
                ),
            )
            .unwrap();

        let now = Local.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap();
        let schedule = store.get_schedule(now, 3).unwrap();
        assert_eq!(schedule.xii.len(), 1);
        assert_eq!(schedule.xii[0].date, date(10));

        let all = store.get_schedule_range(date(1), date(31)).unwrap();
        assert_eq!(all.xii.len(), 2);
    }

    #[test]
    fn status_update_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        store.import_day(GradeLevel::X, &day(date(10))).unwrap();

        store
            .update_status(&ExamId::new("e1"), ExamStatus::Active, "QWERT")
            .unwrap();

        let record = store.get_exam(&ExamId::new("e1")).unwrap().unwrap();
        assert_eq!(record.exam.status, ExamStatus::Active);
        assert_eq!(record.exam.access_token, "QWERT");
        assert_eq!(record.grade, GradeLevel::X);
        assert_eq!(record.session_id.as_str(), "s1");
        assert_eq!(record.duration_minutes, Some(90));
    }

    #[test]
    fn update_unknown_exam_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store.update_status(&ExamId::new("nope"), ExamStatus::Active, "");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn batch_finish_marks_all() {
        let store = SqliteStore::in_memory().unwrap();
        store.import_day(GradeLevel::X, &day(date(10))).unwrap();

        store
            .batch_mark_finished(&[ExamId::new("e1"), ExamId::new("e3")])
            .unwrap();

        let status = |id: &str| store.get_exam(&ExamId::new(id)).unwrap().unwrap().exam.status;
        assert_eq!(status("e1"), ExamStatus::Finished);
        assert_eq!(status("e2"), ExamStatus::Pending);
        assert_eq!(status("e3"), ExamStatus::Finished);
    }

    #[test]
    fn missing_duration_reads_as_none() {
        let store = SqliteStore::in_memory().unwrap();
        store.import_day(GradeLevel::X, &day(date(10))).unwrap();

        let record = store.get_exam(&ExamId::new("e2")).unwrap().unwrap();
        assert_eq!(record.duration_minutes, None);
        assert!(store.get_exam(&ExamId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proctord.db");

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            store.import_day(GradeLevel::XI, &day(date(10))).unwrap();
        }

        let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        assert!(store.get_exam(&ExamId::new("e3")).unwrap().is_some());
    }
}
