//! Schedule and snapshot types
//!
//! Field names on the wire are the dashboard's established contract and
//! keep their established spelling through `#[serde(rename)]`.

use chrono::NaiveDate;
use proctor_util::{ExamId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// School cohort tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradeLevel {
    X,
    XI,
    XII,
}

impl GradeLevel {
    pub const ALL: [GradeLevel; 3] = [GradeLevel::X, GradeLevel::XI, GradeLevel::XII];

    pub fn as_str(&self) -> &'static str {
        match self {
            GradeLevel::X => "X",
            GradeLevel::XI => "XI",
            GradeLevel::XII => "XII",
        }
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown grade level '{0}'")]
pub struct UnknownGrade(pub String);

impl FromStr for GradeLevel {
    type Err = UnknownGrade;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "X" => Ok(GradeLevel::X),
            "XI" => Ok(GradeLevel::XI),
            "XII" => Ok(GradeLevel::XII),
            other => Err(UnknownGrade(other.to_string())),
        }
    }
}

/// Exam lifecycle. Ordering follows the lifecycle so `max` never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ExamStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "selesai")]
    Finished,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamStatus::Pending => "pending",
            ExamStatus::Active => "active",
            ExamStatus::Finished => "selesai",
        }
    }

    /// Lenient parse for stored values. Unknown strings read as pending.
    pub fn from_stored(value: &str) -> Self {
        match value.trim() {
            "active" => ExamStatus::Active,
            "selesai" | "finished" => ExamStatus::Finished,
            _ => ExamStatus::Pending,
        }
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subject exam inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    #[serde(rename = "mataPelajaran")]
    pub subject: String,
    #[serde(rename = "jamMulai")]
    pub start_time: String,
    #[serde(rename = "jamSelesai")]
    pub end_time: String,
    #[serde(default)]
    pub status: ExamStatus,
    #[serde(rename = "token", default)]
    pub access_token: String,
    #[serde(rename = "ujianBerikutnyaAda", default)]
    pub has_next_exam: bool,
    #[serde(rename = "hitungMundurAktif", default)]
    pub countdown_active: bool,
    #[serde(rename = "sisaWaktuMulai", default)]
    pub minutes_remaining: i64,
    #[serde(rename = "waktuPengerjaan", default)]
    pub duration_minutes: u32,
    #[serde(rename = "isUjianSusulan", default)]
    pub is_makeup: bool,
}

impl Exam {
    /// A pending exam with no derived fields set yet.
    pub fn new(
        id: impl Into<ExamId>,
        subject: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
            status: ExamStatus::Pending,
            access_token: String::new(),
            has_next_exam: false,
            countdown_active: false,
            minutes_remaining: 0,
            duration_minutes: 0,
            is_makeup: false,
        }
    }
}

/// A numbered time slot within a day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(rename = "isSesi")]
    pub number: u32,
    #[serde(rename = "jamMulai")]
    pub start_time: String,
    #[serde(rename = "jamSelesai")]
    pub end_time: String,
    #[serde(rename = "hitungMundurSesiAktif", default)]
    pub countdown_active: bool,
    #[serde(rename = "sisaWaktuSesi", default)]
    pub minutes_to_start: i64,
    #[serde(rename = "sisaWaktuResetUjian", default)]
    pub minutes_to_window_close: i64,
    #[serde(rename = "adaSesiBerikutnya", default)]
    pub has_next_session: bool,
    #[serde(rename = "isNextSesi", default)]
    pub next_session_number: u32,
    #[serde(rename = "tampilkanUjian", default)]
    pub is_displayed: bool,
    #[serde(rename = "hasUjianSusulan", default)]
    pub has_makeup: bool,
    #[serde(rename = "ujian", default)]
    pub exams: Vec<Exam>,
}

impl Session {
    pub fn new(
        id: impl Into<SessionId>,
        number: u32,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            number,
            start_time: start_time.into(),
            end_time: end_time.into(),
            countdown_active: false,
            minutes_to_start: 0,
            minutes_to_window_close: 0,
            has_next_session: false,
            next_session_number: 0,
            is_displayed: false,
            has_makeup: false,
            exams: Vec::new(),
        }
    }

    pub fn with_exams(mut self, exams: Vec<Exam>) -> Self {
        self.exams = exams;
        self
    }
}

/// One exam day for a grade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(rename = "tanggal")]
    pub date: NaiveDate,
    #[serde(rename = "sisaHari", default)]
    pub days_remaining: i64,
    #[serde(rename = "nextUjianAda", default)]
    pub next_exam_soon: bool,
    #[serde(rename = "pelacakUjianHariAktif", default)]
    pub tracking_active_today: bool,
    #[serde(rename = "sesiUjian", default)]
    pub sessions: Vec<Session>,
}

impl DaySchedule {
    pub fn new(date: NaiveDate, sessions: Vec<Session>) -> Self {
        Self {
            date,
            days_remaining: 0,
            next_exam_soon: false,
            tracking_active_today: false,
            sessions,
        }
    }
}

/// Per-grade container used by both the schedule feed and the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct PerGrade<T> {
    #[serde(rename = "X", default)]
    pub x: Vec<T>,
    #[serde(rename = "XI", default)]
    pub xi: Vec<T>,
    #[serde(rename = "XII", default)]
    pub xii: Vec<T>,
}

impl<T> Default for PerGrade<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PerGrade<T> {
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            xi: Vec::new(),
            xii: Vec::new(),
        }
    }

    pub fn get(&self, grade: GradeLevel) -> &Vec<T> {
        match grade {
            GradeLevel::X => &self.x,
            GradeLevel::XI => &self.xi,
            GradeLevel::XII => &self.xii,
        }
    }

    pub fn get_mut(&mut self, grade: GradeLevel) -> &mut Vec<T> {
        match grade {
            GradeLevel::X => &mut self.x,
            GradeLevel::XI => &mut self.xi,
            GradeLevel::XII => &mut self.xii,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GradeLevel, &Vec<T>)> {
        GradeLevel::ALL.into_iter().map(move |g| (g, self.get(g)))
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty() && self.xi.is_empty() && self.xii.is_empty()
    }
}

/// Raw schedule as read from the repository, keyed by grade
pub type GradeSchedule = PerGrade<DaySchedule>;

/// Per-tick aggregate pushed to dashboard subscribers
pub type Snapshot = PerGrade<DaySchedule>;

impl Snapshot {
    /// Every exam id currently on the dashboard
    pub fn exam_ids(&self) -> impl Iterator<Item = &ExamId> {
        self.iter()
            .flat_map(|(_, days)| days.iter())
            .flat_map(|d| d.sessions.iter())
            .flat_map(|s| s.exams.iter())
            .map(|e| &e.id)
    }
}

/// Missed exam entry as listed for makeup scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedExam {
    pub id: ExamId,
    #[serde(rename = "pelajaran")]
    pub subject: String,
    #[serde(rename = "tingkat")]
    pub grade: GradeLevel,
}

/// Session whose display window lapsed with exams still unresolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedSession {
    #[serde(rename = "id")]
    pub session_id: SessionId,
    #[serde(rename = "sesi")]
    pub session_number: u32,
    #[serde(rename = "ujian")]
    pub exams: Vec<MissedExam>,
}

pub type MissedExams = PerGrade<MissedSession>;

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub tracking: bool,
    pub store_ok: bool,
    pub subscribers: usize,
    pub makeup_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_dashboard_spelling() {
        assert_eq!(serde_json::to_string(&ExamStatus::Finished).unwrap(), "\"selesai\"");
        assert_eq!(serde_json::to_string(&ExamStatus::Active).unwrap(), "\"active\"");
        assert!(ExamStatus::Pending < ExamStatus::Active);
        assert!(ExamStatus::Active < ExamStatus::Finished);
    }

    #[test]
    fn stored_status_parse_is_lenient() {
        assert_eq!(ExamStatus::from_stored("selesai"), ExamStatus::Finished);
        assert_eq!(ExamStatus::from_stored("active"), ExamStatus::Active);
        assert_eq!(ExamStatus::from_stored(""), ExamStatus::Pending);
    }

    #[test]
    fn snapshot_field_names() {
        let mut session = Session::new("s1", 1, "10:00", "11:00");
        session.is_displayed = true;
        session.exams.push(Exam::new("e1", "Matematika", "10:00", "11:00"));

        let mut snapshot = Snapshot::new();
        snapshot.x.push(DaySchedule::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            vec![session],
        ));

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["XI"].as_array().unwrap().is_empty());
        assert!(value["XII"].as_array().unwrap().is_empty());

        let day = &value["X"][0];
        assert_eq!(day["tanggal"], "2025-03-10");
        for key in ["sisaHari", "nextUjianAda", "pelacakUjianHariAktif", "sesiUjian"] {
            assert!(day.get(key).is_some(), "missing {key}");
        }

        let sesi = &day["sesiUjian"][0];
        for key in [
            "id",
            "isSesi",
            "jamMulai",
            "jamSelesai",
            "hitungMundurSesiAktif",
            "sisaWaktuSesi",
            "sisaWaktuResetUjian",
            "adaSesiBerikutnya",
            "isNextSesi",
            "tampilkanUjian",
            "ujian",
        ] {
            assert!(sesi.get(key).is_some(), "missing {key}");
        }

        let ujian = &sesi["ujian"][0];
        for key in [
            "id",
            "mataPelajaran",
            "jamMulai",
            "jamSelesai",
            "status",
            "token",
            "ujianBerikutnyaAda",
            "hitungMundurAktif",
            "sisaWaktuMulai",
            "waktuPengerjaan",
            "isUjianSusulan",
        ] {
            assert!(ujian.get(key).is_some(), "missing {key}");
        }
        assert_eq!(ujian["status"], "pending");
    }

    #[test]
    fn snapshot_decodes_with_absent_grades() {
        let mut snapshot = Snapshot::new();
        snapshot.xii.push(DaySchedule::new(
            NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(),
            vec![Session::new("s1", 1, "07:30", "09:00")
                .with_exams(vec![Exam::new("e1", "Kimia", "07:30", "09:00")])],
        ));

        let mut value = serde_json::to_value(&snapshot).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("X");
        object.remove("XI");

        let decoded: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, snapshot);

        let missed: MissedExams = serde_json::from_str(r#"{"XI": []}"#).unwrap();
        assert!(missed.is_empty());
    }

    #[test]
    fn missed_exam_field_names() {
        let mut missed = MissedExams::new();
        missed.xi.push(MissedSession {
            session_id: SessionId::new("s2"),
            session_number: 2,
            exams: vec![MissedExam {
                id: ExamId::new("e9"),
                subject: "Biologi".into(),
                grade: GradeLevel::XI,
            }],
        });

        let value = serde_json::to_value(&missed).unwrap();
        let entry = &value["XI"][0];
        assert_eq!(entry["id"], "s2");
        assert_eq!(entry["sesi"], 2);
        assert_eq!(entry["ujian"][0]["pelajaran"], "Biologi");
        assert_eq!(entry["ujian"][0]["tingkat"], "XI");
    }

    #[test]
    fn grade_parse() {
        assert_eq!("XII".parse::<GradeLevel>().unwrap(), GradeLevel::XII);
        assert!("XIII".parse::<GradeLevel>().is_err());
    }
}
