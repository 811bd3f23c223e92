//! Tracking engine

use chrono::{DateTime, Days, Local, NaiveDateTime};
use proctor_api::{DaySchedule, Exam, ExamStatus, GradeLevel, MissedExams, Session, Snapshot};
use proctor_config::TrackingConfig;
use proctor_store::{ExamStatusStore, ScheduleRepository};
use proctor_util::{at_date, minutes_until_ceil, ExamId, SessionId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::{
    advance_regular, find_missed_exams, link_exams, merge_makeups, resolve_display,
    DisplayDecision, ExamWindow, MakeupExamEntry, MakeupOverlay, TrackError, TrackResult,
};

/// Recomputes the dashboard snapshot from the schedule, the clock and the
/// makeup overlay.
pub struct TrackingEngine {
    schedule: Arc<dyn ScheduleRepository>,
    store: Arc<dyn ExamStatusStore>,
    config: TrackingConfig,
    overlay: MakeupOverlay,
    /// Expired makeup exams whose finished status has not reached the store
    pending_finish: Mutex<Vec<ExamId>>,
    latest: RwLock<Option<Snapshot>>,
}

impl TrackingEngine {
    pub fn new(
        schedule: Arc<dyn ScheduleRepository>,
        store: Arc<dyn ExamStatusStore>,
        config: TrackingConfig,
    ) -> Self {
        info!(
            lookahead_days = config.lookahead_days,
            preshow_minutes = config.rules.preshow_minutes,
            grace_minutes = config.rules.grace_minutes,
            "Tracking engine initialized"
        );

        Self {
            schedule,
            store,
            config,
            overlay: MakeupOverlay::new(),
            pending_finish: Mutex::new(Vec::new()),
            latest: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Run one recomputation at `now`.
    ///
    /// A repository failure aborts the tick and leaves the previous snapshot
    /// in place. Status writes that fail are logged and retried next tick.
    pub fn tick(&self, now: DateTime<Local>) -> TrackResult<Snapshot> {
        self.finish_expired(now)?;

        let mut schedule = self.schedule.get_schedule(now, self.config.lookahead_days)?;

        let mut snapshot = Snapshot::new();
        for grade in GradeLevel::ALL {
            let days = std::mem::take(schedule.get_mut(grade));
            let makeups = self.overlay.entries_for(grade)?;
            *snapshot.get_mut(grade) = self.build_grade(grade, days, &makeups, now);
        }

        trace!(
            x = snapshot.x.len(),
            xi = snapshot.xi.len(),
            xii = snapshot.xii.len(),
            "Tick complete"
        );

        *self.latest.write().map_err(|_| TrackError::LockPoisoned)? = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Purge expired makeup exams and mark them finished in one batch. A
    /// failed batch stays queued for the next tick.
    fn finish_expired(&self, now: DateTime<Local>) -> TrackResult<()> {
        let mut finishing = self
            .pending_finish
            .lock()
            .map_err(|_| TrackError::LockPoisoned)?;
        finishing.extend(self.overlay.purge_expired(now)?);
        if finishing.is_empty() {
            return Ok(());
        }

        match self.store.batch_mark_finished(&finishing) {
            Ok(()) => {
                info!(count = finishing.len(), "Expired makeup exams marked finished");
                finishing.clear();
            }
            Err(e) => warn!(
                count = finishing.len(),
                error = %e,
                "Failed to mark expired makeup exams finished, retrying next tick"
            ),
        }
        Ok(())
    }

    fn build_grade(
        &self,
        grade: GradeLevel,
        mut days: Vec<DaySchedule>,
        makeups: &[MakeupExamEntry],
        now: DateTime<Local>,
    ) -> Vec<DaySchedule> {
        let today = now.date_naive();
        let lookahead = self.config.lookahead_days;

        days.sort_by_key(|d| d.date);
        let banner = days.iter().position(|d| {
            let ahead = (d.date - today).num_days();
            (1..=lookahead).contains(&ahead)
        });

        let mut out = Vec::new();
        let mut saw_today = false;
        for (pos, mut day) in days.into_iter().enumerate() {
            day.days_remaining = (day.date - today).num_days().max(0);
            day.next_exam_soon = day.days_remaining <= lookahead;
            day.tracking_active_today = banner == Some(pos);

            if day.date == today && !saw_today {
                saw_today = true;
                self.track_today(grade, &mut day, makeups, now);
                if !day.sessions.is_empty() {
                    out.push(day);
                }
            } else {
                day.sessions.clear();
                if day.tracking_active_today {
                    out.push(day);
                }
            }
        }

        if !saw_today && !makeups.is_empty() {
            let mut day = DaySchedule::new(today, Vec::new());
            day.next_exam_soon = true;
            self.track_today(grade, &mut day, makeups, now);
            out.insert(0, day);
        }

        out
    }

    /// Reduce today's sessions to the displayed one plus makeup sessions.
    fn track_today(
        &self,
        grade: GradeLevel,
        day: &mut DaySchedule,
        makeups: &[MakeupExamEntry],
        now: DateTime<Local>,
    ) {
        let makeup_ids: HashSet<&ExamId> = makeups.iter().map(|m| &m.exam.id).collect();
        let mut shown = Vec::new();

        if let Some(decision) =
            resolve_display(day.date, &day.sessions, now.naive_local(), &self.config.rules)
        {
            let mut session = day.sessions.swap_remove(decision.index);
            decision.apply_to(&mut session);
            // A re-opened exam is shown only through its makeup entry
            session.exams.retain(|e| !makeup_ids.contains(&e.id));
            self.advance_exams(grade, &mut session, &decision, now.naive_local());
            debug!(
                grade = %grade,
                session_id = %session.id,
                reason = ?decision.reason,
                "Session displayed"
            );
            shown.push(session);
        }

        merge_makeups(
            grade,
            &mut shown,
            makeups,
            now,
            self.config.virtual_session_minutes,
            self.config.rules.countdown_minutes,
        );
        day.sessions = shown;
    }

    fn advance_exams(
        &self,
        grade: GradeLevel,
        session: &mut Session,
        decision: &DisplayDecision,
        now: NaiveDateTime,
    ) {
        let date = decision.start.date();
        let session_window = ExamWindow {
            start: decision.start,
            end: decision.end,
        };

        for exam in &mut session.exams {
            let window = ExamWindow::for_exam(date, exam, session_window);
            let Some(change) = advance_regular(exam, window, now, self.config.rules.countdown_minutes)
            else {
                continue;
            };

            info!(
                grade = %grade,
                exam_id = %change.exam_id,
                from = %change.from,
                to = %change.to,
                "Exam status changed"
            );
            if let Err(e) = self.store.update_status(&change.exam_id, change.to, &change.token) {
                warn!(exam_id = %change.exam_id, error = %e, "Failed to persist exam status");
            }
        }

        link_exams(&mut session.exams);
    }

    /// Re-open an exam as a makeup exam running from `now`.
    pub fn add_makeup_exam(
        &self,
        grade: GradeLevel,
        exam: Exam,
        duration_minutes: u32,
        target_session_id: SessionId,
        now: DateTime<Local>,
    ) -> TrackResult<MakeupExamEntry> {
        let entry = self
            .overlay
            .add(grade, exam, duration_minutes, target_session_id, now)?;
        self.pending_finish
            .lock()
            .map_err(|_| TrackError::LockPoisoned)?
            .retain(|id| *id != entry.exam.id);

        if let Err(e) =
            self.store
                .update_status(&entry.exam.id, entry.exam.status, &entry.exam.access_token)
        {
            warn!(exam_id = %entry.exam.id, error = %e, "Failed to persist makeup exam status");
        }

        info!(
            grade = %grade,
            exam_id = %entry.exam.id,
            target = %entry.target_session_id,
            expires_at = %entry.expires_at,
            "Makeup exam added"
        );

        Ok(entry)
    }

    /// Whether `grade` has a pending scheduled exam starting within the
    /// pre-show margin today.
    pub fn regular_exam_starting_soon(
        &self,
        grade: GradeLevel,
        now: DateTime<Local>,
    ) -> TrackResult<bool> {
        let today = now.date_naive();
        let now = now.naive_local();
        let schedule = self.schedule.get_schedule_range(today, today)?;
        let preshow = self.config.rules.preshow_minutes;

        let soon = schedule
            .get(grade)
            .iter()
            .flat_map(|day| day.sessions.iter().map(move |s| (day.date, s)))
            .filter_map(|(date, session)| {
                let start = at_date(date, &session.start_time)?;
                let end = at_date(date, &session.end_time)?;
                (start < end).then_some((date, session, ExamWindow { start, end }))
            })
            .flat_map(|(date, session, window)| {
                session
                    .exams
                    .iter()
                    .map(move |e| (e, ExamWindow::for_exam(date, e, window)))
            })
            .any(|(exam, window)| {
                !exam.is_makeup
                    && exam.status == ExamStatus::Pending
                    && window.start > now
                    && minutes_until_ceil(now, window.start) <= preshow
            });

        Ok(soon)
    }

    /// Exams whose window lapsed during the lookback period and that are
    /// neither on the dashboard nor already re-opened.
    pub fn get_missed_exams(&self, now: DateTime<Local>) -> TrackResult<MissedExams> {
        let today = now.date_naive();
        let back = u64::try_from(self.config.missed_lookback_days).unwrap_or(0);
        let from = today.checked_sub_days(Days::new(back)).unwrap_or(today);
        let schedule = self.schedule.get_schedule_range(from, today)?;

        let mut exclude = self.overlay.exam_ids()?;
        if let Some(latest) = self
            .latest
            .read()
            .map_err(|_| TrackError::LockPoisoned)?
            .as_ref()
        {
            exclude.extend(latest.exam_ids().cloned());
        }

        Ok(find_missed_exams(
            &schedule,
            now.naive_local(),
            &self.config.rules,
            &exclude,
        ))
    }

    /// Snapshot from the most recent successful tick
    pub fn latest_snapshot(&self) -> TrackResult<Option<Snapshot>> {
        Ok(self
            .latest
            .read()
            .map_err(|_| TrackError::LockPoisoned)?
            .clone())
    }

    pub fn makeup_count(&self) -> TrackResult<usize> {
        self.overlay.len()
    }

    pub fn store_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use proctor_api::GradeSchedule;
    use proctor_store::{ExamRecord, StoreError, StoreResult};
    use std::sync::Mutex;

    /// In-memory schedule that records every store call
    #[derive(Default)]
    struct FakeStore {
        schedule: Mutex<GradeSchedule>,
        updates: Mutex<Vec<(ExamId, ExamStatus, String)>>,
        batches: Mutex<Vec<Vec<ExamId>>>,
        rejected_updates: Mutex<Vec<(ExamId, ExamStatus, String)>>,
        fail_reads: Mutex<bool>,
        fail_updates: Mutex<u32>,
        fail_batches: Mutex<u32>,
    }

    /// Consume one scheduled failure, if any are left.
    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut left = counter.lock().unwrap();
        if *left == 0 {
            return false;
        }
        *left -= 1;
        true
    }

    impl FakeStore {
        fn with_day(grade: GradeLevel, day: DaySchedule) -> Arc<Self> {
            let store = Self::default();
            store.schedule.lock().unwrap().get_mut(grade).push(day);
            Arc::new(store)
        }
    }

    impl ScheduleRepository for FakeStore {
        fn get_schedule_range(
            &self,
            from: NaiveDate,
            to: NaiveDate,
        ) -> StoreResult<GradeSchedule> {
            if *self.fail_reads.lock().unwrap() {
                return Err(StoreError::Database("unavailable".into()));
            }
            let updates = self.updates.lock().unwrap();
            let mut out = GradeSchedule::new();
            for (grade, days) in self.schedule.lock().unwrap().iter() {
                for day in days.iter().filter(|d| d.date >= from && d.date <= to) {
                    let mut day = day.clone();
                    for exam in day.sessions.iter_mut().flat_map(|s| s.exams.iter_mut()) {
                        if let Some((_, status, token)) =
                            updates.iter().rev().find(|(id, _, _)| *id == exam.id)
                        {
                            exam.status = *status;
                            exam.access_token = token.clone();
                        }
                    }
                    out.get_mut(grade).push(day);
                }
            }
            Ok(out)
        }
    }

    impl ExamStatusStore for FakeStore {
        fn update_status(&self, exam_id: &ExamId, status: ExamStatus, token: &str) -> StoreResult<()> {
            if take_failure(&self.fail_updates) {
                self.rejected_updates
                    .lock()
                    .unwrap()
                    .push((exam_id.clone(), status, token.to_string()));
                return Err(StoreError::Database("database is locked".into()));
            }
            self.updates
                .lock()
                .unwrap()
                .push((exam_id.clone(), status, token.to_string()));
            Ok(())
        }

        fn batch_mark_finished(&self, exam_ids: &[ExamId]) -> StoreResult<()> {
            if take_failure(&self.fail_batches) {
                return Err(StoreError::Database("database is locked".into()));
            }
            self.batches.lock().unwrap().push(exam_ids.to_vec());
            Ok(())
        }

        fn get_exam(&self, _exam_id: &ExamId) -> StoreResult<Option<ExamRecord>> {
            Ok(None)
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn engine(store: &Arc<FakeStore>) -> TrackingEngine {
        TrackingEngine::new(store.clone(), store.clone(), TrackingConfig::default())
    }

    fn three_sessions() -> DaySchedule {
        DaySchedule::new(
            today(),
            vec![
                Session::new("s1", 1, "07:30", "09:00")
                    .with_exams(vec![Exam::new("e1", "Matematika", "07:30", "09:00")]),
                Session::new("s2", 2, "10:00", "11:00").with_exams(vec![
                    Exam::new("e2", "Fisika", "10:00", "10:30"),
                    Exam::new("e3", "Kimia", "10:30", "11:00"),
                ]),
                Session::new("s3", 3, "12:30", "14:00")
                    .with_exams(vec![Exam::new("e4", "Biologi", "12:30", "14:00")]),
            ],
        )
    }

    #[test]
    fn only_displayed_session_is_published() {
        let store = FakeStore::with_day(GradeLevel::XI, three_sessions());
        let snapshot = engine(&store).tick(at(10, 15)).unwrap();

        assert_eq!(snapshot.xi.len(), 1);
        let day = &snapshot.xi[0];
        assert_eq!(day.days_remaining, 0);
        assert_eq!(day.sessions.len(), 1);

        let session = &day.sessions[0];
        assert_eq!(session.id.as_str(), "s2");
        assert!(session.is_displayed);
        assert_eq!(session.next_session_number, 3);
        assert_eq!(session.exams[0].status, ExamStatus::Active);
        assert_eq!(session.exams[1].status, ExamStatus::Pending);
        assert_eq!(session.exams[1].minutes_remaining, 15);
        assert!(session.exams[1].countdown_active);
        assert!(session.exams[0].has_next_exam);
        assert!(snapshot.x.is_empty());
    }

    #[test]
    fn transition_is_persisted_once() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        let engine = engine(&store);

        engine.tick(at(10, 0)).unwrap();
        engine.tick(at(10, 0) + Duration::seconds(1)).unwrap();
        engine.tick(at(10, 1)).unwrap();

        let updates = store.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, ExamId::new("e2"));
        assert_eq!(updates[0].1, ExamStatus::Active);
        assert_eq!(updates[0].2.len(), crate::TOKEN_LENGTH);
    }

    #[test]
    fn failed_status_write_is_retried_next_tick() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        *store.fail_updates.lock().unwrap() = 1;
        let engine = engine(&store);

        engine.tick(at(10, 0)).unwrap();
        assert_eq!(store.rejected_updates.lock().unwrap().len(), 1);
        assert!(store.updates.lock().unwrap().is_empty());

        let snapshot = engine.tick(at(10, 0) + Duration::seconds(1)).unwrap();
        let updates = store.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let (id, status, token) = &updates[0];
        assert_eq!(id.as_str(), "e2");
        assert_eq!(*status, ExamStatus::Active);
        assert_eq!(token.len(), crate::TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_uppercase()));
        assert_eq!(&snapshot.x[0].sessions[0].exams[0].access_token, token);
    }

    #[test]
    fn nothing_published_outside_any_window() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        let snapshot = engine(&store).tick(at(6, 0)).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn upcoming_day_banner() {
        let store = FakeStore::with_day(
            GradeLevel::XII,
            DaySchedule::new(today() + Duration::days(2), three_sessions().sessions),
        );
        store
            .schedule
            .lock()
            .unwrap()
            .xii
            .push(DaySchedule::new(today() + Duration::days(3), three_sessions().sessions));

        let snapshot = engine(&store).tick(at(8, 0)).unwrap();
        assert_eq!(snapshot.xii.len(), 1);
        let day = &snapshot.xii[0];
        assert_eq!(day.days_remaining, 2);
        assert!(day.next_exam_soon);
        assert!(day.tracking_active_today);
        assert!(day.sessions.is_empty());
    }

    #[test]
    fn repository_failure_keeps_previous_snapshot() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        let engine = engine(&store);

        let first = engine.tick(at(10, 15)).unwrap();
        *store.fail_reads.lock().unwrap() = true;

        assert!(matches!(engine.tick(at(10, 16)), Err(TrackError::Store(_))));
        assert_eq!(engine.latest_snapshot().unwrap(), Some(first));
    }

    #[test]
    fn makeup_expires_with_one_batch_write() {
        let store = Arc::new(FakeStore::default());
        let engine = engine(&store);

        for id in ["m1", "m2"] {
            engine
                .add_makeup_exam(
                    GradeLevel::X,
                    Exam::new(id, "Sejarah", "07:30", "09:00"),
                    30,
                    SessionId::new("s1"),
                    at(13, 0),
                )
                .unwrap();
        }

        let live = engine.tick(at(13, 10)).unwrap();
        assert_eq!(live.x.len(), 1);
        assert_eq!(live.x[0].date, today());
        assert_eq!(live.x[0].sessions[0].id.as_str(), "susulan_gabungan_X_s1");

        let done = engine.tick(at(13, 31)).unwrap();
        assert!(done.x.is_empty());
        engine.tick(at(13, 32)).unwrap();

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(engine.makeup_count().unwrap(), 0);
    }

    #[test]
    fn failed_expiry_write_is_retried() {
        let store = Arc::new(FakeStore::default());
        *store.fail_batches.lock().unwrap() = 1;
        let engine = engine(&store);

        engine
            .add_makeup_exam(
                GradeLevel::X,
                Exam::new("m1", "Sejarah", "07:30", "09:00"),
                30,
                SessionId::new("s1"),
                at(13, 0),
            )
            .unwrap();

        engine.tick(at(13, 31)).unwrap();
        assert!(store.batches.lock().unwrap().is_empty());
        assert_eq!(engine.makeup_count().unwrap(), 0);

        engine.tick(at(13, 32)).unwrap();
        engine.tick(at(13, 33)).unwrap();
        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.as_slice(), &[vec![ExamId::new("m1")]]);
    }

    #[test]
    fn duplicate_makeup_is_an_error() {
        let store = Arc::new(FakeStore::default());
        let engine = engine(&store);
        let exam = Exam::new("m1", "Sejarah", "07:30", "09:00");

        engine
            .add_makeup_exam(GradeLevel::X, exam.clone(), 30, SessionId::new("s1"), at(13, 0))
            .unwrap();
        let err = engine
            .add_makeup_exam(GradeLevel::X, exam, 30, SessionId::new("s1"), at(13, 1))
            .unwrap_err();
        assert!(matches!(err, TrackError::DuplicateEntry { .. }));
        assert_eq!(engine.makeup_count().unwrap(), 1);
    }

    #[test]
    fn makeup_joins_displayed_session_without_regular_write() {
        let store = FakeStore::with_day(GradeLevel::XI, three_sessions());
        let engine = engine(&store);

        // e1 belongs to s1, re-opened into the running s2
        engine
            .add_makeup_exam(
                GradeLevel::XI,
                Exam::new("e1", "Matematika", "07:30", "09:00"),
                45,
                SessionId::new("s2"),
                at(10, 5),
            )
            .unwrap();

        let snapshot = engine.tick(at(10, 10)).unwrap();
        let session = &snapshot.xi[0].sessions[0];
        assert_eq!(session.id.as_str(), "s2");
        assert!(session.has_makeup);
        assert_eq!(session.exams.len(), 3);
        assert!(session.exams[2].is_makeup);
        assert_eq!(session.exams[2].id.as_str(), "e1");
    }

    #[test]
    fn makeup_for_other_session_replaces_scheduled_copy() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        let engine = engine(&store);

        // e2 belongs to the running s2 but is re-opened under s1
        engine
            .add_makeup_exam(
                GradeLevel::X,
                Exam::new("e2", "Fisika", "10:00", "10:30"),
                120,
                SessionId::new("s1"),
                at(10, 15),
            )
            .unwrap();

        for now in [at(10, 16), at(11, 30)] {
            let snapshot = engine.tick(now).unwrap();
            let placements: Vec<(&str, ExamStatus)> = snapshot.x[0]
                .sessions
                .iter()
                .flat_map(|s| s.exams.iter().map(move |e| (s, e)))
                .filter(|(_, e)| e.id.as_str() == "e2")
                .map(|(s, e)| (s.id.as_str(), e.status))
                .collect();
            assert_eq!(placements, vec![("susulan_gabungan_X_s1", ExamStatus::Active)]);
        }

        // Only the makeup add wrote e2; the regular window never touched it
        let e2_writes = store
            .updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id.as_str() == "e2")
            .count();
        assert_eq!(e2_writes, 1);
    }

    #[test]
    fn guard_sees_exam_about_to_start() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        let engine = engine(&store);

        assert!(engine.regular_exam_starting_soon(GradeLevel::X, at(9, 57)).unwrap());
        assert!(!engine.regular_exam_starting_soon(GradeLevel::X, at(9, 30)).unwrap());
        assert!(!engine.regular_exam_starting_soon(GradeLevel::XI, at(9, 57)).unwrap());
    }

    #[test]
    fn missed_exams_exclude_displayed() {
        let store = FakeStore::with_day(GradeLevel::X, three_sessions());
        let engine = engine(&store);

        engine.tick(at(10, 15)).unwrap();
        let missed = engine.get_missed_exams(at(10, 15)).unwrap();

        let ids: Vec<&str> = missed
            .x
            .iter()
            .flat_map(|s| s.exams.iter())
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["e1"]);
    }
}
