//! Display window resolution
//!
//! Decides which single session of a grade's day is on the dashboard at a
//! given instant:
//!
//! 1. a running session (`start <= now < end`);
//! 2. otherwise the next session, once it is within the pre-show margin;
//! 3. otherwise the most recently finished session, held until the next
//!    session's pre-show begins, or for the grace period after the last
//!    session of the day;
//! 4. otherwise nothing.

use chrono::{NaiveDate, NaiveDateTime};
use proctor_api::Session;
use proctor_config::WindowRules;
use proctor_util::{at_date, minutes_since_floor, minutes_until_ceil};
use tracing::warn;

/// Why a session is on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayReason {
    /// Inside its own start/end window
    Running,
    /// Starts within the pre-show margin
    PreShow,
    /// Finished, held until the next session's pre-show
    Lingering,
    /// Last session of the day, inside the grace period
    Grace,
}

/// Upcoming session that is close enough to count down to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub minutes_to_start: i64,
    pub session_number: u32,
}

/// Outcome of resolving one grade/day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayDecision {
    /// Position of the displayed session in the input slice
    pub index: usize,
    pub reason: DisplayReason,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub countdown: Option<Countdown>,
    pub minutes_to_window_close: i64,
    /// Number of the session that follows in start order
    pub next_session_number: Option<u32>,
}

impl DisplayDecision {
    /// Copy the decision onto the session's dashboard fields.
    pub fn apply_to(&self, session: &mut Session) {
        session.is_displayed = true;
        session.countdown_active = self.countdown.is_some();
        session.minutes_to_start = self.countdown.map(|c| c.minutes_to_start).unwrap_or(0);
        session.minutes_to_window_close = self.minutes_to_window_close;
        session.has_next_session = self.next_session_number.is_some();
        session.next_session_number = self.next_session_number.unwrap_or(0);
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    number: u32,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

/// Parse each session's window on `date`, ordered by start time.
/// Sessions with unparsable or inverted times are left out.
fn slots(date: NaiveDate, sessions: &[Session]) -> Vec<Slot> {
    let mut slots: Vec<Slot> = sessions
        .iter()
        .enumerate()
        .filter_map(|(index, s)| {
            match (at_date(date, &s.start_time), at_date(date, &s.end_time)) {
                (Some(start), Some(end)) if start < end => Some(Slot {
                    index,
                    number: s.number,
                    start,
                    end,
                }),
                _ => {
                    warn!(
                        session_id = %s.id,
                        start = %s.start_time,
                        end = %s.end_time,
                        "Session has no usable time window, leaving it out"
                    );
                    None
                }
            }
        })
        .collect();

    // Overlapping sessions resolve to the earliest start.
    slots.sort_by_key(|s| (s.start, s.number, s.index));
    slots
}

/// Select the displayed session for one grade/day.
pub fn resolve_display(
    date: NaiveDate,
    sessions: &[Session],
    now: NaiveDateTime,
    rules: &WindowRules,
) -> Option<DisplayDecision> {
    let slots = slots(date, sessions);

    let next_after = |pos: usize| slots.get(pos + 1).map(|s| s.number);
    let decision = |pos: usize, reason, countdown, close| {
        let slot = slots[pos];
        DisplayDecision {
            index: slot.index,
            reason,
            start: slot.start,
            end: slot.end,
            countdown,
            minutes_to_window_close: close,
            next_session_number: next_after(pos),
        }
    };

    if let Some(pos) = slots.iter().position(|s| s.start <= now && now < s.end) {
        return Some(decision(pos, DisplayReason::Running, None, 0));
    }

    let upcoming = slots.iter().position(|s| s.start > now).map(|pos| {
        let wait = minutes_until_ceil(now, slots[pos].start);
        let countdown = (wait <= rules.countdown_minutes).then_some(Countdown {
            minutes_to_start: wait,
            session_number: slots[pos].number,
        });
        (pos, wait, countdown)
    });

    if let Some((pos, wait, countdown)) = upcoming
        && wait <= rules.preshow_minutes
    {
        return Some(decision(pos, DisplayReason::PreShow, countdown, 0));
    }

    let finished = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.end <= now)
        .max_by_key(|(_, s)| (s.end, s.start))
        .map(|(pos, _)| pos)?;

    match upcoming {
        Some((_, wait, countdown)) => Some(decision(
            finished,
            DisplayReason::Lingering,
            countdown,
            wait - rules.preshow_minutes,
        )),
        None => {
            let since_end = minutes_since_floor(slots[finished].end, now);
            (since_end <= rules.grace_minutes).then(|| {
                decision(
                    finished,
                    DisplayReason::Grace,
                    None,
                    rules.grace_minutes - since_end,
                )
            })
        }
    }
}
