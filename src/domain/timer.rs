use crate::domain::models::{PomodoroSettings, TimerMode, TimerStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Completion events fired by [`TimerSession::tick`]. Each zero-crossing
/// fires exactly once; subsequent ticks on a finished timer are no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    CountdownFinished,
    WorkSessionFinished { long_break: bool, break_seconds: u32 },
    BreakFinished { next_session: u32, work_seconds: u32 },
}

/// Pomodoro counters layered on top of a session in pomodoro mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroCycle {
    /// 1-based index of the work session in progress or completed.
    pub current_session: u32,
    pub is_break: bool,
    /// Lifetime counter; never decreases within a process.
    pub total_completed_sessions: u32,
}

impl Default for PomodoroCycle {
    fn default() -> Self {
        Self {
            current_session: 1,
            is_break: false,
            total_completed_sessions: 0,
        }
    }
}

/// The currently running or paused timer.
///
/// `started_at` holds the effective start of the current running window:
/// elapsed time after a reload is recomputed by diffing it against the wall
/// clock, never by trusting an accumulated tick count (ticks can be missed
/// while the process is suspended).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub mode: TimerMode,
    pub status: TimerStatus,
    pub elapsed_seconds: u32,
    pub remaining_seconds: u32,
    pub target_seconds: u32,
    /// Server-side active-timer id; present only after an acknowledged start.
    pub active_server_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for TimerSession {
    fn default() -> Self {
        Self::stopped(TimerMode::Stopwatch, &PomodoroSettings::default())
    }
}

impl TimerSession {
    pub fn stopped(mode: TimerMode, settings: &PomodoroSettings) -> Self {
        let target_seconds = match mode {
            TimerMode::Stopwatch | TimerMode::Countdown => 0,
            TimerMode::Pomodoro => settings.work_seconds(),
        };
        Self {
            mode,
            status: TimerStatus::Stopped,
            elapsed_seconds: 0,
            remaining_seconds: target_seconds,
            target_seconds,
            active_server_id: None,
            started_at: None,
        }
    }

    /// True while the active phase counts up (stopwatch, pomodoro work).
    pub fn counts_up(&self, cycle: &PomodoroCycle) -> bool {
        match self.mode {
            TimerMode::Stopwatch => true,
            TimerMode::Countdown => false,
            TimerMode::Pomodoro => !cycle.is_break,
        }
    }

    /// Configures the countdown duration. Only permitted while stopped.
    pub fn set_countdown_target(&mut self, seconds: u32) -> Result<(), String> {
        if self.mode != TimerMode::Countdown {
            return Err("countdown duration only applies in countdown mode".to_string());
        }
        if self.status != TimerStatus::Stopped {
            return Err("stop the timer before changing its duration".to_string());
        }
        if seconds == 0 {
            return Err("countdown duration must be > 0".to_string());
        }
        self.target_seconds = seconds;
        self.remaining_seconds = seconds;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status != TimerStatus::Stopped {
            return Err("timer is already running or paused".to_string());
        }
        match self.mode {
            TimerMode::Stopwatch => {
                self.elapsed_seconds = 0;
                self.remaining_seconds = 0;
            }
            TimerMode::Countdown => {
                if self.target_seconds == 0 {
                    return Err("countdown duration must be set before starting".to_string());
                }
                self.remaining_seconds = self.target_seconds;
                self.elapsed_seconds = 0;
            }
            TimerMode::Pomodoro => {
                if self.target_seconds == 0 {
                    return Err("pomodoro duration must be > 0".to_string());
                }
                self.elapsed_seconds = 0;
                self.remaining_seconds = self.target_seconds;
            }
        }
        self.status = TimerStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), String> {
        if self.status != TimerStatus::Running {
            return Err("only a running timer can be paused".to_string());
        }
        self.status = TimerStatus::Paused;
        Ok(())
    }

    /// Resumes ticking from the frozen value. The effective start is rebased
    /// to `now - elapsed` so wall-clock recomputation stays correct without
    /// tracking cumulative paused duration.
    pub fn resume(&mut self, cycle: &PomodoroCycle, now: DateTime<Utc>) -> Result<(), String> {
        if self.status != TimerStatus::Paused {
            return Err("only a paused timer can be resumed".to_string());
        }
        let consumed = if self.counts_up(cycle) {
            self.elapsed_seconds
        } else {
            self.target_seconds.saturating_sub(self.remaining_seconds)
        };
        self.started_at = Some(now - Duration::seconds(i64::from(consumed)));
        self.status = TimerStatus::Running;
        Ok(())
    }

    /// Returns to `Stopped` with counters at their defaults for the current
    /// mode. Clears the server correlation and the break/session position;
    /// the lifetime completed-sessions counter is preserved.
    pub fn reset(&mut self, cycle: &mut PomodoroCycle, settings: &PomodoroSettings) {
        self.status = TimerStatus::Stopped;
        self.active_server_id = None;
        self.started_at = None;
        self.elapsed_seconds = 0;
        cycle.current_session = 1;
        cycle.is_break = false;
        match self.mode {
            TimerMode::Stopwatch => {
                self.remaining_seconds = 0;
            }
            TimerMode::Countdown => {
                self.remaining_seconds = self.target_seconds;
            }
            TimerMode::Pomodoro => {
                self.target_seconds = settings.work_seconds();
                self.remaining_seconds = self.target_seconds;
            }
        }
    }

    /// Mode switches are only permitted while stopped; an in-flight
    /// server-side timer cannot be silently abandoned.
    pub fn switch_mode(
        &mut self,
        mode: TimerMode,
        cycle: &mut PomodoroCycle,
        settings: &PomodoroSettings,
    ) -> Result<(), String> {
        if self.status != TimerStatus::Stopped {
            return Err("stop the current timer before switching modes".to_string());
        }
        let total_completed = cycle.total_completed_sessions;
        *cycle = PomodoroCycle {
            total_completed_sessions: total_completed,
            ..PomodoroCycle::default()
        };
        *self = Self::stopped(mode, settings);
        Ok(())
    }

    /// Advances the timer by one second. No-op unless running, so a tick
    /// that lands after a stop has cleared the session does nothing.
    pub fn tick(
        &mut self,
        cycle: &mut PomodoroCycle,
        settings: &PomodoroSettings,
        now: DateTime<Utc>,
    ) -> Option<TimerEvent> {
        if self.status != TimerStatus::Running {
            return None;
        }

        if self.counts_up(cycle) {
            self.elapsed_seconds += 1;
            self.remaining_seconds = self.target_seconds.saturating_sub(self.elapsed_seconds);
            if self.mode == TimerMode::Pomodoro && self.elapsed_seconds >= settings.work_seconds() {
                return Some(self.finish_work_session(cycle, settings, now));
            }
            return None;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds > 0 {
            return None;
        }

        match self.mode {
            TimerMode::Countdown => {
                self.status = TimerStatus::Stopped;
                self.started_at = None;
                self.active_server_id = None;
                Some(TimerEvent::CountdownFinished)
            }
            TimerMode::Pomodoro => Some(self.finish_break(cycle, settings)),
            TimerMode::Stopwatch => None,
        }
    }

    fn finish_work_session(
        &mut self,
        cycle: &mut PomodoroCycle,
        settings: &PomodoroSettings,
        now: DateTime<Utc>,
    ) -> TimerEvent {
        cycle.total_completed_sessions += 1;
        let long_break = cycle.current_session % settings.sessions_until_long_break == 0;
        let break_seconds = if long_break {
            settings.long_break_seconds()
        } else {
            settings.short_break_seconds()
        };
        cycle.is_break = true;
        self.elapsed_seconds = 0;
        self.target_seconds = break_seconds;
        self.remaining_seconds = break_seconds;
        self.started_at = Some(now);
        TimerEvent::WorkSessionFinished {
            long_break,
            break_seconds,
        }
    }

    /// Break hand-off lands in `Paused`: the next work session requires an
    /// explicit resume so it never starts behind the user's back.
    fn finish_break(&mut self, cycle: &mut PomodoroCycle, settings: &PomodoroSettings) -> TimerEvent {
        cycle.current_session += 1;
        cycle.is_break = false;
        let work_seconds = settings.work_seconds();
        self.elapsed_seconds = 0;
        self.target_seconds = work_seconds;
        self.remaining_seconds = work_seconds;
        self.status = TimerStatus::Paused;
        self.started_at = None;
        TimerEvent::BreakFinished {
            next_session: cycle.current_session,
            work_seconds,
        }
    }

    /// Reconciles a rehydrated running session against the wall clock. A
    /// countdown that ran out while the process was away lands in `Stopped`;
    /// an expired break advances to the next paused work session.
    pub fn rehydrate(
        &mut self,
        cycle: &mut PomodoroCycle,
        settings: &PomodoroSettings,
        now: DateTime<Utc>,
    ) {
        if self.status != TimerStatus::Running {
            return;
        }
        let Some(started_at) = self.started_at else {
            // Running without an anchor is unrecoverable; freeze instead of guessing.
            self.status = TimerStatus::Paused;
            return;
        };
        let gap = (now - started_at).num_seconds().max(0);
        let gap = u32::try_from(gap).unwrap_or(u32::MAX);

        if self.counts_up(cycle) {
            self.elapsed_seconds = gap;
            if self.mode == TimerMode::Pomodoro {
                // Clamp at the work target; the next tick fires the hand-off.
                self.elapsed_seconds = self.elapsed_seconds.min(settings.work_seconds());
            }
            self.remaining_seconds = self.target_seconds.saturating_sub(self.elapsed_seconds);
            return;
        }

        self.remaining_seconds = self.target_seconds.saturating_sub(gap);
        if self.remaining_seconds > 0 {
            return;
        }
        match self.mode {
            TimerMode::Countdown => {
                self.status = TimerStatus::Stopped;
                self.started_at = None;
                self.active_server_id = None;
            }
            TimerMode::Pomodoro => {
                let _ = self.finish_break(cycle, settings);
            }
            TimerMode::Stopwatch => {}
        }
    }

    /// Sanity checks applied when loading persisted state; failures fall
    /// back to defaults rather than surfacing to the caller.
    pub fn validate(&self) -> Result<(), String> {
        if self.target_seconds > 0 && self.remaining_seconds > self.target_seconds {
            return Err("timer.remaining_seconds must be <= timer.target_seconds".to_string());
        }
        if self.status == TimerStatus::Running && self.started_at.is_none() {
            return Err("a running timer must record its start time".to_string());
        }
        if self.mode == TimerMode::Countdown
            && self.status != TimerStatus::Stopped
            && self.target_seconds == 0
        {
            return Err("an active countdown must have a duration".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn settings() -> PomodoroSettings {
        PomodoroSettings::default()
    }

    fn start_of_test() -> DateTime<Utc> {
        fixed_time("2026-03-02T09:00:00Z")
    }

    fn run_ticks(
        session: &mut TimerSession,
        cycle: &mut PomodoroCycle,
        count: u32,
        from: DateTime<Utc>,
    ) -> Vec<TimerEvent> {
        let settings = settings();
        (1..=count)
            .filter_map(|offset| {
                session.tick(cycle, &settings, from + Duration::seconds(i64::from(offset)))
            })
            .collect()
    }

    #[test]
    fn stopwatch_counts_sixty_five_ticks() {
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
        let mut cycle = PomodoroCycle::default();
        session.start(start_of_test()).expect("start");
        assert_eq!(session.status, TimerStatus::Running);
        assert_eq!(session.elapsed_seconds, 0);

        let events = run_ticks(&mut session, &mut cycle, 65, start_of_test());
        assert!(events.is_empty());
        assert_eq!(session.elapsed_seconds, 65);
        assert_eq!(session.status, TimerStatus::Running);
    }

    #[test]
    fn pause_and_resume_do_not_double_count() {
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
        let mut cycle = PomodoroCycle::default();
        let start = start_of_test();
        session.start(start).expect("start");

        run_ticks(&mut session, &mut cycle, 10, start);
        session.pause().expect("pause");

        // Ticks while paused are no-ops.
        run_ticks(&mut session, &mut cycle, 30, start + Duration::seconds(10));
        assert_eq!(session.elapsed_seconds, 10);

        let resumed_at = start + Duration::seconds(600);
        session.resume(&cycle, resumed_at).expect("resume");
        assert_eq!(
            session.started_at,
            Some(resumed_at - Duration::seconds(10)),
            "effective start carries forward already-elapsed time"
        );

        run_ticks(&mut session, &mut cycle, 5, resumed_at);
        assert_eq!(session.elapsed_seconds, 15);
    }

    #[test]
    fn countdown_fires_completion_exactly_once() {
        let mut session = TimerSession::stopped(TimerMode::Countdown, &settings());
        let mut cycle = PomodoroCycle::default();
        session.set_countdown_target(300).expect("set target");
        session.start(start_of_test()).expect("start");

        let events = run_ticks(&mut session, &mut cycle, 310, start_of_test());
        assert_eq!(events, vec![TimerEvent::CountdownFinished]);
        assert_eq!(session.status, TimerStatus::Stopped);
        assert_eq!(session.remaining_seconds, 0);
    }

    #[test]
    fn countdown_start_requires_configured_duration() {
        let mut session = TimerSession::stopped(TimerMode::Countdown, &settings());
        assert!(session.start(start_of_test()).is_err());
    }

    #[test]
    fn fourth_work_session_earns_a_long_break() {
        let mut session = TimerSession::stopped(TimerMode::Pomodoro, &settings());
        let mut cycle = PomodoroCycle {
            current_session: 4,
            is_break: false,
            total_completed_sessions: 3,
        };
        session.start(start_of_test()).expect("start");
        session.elapsed_seconds = settings().work_seconds() - 1;

        let now = start_of_test() + Duration::seconds(1500);
        let event = session.tick(&mut cycle, &settings(), now).expect("event");
        assert_eq!(
            event,
            TimerEvent::WorkSessionFinished {
                long_break: true,
                break_seconds: settings().long_break_seconds(),
            }
        );
        assert!(cycle.is_break);
        assert_eq!(cycle.total_completed_sessions, 4);
        assert_eq!(session.remaining_seconds, settings().long_break_seconds());
        assert_eq!(session.status, TimerStatus::Running);
    }

    #[test]
    fn early_work_session_earns_a_short_break() {
        let mut session = TimerSession::stopped(TimerMode::Pomodoro, &settings());
        let mut cycle = PomodoroCycle::default();
        session.start(start_of_test()).expect("start");
        session.elapsed_seconds = settings().work_seconds() - 1;

        let event = session
            .tick(&mut cycle, &settings(), start_of_test() + Duration::seconds(1500))
            .expect("event");
        assert_eq!(
            event,
            TimerEvent::WorkSessionFinished {
                long_break: false,
                break_seconds: settings().short_break_seconds(),
            }
        );
    }

    #[test]
    fn finished_break_hands_off_to_paused_work() {
        let mut session = TimerSession::stopped(TimerMode::Pomodoro, &settings());
        let mut cycle = PomodoroCycle {
            current_session: 1,
            is_break: true,
            total_completed_sessions: 1,
        };
        session.target_seconds = settings().short_break_seconds();
        session.remaining_seconds = 1;
        session.status = TimerStatus::Running;
        session.started_at = Some(start_of_test());

        let event = session
            .tick(&mut cycle, &settings(), start_of_test() + Duration::seconds(1))
            .expect("event");
        assert_eq!(
            event,
            TimerEvent::BreakFinished {
                next_session: 2,
                work_seconds: settings().work_seconds(),
            }
        );
        assert_eq!(session.status, TimerStatus::Paused);
        assert!(!cycle.is_break);
        assert_eq!(cycle.current_session, 2);
        assert_eq!(session.remaining_seconds, settings().work_seconds());
    }

    #[test]
    fn mode_switch_rejected_unless_stopped() {
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
        let mut cycle = PomodoroCycle::default();
        session.start(start_of_test()).expect("start");

        let result = session.switch_mode(TimerMode::Countdown, &mut cycle, &settings());
        assert!(result.is_err());
        assert_eq!(session.mode, TimerMode::Stopwatch);
        assert_eq!(session.status, TimerStatus::Running);
    }

    #[test]
    fn mode_switch_preserves_lifetime_counter() {
        let mut session = TimerSession::stopped(TimerMode::Pomodoro, &settings());
        let mut cycle = PomodoroCycle {
            current_session: 3,
            is_break: true,
            total_completed_sessions: 6,
        };
        session
            .switch_mode(TimerMode::Stopwatch, &mut cycle, &settings())
            .expect("switch");
        assert_eq!(cycle.current_session, 1);
        assert!(!cycle.is_break);
        assert_eq!(cycle.total_completed_sessions, 6);
    }

    #[test]
    fn reset_clears_server_correlation() {
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
        let mut cycle = PomodoroCycle::default();
        session.start(start_of_test()).expect("start");
        session.active_server_id = Some(91);
        session.elapsed_seconds = 42;

        session.reset(&mut cycle, &settings());
        assert_eq!(session.status, TimerStatus::Stopped);
        assert_eq!(session.active_server_id, None);
        assert_eq!(session.elapsed_seconds, 0);
    }

    #[test]
    fn rehydrated_stopwatch_reflects_wall_clock_gap() {
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
        let mut cycle = PomodoroCycle::default();
        let start = start_of_test();
        session.start(start).expect("start");
        session.elapsed_seconds = 30; // stale persisted tick count

        session.rehydrate(&mut cycle, &settings(), start + Duration::seconds(120));
        assert_eq!(session.elapsed_seconds, 120);
        assert_eq!(session.status, TimerStatus::Running);
    }

    #[test]
    fn rehydrated_expired_countdown_lands_stopped() {
        let mut session = TimerSession::stopped(TimerMode::Countdown, &settings());
        let mut cycle = PomodoroCycle::default();
        session.set_countdown_target(60).expect("set target");
        let start = start_of_test();
        session.start(start).expect("start");

        session.rehydrate(&mut cycle, &settings(), start + Duration::seconds(400));
        assert_eq!(session.status, TimerStatus::Stopped);
        assert_eq!(session.remaining_seconds, 0);
    }

    #[test]
    fn rehydrated_running_session_without_anchor_freezes() {
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
        let mut cycle = PomodoroCycle::default();
        session.status = TimerStatus::Running;
        session.started_at = None;

        session.rehydrate(&mut cycle, &settings(), start_of_test());
        assert_eq!(session.status, TimerStatus::Paused);
    }

    #[test]
    fn validate_rejects_remaining_above_target() {
        let mut session = TimerSession::stopped(TimerMode::Countdown, &settings());
        session.target_seconds = 100;
        session.remaining_seconds = 200;
        assert!(session.validate().is_err());
    }

    proptest! {
        #[test]
        fn countdown_remaining_is_monotone_and_non_negative(
            target in 1u32..7200,
            ticks in 0u32..9000,
        ) {
            let mut session = TimerSession::stopped(TimerMode::Countdown, &settings());
            let mut cycle = PomodoroCycle::default();
            session.set_countdown_target(target).expect("set target");
            session.start(start_of_test()).expect("start");

            let mut previous = session.remaining_seconds;
            for offset in 1..=ticks {
                let now = start_of_test() + Duration::seconds(i64::from(offset));
                session.tick(&mut cycle, &settings(), now);
                prop_assert!(session.remaining_seconds <= previous);
                previous = session.remaining_seconds;
            }
        }

        #[test]
        fn elapsed_equals_sum_of_running_intervals(
            segments in prop::collection::vec((1u32..120, 1u32..120), 1..6),
        ) {
            let mut session = TimerSession::stopped(TimerMode::Stopwatch, &settings());
            let mut cycle = PomodoroCycle::default();
            let mut clock = start_of_test();
            session.start(clock).expect("start");

            let mut expected = 0u32;
            for (running, paused) in segments {
                for _ in 0..running {
                    clock += Duration::seconds(1);
                    session.tick(&mut cycle, &settings(), clock);
                }
                expected += running;

                session.pause().expect("pause");
                clock += Duration::seconds(i64::from(paused));
                session.resume(&cycle, clock).expect("resume");
            }

            prop_assert_eq!(session.elapsed_seconds, expected);
        }
    }
}
