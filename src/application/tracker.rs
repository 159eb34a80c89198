use crate::application::bootstrap::bootstrap_workspace;
use crate::domain::models::{
    AuthToken, Preferences, TaskDescriptor, TimeEntry, TimerMode, TimerStatus,
};
use crate::domain::timer::{PomodoroCycle, TimerEvent, TimerSession};
use crate::infrastructure::api_client::{StartTimerRequest, StopTimerRequest, TimersApi};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::TrackerError;
use crate::infrastructure::state_store::StateStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;

/// Entries shorter than this are rejected on stop so the backend never
/// receives accidental sub-minute records.
pub const MIN_SAVE_SECONDS: u32 = 60;
pub const RECENT_ENTRIES_LIMIT: u32 = 5;

const LOG_FILE: &str = "tracker.log";

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Notifications pushed to the frontend over the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Tick(TimerSnapshot),
    CountdownFinished,
    WorkSessionFinished { long_break: bool },
    BreakFinished { next_session: u32 },
    EntrySaved(TimeEntry),
}

/// Consistent view of the timer and its pomodoro counters, captured under
/// the runtime lock.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub session: TimerSession,
    pub cycle: PomodoroCycle,
}

impl TimerSnapshot {
    fn of(runtime: &TrackerRuntime) -> Self {
        Self {
            session: runtime.session.clone(),
            cycle: runtime.cycle.clone(),
        }
    }
}

struct TrackerRuntime {
    session: TimerSession,
    cycle: PomodoroCycle,
    draft: TaskDescriptor,
    preferences: Preferences,
    recent_entries: Vec<TimeEntry>,
}

/// Orchestrates the timer state machine against the backend timers API and
/// the local state store.
///
/// All timer mutations happen under a single async mutex, and one ticker
/// task at a time advances the running timer. The backend is the source of
/// truth for whether a timer is active; local state is a cache that keeps
/// the tracker usable while the backend is unreachable.
pub struct TrackerService<A: TimersApi, S: CredentialStore> {
    api: Arc<A>,
    credentials: Arc<S>,
    store: StateStore,
    runtime: Arc<Mutex<TrackerRuntime>>,
    events: UnboundedSender<TrackerEvent>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    start_in_flight: AtomicBool,
    logs_dir: PathBuf,
    log_guard: Arc<StdMutex<()>>,
    now_provider: NowProvider,
}

impl<A: TimersApi, S: CredentialStore> TrackerService<A, S> {
    /// Bootstraps the workspace, rehydrates persisted state against the wall
    /// clock, and returns the service together with its event stream.
    pub fn new(
        api: Arc<A>,
        credentials: Arc<S>,
        workspace_root: &Path,
    ) -> Result<(Self, UnboundedReceiver<TrackerEvent>), TrackerError> {
        let layout = bootstrap_workspace(workspace_root)?;
        let store = StateStore::new(&layout.state_dir);
        let now_provider: NowProvider = Arc::new(Utc::now);

        let preferences = store.load_preferences().unwrap_or_default();
        let mut session = store
            .load_session()
            .unwrap_or_else(|| TimerSession::stopped(TimerMode::Stopwatch, &preferences.pomodoro));
        let mut cycle = store.load_cycle().unwrap_or_default();
        session.rehydrate(&mut cycle, &preferences.pomodoro, (now_provider)());
        store.save_session(&session)?;
        store.save_cycle(&cycle)?;
        let draft = store.load_task_draft().unwrap_or_default();

        let (events, receiver) = mpsc::unbounded_channel();
        let service = Self {
            api,
            credentials,
            store,
            runtime: Arc::new(Mutex::new(TrackerRuntime {
                session,
                cycle,
                draft,
                preferences,
                recent_entries: Vec::new(),
            })),
            events,
            ticker: Mutex::new(None),
            start_in_flight: AtomicBool::new(false),
            logs_dir: layout.logs_dir,
            log_guard: Arc::new(StdMutex::new(())),
            now_provider,
        };
        Ok((service, receiver))
    }

    /// Replaces the wall-clock source; tests inject a frozen clock here.
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn store_credential(&self, token: &AuthToken) -> Result<(), TrackerError> {
        token.validate().map_err(TrackerError::Validation)?;
        self.credentials.save_token(token)
    }

    /// Asks the backend whether a timer is active and reconciles local state
    /// with the answer.
    ///
    /// A server-side active timer always wins: the local session is rebuilt
    /// from the server record with elapsed time recomputed from its start
    /// time, so repeated calls converge on the same state. When the server
    /// reports no active timer but the local session still carries a server
    /// id, the local session is stale and gets reset. Network failures
    /// degrade to the persisted local state so tracking keeps working
    /// offline.
    pub async fn query_active(&self) -> Result<TimerSnapshot, TrackerError> {
        let token = match self.credentials.load_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.log_info("query_active", "no stored credential; using local state only");
                let snapshot = self.snapshot().await;
                self.align_ticker().await;
                return Ok(snapshot);
            }
            Err(error) => return Err(error),
        };

        let snapshot = match self.api.active_timer(token.bearer()).await {
            Ok(Some(active)) => {
                let now = self.now();
                let elapsed = (now - active.start_time).num_seconds().max(0);
                let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);

                let mut rt = self.runtime.lock().await;
                rt.session = TimerSession {
                    mode: TimerMode::Stopwatch,
                    status: TimerStatus::Running,
                    elapsed_seconds: elapsed,
                    remaining_seconds: 0,
                    target_seconds: 0,
                    active_server_id: Some(active.id),
                    started_at: Some(active.start_time),
                };
                rt.cycle = PomodoroCycle {
                    total_completed_sessions: rt.cycle.total_completed_sessions,
                    ..PomodoroCycle::default()
                };
                rt.draft = TaskDescriptor {
                    description: active.description.clone(),
                    project_id: active.project_id,
                    tags: active.tags.clone(),
                    billable: active.billable,
                    category: None,
                };
                self.persist_runtime(&rt);
                TimerSnapshot::of(&rt)
            }
            Ok(None) => {
                let mut rt = self.runtime.lock().await;
                if rt.session.active_server_id.is_some() {
                    let TrackerRuntime {
                        session,
                        cycle,
                        preferences,
                        ..
                    } = &mut *rt;
                    session.reset(cycle, &preferences.pomodoro);
                    self.log_info(
                        "query_active",
                        "server reports no active timer; cleared stale local session",
                    );
                    self.persist_runtime(&rt);
                }
                TimerSnapshot::of(&rt)
            }
            Err(error) if error.requires_reauthentication() => {
                self.purge_credentials("query_active");
                return Err(error);
            }
            Err(TrackerError::Network(message)) => {
                self.log_error("query_active", &message);
                self.snapshot().await
            }
            Err(error) => return Err(error),
        };

        self.align_ticker().await;
        Ok(snapshot)
    }

    /// Starts the timer for the current mode.
    ///
    /// Stopwatch and pomodoro work sessions are tracked server-side, so the
    /// local state flips to running only after the backend acknowledges the
    /// start. Countdowns and pomodoro breaks are purely local. A conflict
    /// from the backend leaves the local session stopped with no server id;
    /// the caller resolves it via [`Self::stop_conflicting_and_start`].
    pub async fn start(&self) -> Result<TimerSnapshot, TrackerError> {
        let now = self.now();
        let (local_only, draft, status) = {
            let rt = self.runtime.lock().await;
            (self.is_local_only(&rt), rt.draft.clone(), rt.session.status)
        };

        if local_only {
            let snapshot = {
                let mut rt = self.runtime.lock().await;
                rt.session.start(now).map_err(TrackerError::Validation)?;
                self.persist_runtime(&rt);
                TimerSnapshot::of(&rt)
            };
            self.spawn_ticker().await;
            return Ok(snapshot);
        }

        if status != TimerStatus::Stopped {
            return Err(TrackerError::Validation(
                "timer is already running or paused".to_string(),
            ));
        }
        draft.validate().map_err(TrackerError::Validation)?;

        // At most one start request in flight; a second click while the
        // first is pending must not create two server timers.
        if self.start_in_flight.swap(true, Ordering::SeqCst) {
            return Err(TrackerError::Validation(
                "a start request is already in flight".to_string(),
            ));
        }
        let result = self.start_remote(&draft, now).await;
        self.start_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn start_remote(
        &self,
        draft: &TaskDescriptor,
        now: DateTime<Utc>,
    ) -> Result<TimerSnapshot, TrackerError> {
        let token = self.require_token()?;
        let request = StartTimerRequest {
            description: draft.description.clone(),
            start_time: now,
            project_id: draft.project_id,
            tag_ids: draft.tag_ids(),
            billable: draft.billable,
            category: draft.category.clone(),
        };

        match self.api.start_timer(token.bearer(), &request).await {
            Ok(server_id) => {
                let snapshot = {
                    let mut rt = self.runtime.lock().await;
                    rt.session.start(now).map_err(TrackerError::Validation)?;
                    rt.session.active_server_id = Some(server_id);
                    self.persist_runtime(&rt);
                    TimerSnapshot::of(&rt)
                };
                self.log_info("start_timer", &format!("server acknowledged timer {server_id}"));
                self.spawn_ticker().await;
                Ok(snapshot)
            }
            Err(error) => {
                if error.requires_reauthentication() {
                    self.purge_credentials("start_timer");
                }
                self.log_error("start_timer", &error.to_string());
                Err(error)
            }
        }
    }

    /// Stops the timer and saves the entry.
    ///
    /// Local-only phases (countdown, pomodoro break) just reset. Tracked
    /// phases require at least [`MIN_SAVE_SECONDS`] of elapsed time; below
    /// that the call fails and the timer keeps running so no time is lost.
    /// On success the recent entries list is refreshed and an
    /// [`TrackerEvent::EntrySaved`] notification is emitted.
    pub async fn stop(&self) -> Result<TimerSnapshot, TrackerError> {
        let now = self.now();
        let (local_only, draft, session) = {
            let rt = self.runtime.lock().await;
            (self.is_local_only(&rt), rt.draft.clone(), rt.session.clone())
        };

        if local_only {
            return self.reset().await;
        }

        if session.status == TimerStatus::Stopped {
            return Err(TrackerError::Validation(
                "no active timer to stop".to_string(),
            ));
        }
        let Some(server_id) = session.active_server_id else {
            return Err(TrackerError::Validation(
                "no server timer is associated with this session".to_string(),
            ));
        };
        if session.elapsed_seconds < MIN_SAVE_SECONDS {
            return Err(TrackerError::Validation(
                "track at least one minute before saving".to_string(),
            ));
        }

        let token = self.require_token()?;
        let start_time = session
            .started_at
            .unwrap_or_else(|| now - Duration::seconds(i64::from(session.elapsed_seconds)));
        let request = StopTimerRequest {
            description: draft.description.clone(),
            start_time,
            end_time: now,
            project_id: draft.project_id,
            tag_ids: draft.tag_ids(),
            billable: draft.billable,
        };

        match self.api.stop_timer(token.bearer(), server_id, &request).await {
            Ok(entry) => {
                self.cancel_ticker().await;
                let entries = match self
                    .api
                    .recent_entries(token.bearer(), RECENT_ENTRIES_LIMIT)
                    .await
                {
                    Ok(entries) => entries,
                    Err(error) => {
                        // The save itself succeeded; show at least the new entry.
                        self.log_error("recent_entries", &error.to_string());
                        vec![entry.clone()]
                    }
                };

                let snapshot = {
                    let mut rt = self.runtime.lock().await;
                    let TrackerRuntime {
                        session,
                        cycle,
                        preferences,
                        ..
                    } = &mut *rt;
                    session.reset(cycle, &preferences.pomodoro);
                    rt.recent_entries = entries;
                    self.persist_runtime(&rt);
                    TimerSnapshot::of(&rt)
                };
                self.log_info("stop_timer", &format!("entry {} saved", entry.id));
                let _ = self.events.send(TrackerEvent::EntrySaved(entry));
                Ok(snapshot)
            }
            Err(error) => {
                // The timer keeps running; tracked time survives the failure.
                if error.requires_reauthentication() {
                    self.purge_credentials("stop_timer");
                }
                self.log_error("stop_timer", &error.to_string());
                Err(error)
            }
        }
    }

    /// Conflict remedy: stop whatever timer the server reports as active,
    /// then retry the start with the current draft.
    pub async fn stop_conflicting_and_start(&self) -> Result<TimerSnapshot, TrackerError> {
        let token = self.require_token()?;
        let now = self.now();

        let active = match self.api.active_timer(token.bearer()).await {
            Ok(active) => active,
            Err(error) => {
                if error.requires_reauthentication() {
                    self.purge_credentials("stop_conflicting_and_start");
                }
                return Err(error);
            }
        };
        if let Some(active) = active {
            let request = StopTimerRequest {
                description: active.description.clone(),
                start_time: active.start_time,
                end_time: now,
                project_id: active.project_id,
                tag_ids: active.tags.iter().map(|tag| tag.id).collect(),
                billable: active.billable,
            };
            match self.api.stop_timer(token.bearer(), active.id, &request).await {
                Ok(entry) => {
                    self.log_info(
                        "stop_conflicting_and_start",
                        &format!("stopped conflicting timer {}", active.id),
                    );
                    let _ = self.events.send(TrackerEvent::EntrySaved(entry));
                }
                Err(error) => {
                    if error.requires_reauthentication() {
                        self.purge_credentials("stop_conflicting_and_start");
                    }
                    return Err(error);
                }
            }
        }

        self.start().await
    }

    pub async fn pause(&self) -> Result<TimerSnapshot, TrackerError> {
        let snapshot = {
            let mut rt = self.runtime.lock().await;
            rt.session.pause().map_err(TrackerError::Validation)?;
            self.persist_runtime(&rt);
            TimerSnapshot::of(&rt)
        };
        self.cancel_ticker().await;
        Ok(snapshot)
    }

    pub async fn resume(&self) -> Result<TimerSnapshot, TrackerError> {
        let now = self.now();
        let snapshot = {
            let mut rt = self.runtime.lock().await;
            let TrackerRuntime { session, cycle, .. } = &mut *rt;
            session.resume(cycle, now).map_err(TrackerError::Validation)?;
            self.persist_runtime(&rt);
            TimerSnapshot::of(&rt)
        };
        self.spawn_ticker().await;
        Ok(snapshot)
    }

    /// Local reset: back to stopped defaults without touching the server.
    pub async fn reset(&self) -> Result<TimerSnapshot, TrackerError> {
        self.cancel_ticker().await;
        let mut rt = self.runtime.lock().await;
        let TrackerRuntime {
            session,
            cycle,
            preferences,
            ..
        } = &mut *rt;
        session.reset(cycle, &preferences.pomodoro);
        self.persist_runtime(&rt);
        Ok(TimerSnapshot::of(&rt))
    }

    pub async fn switch_mode(&self, mode: TimerMode) -> Result<TimerSnapshot, TrackerError> {
        let mut rt = self.runtime.lock().await;
        let TrackerRuntime {
            session,
            cycle,
            preferences,
            ..
        } = &mut *rt;
        session
            .switch_mode(mode, cycle, &preferences.pomodoro)
            .map_err(TrackerError::Validation)?;
        self.persist_runtime(&rt);
        Ok(TimerSnapshot::of(&rt))
    }

    pub async fn set_countdown_target(&self, seconds: u32) -> Result<TimerSnapshot, TrackerError> {
        let mut rt = self.runtime.lock().await;
        rt.session
            .set_countdown_target(seconds)
            .map_err(TrackerError::Validation)?;
        self.persist_runtime(&rt);
        Ok(TimerSnapshot::of(&rt))
    }

    pub async fn set_task_draft(&self, draft: TaskDescriptor) {
        let mut rt = self.runtime.lock().await;
        rt.draft = draft;
        self.persist_runtime(&rt);
    }

    pub async fn update_preferences(
        &self,
        preferences: Preferences,
    ) -> Result<Preferences, TrackerError> {
        preferences.validate().map_err(TrackerError::Validation)?;
        let mut rt = self.runtime.lock().await;
        rt.preferences = preferences;
        // A stopped pomodoro work phase picks up the new duration right away.
        if rt.session.mode == TimerMode::Pomodoro
            && rt.session.status == TimerStatus::Stopped
            && !rt.cycle.is_break
        {
            let target = rt.preferences.pomodoro.work_seconds();
            rt.session.target_seconds = target;
            rt.session.remaining_seconds = target;
        }
        if let Err(error) = self.store.save_preferences(&rt.preferences) {
            self.log_error("update_preferences", &error.to_string());
        }
        self.persist_runtime(&rt);
        Ok(rt.preferences.clone())
    }

    pub async fn refresh_recent_entries(&self) -> Result<Vec<TimeEntry>, TrackerError> {
        let token = self.require_token()?;
        match self
            .api
            .recent_entries(token.bearer(), RECENT_ENTRIES_LIMIT)
            .await
        {
            Ok(entries) => {
                self.runtime.lock().await.recent_entries = entries.clone();
                Ok(entries)
            }
            Err(error) => {
                if error.requires_reauthentication() {
                    self.purge_credentials("recent_entries");
                }
                Err(error)
            }
        }
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::of(&*self.runtime.lock().await)
    }

    pub async fn recent_entries(&self) -> Vec<TimeEntry> {
        self.runtime.lock().await.recent_entries.clone()
    }

    pub async fn task_draft(&self) -> TaskDescriptor {
        self.runtime.lock().await.draft.clone()
    }

    pub async fn preferences(&self) -> Preferences {
        self.runtime.lock().await.preferences.clone()
    }

    fn is_local_only(&self, rt: &TrackerRuntime) -> bool {
        match rt.session.mode {
            TimerMode::Countdown => true,
            TimerMode::Pomodoro => rt.cycle.is_break,
            TimerMode::Stopwatch => false,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn require_token(&self) -> Result<AuthToken, TrackerError> {
        match self.credentials.load_token()? {
            Some(token) => Ok(token),
            None => Err(TrackerError::Auth(
                "no stored credential; log in first".to_string(),
            )),
        }
    }

    fn purge_credentials(&self, operation: &str) {
        match self.credentials.delete_token() {
            Ok(()) => self.log_info(
                operation,
                "stored credential purged; re-authentication required",
            ),
            Err(error) => self.log_error(
                operation,
                &format!("failed to purge stored credential: {error}"),
            ),
        }
    }

    /// Persistence here is best effort; a failed write must never abort a
    /// timer action, so failures land in the log instead of the caller.
    fn persist_runtime(&self, rt: &TrackerRuntime) {
        if let Err(error) = self.store.save_session(&rt.session) {
            self.log_error("persist", &error.to_string());
        }
        if let Err(error) = self.store.save_cycle(&rt.cycle) {
            self.log_error("persist", &error.to_string());
        }
        if let Err(error) = self.store.save_task_draft(&rt.draft) {
            self.log_error("persist", &error.to_string());
        }
    }

    async fn align_ticker(&self) {
        let running = self.runtime.lock().await.session.status == TimerStatus::Running;
        if running {
            self.spawn_ticker().await;
        } else {
            self.cancel_ticker().await;
        }
    }

    /// Spawns the one-second ticker task, unless one is already running.
    /// The task re-checks the status under the runtime lock on every tick
    /// and exits as soon as the timer is no longer running, so a tick that
    /// races a stop is a no-op.
    async fn spawn_ticker(&self) {
        let mut ticker = self.ticker.lock().await;
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let store = self.store.clone();
        let events = self.events.clone();
        let now_provider = Arc::clone(&self.now_provider);
        let logs_dir = self.logs_dir.clone();
        let log_guard = Arc::clone(&self.log_guard);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(std::time::Duration::from_secs(1));
            // The first tick of a tokio interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let now = (now_provider)();

                let mut rt = runtime.lock().await;
                if rt.session.status != TimerStatus::Running {
                    break;
                }
                let TrackerRuntime {
                    session,
                    cycle,
                    preferences,
                    ..
                } = &mut *rt;
                let completion = session.tick(cycle, &preferences.pomodoro, now);
                let snapshot = TimerSnapshot::of(&rt);
                if let Err(error) = store.save_session(&rt.session) {
                    append_log(&logs_dir, &log_guard, now, "error", "tick", &error.to_string());
                }
                if let Err(error) = store.save_cycle(&rt.cycle) {
                    append_log(&logs_dir, &log_guard, now, "error", "tick", &error.to_string());
                }
                drop(rt);

                let _ = events.send(TrackerEvent::Tick(snapshot));
                if let Some(completion) = completion {
                    let _ = events.send(completion_event(completion));
                }
            }
        });
        *ticker = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    fn log_info(&self, operation: &str, message: &str) {
        append_log(
            &self.logs_dir,
            &self.log_guard,
            self.now(),
            "info",
            operation,
            message,
        );
    }

    fn log_error(&self, operation: &str, message: &str) {
        append_log(
            &self.logs_dir,
            &self.log_guard,
            self.now(),
            "error",
            operation,
            message,
        );
    }
}

fn completion_event(event: TimerEvent) -> TrackerEvent {
    match event {
        TimerEvent::CountdownFinished => TrackerEvent::CountdownFinished,
        TimerEvent::WorkSessionFinished { long_break, .. } => {
            TrackerEvent::WorkSessionFinished { long_break }
        }
        TimerEvent::BreakFinished { next_session, .. } => {
            TrackerEvent::BreakFinished { next_session }
        }
    }
}

/// One JSON object per line, same shape across every operation.
fn append_log(
    logs_dir: &Path,
    guard: &StdMutex<()>,
    now: DateTime<Utc>,
    level: &str,
    operation: &str,
    message: &str,
) {
    let Ok(_lock) = guard.lock() else {
        return;
    };
    let line = serde_json::json!({
        "timestamp": now.to_rfc3339(),
        "level": level,
        "operation": operation,
        "message": message,
    });
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE))
    {
        let _ = writeln!(file, "{line}");
    }
}
