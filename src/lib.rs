//! Core of a personal time tracker: a timer state machine with stopwatch,
//! countdown, and pomodoro modes, synchronized against a backend timers API
//! and persisted locally so sessions survive restarts.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::tracker::{
    NowProvider, TimerSnapshot, TrackerEvent, TrackerService, MIN_SAVE_SECONDS,
    RECENT_ENTRIES_LIMIT,
};
pub use domain::models::{
    AuthToken, PomodoroSettings, Preferences, Tag, TaskDescriptor, TimeEntry, TimerMode,
    TimerStatus,
};
pub use domain::timer::{PomodoroCycle, TimerEvent, TimerSession};
pub use infrastructure::api_client::{
    ActiveTimer, ReqwestTimersApi, StartTimerRequest, StopTimerRequest, TimersApi,
    DEFAULT_API_BASE,
};
pub use infrastructure::credential_store::{
    CredentialStore, InMemoryCredentialStore, KeyringCredentialStore,
};
pub use infrastructure::error::TrackerError;
pub use infrastructure::state_store::StateStore;
