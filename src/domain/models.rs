use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    Stopwatch,
    Countdown,
    Pomodoro,
}

impl Default for TimerMode {
    fn default() -> Self {
        TimerMode::Stopwatch
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Stopped,
    Running,
    Paused,
}

impl Default for TimerStatus {
    fn default() -> Self {
        TimerStatus::Stopped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// The label and metadata attached to the current timer. The state machine
/// treats this as an opaque payload forwarded verbatim on start/stop.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub description: String,
    pub project_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub billable: bool,
    pub category: Option<String>,
}

impl TaskDescriptor {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.description, "task.description")
    }

    pub fn tag_ids(&self) -> Vec<i64> {
        self.tags.iter().map(|tag| tag.id).collect()
    }
}

/// A saved time entry as the backend reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: i64,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    pub project_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub billable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSettings {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub sessions_until_long_break: u32,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            sessions_until_long_break: 4,
        }
    }
}

impl PomodoroSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.work_minutes == 0 {
            return Err("pomodoro.work_minutes must be > 0".to_string());
        }
        if self.short_break_minutes == 0 {
            return Err("pomodoro.short_break_minutes must be > 0".to_string());
        }
        if self.long_break_minutes == 0 {
            return Err("pomodoro.long_break_minutes must be > 0".to_string());
        }
        if self.sessions_until_long_break == 0 {
            return Err("pomodoro.sessions_until_long_break must be > 0".to_string());
        }
        Ok(())
    }

    pub fn work_seconds(&self) -> u32 {
        self.work_minutes * 60
    }

    pub fn short_break_seconds(&self) -> u32 {
        self.short_break_minutes * 60
    }

    pub fn long_break_seconds(&self) -> u32 {
        self.long_break_minutes * 60
    }
}

/// User preferences. Owned by a single store with one lifecycle owner; no
/// component reads these from ambient storage directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub sound_enabled: bool,
    pub notifications_enabled: bool,
    pub dark_mode: bool,
    pub countdown_presets: Vec<u32>,
    pub pomodoro: PomodoroSettings,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            notifications_enabled: true,
            dark_mode: false,
            countdown_presets: vec![600, 900, 1200, 1800, 2700, 3600],
            pomodoro: PomodoroSettings::default(),
        }
    }
}

impl Preferences {
    pub fn validate(&self) -> Result<(), String> {
        self.pomodoro.validate()?;
        if self.countdown_presets.iter().any(|seconds| *seconds == 0) {
            return Err("preferences.countdown_presets must all be > 0".to_string());
        }
        Ok(())
    }
}

/// Bearer credential attached to every backend call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
    pub acquired_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(access_token: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            acquired_at,
        }
    }

    pub fn bearer(&self) -> &str {
        &self.access_token
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.access_token, "auth.access_token")
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
