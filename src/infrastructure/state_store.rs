use crate::domain::models::{Preferences, TaskDescriptor};
use crate::domain::timer::{PomodoroCycle, TimerSession};
use crate::infrastructure::error::TrackerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const TIMER_STATE_JSON: &str = "timer_state.json";
const POMODORO_JSON: &str = "pomodoro.json";
const TASK_DRAFT_JSON: &str = "task_draft.json";
const PREFERENCES_JSON: &str = "preferences.json";
const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord<T> {
    schema: u8,
    record: T,
}

/// Durable local key-value store for timer state, pomodoro counters, the
/// task draft, and preferences. One JSON document per key under the state
/// directory.
///
/// Reads are lenient: an absent, corrupt, or schema-incompatible document
/// yields `None` and the caller falls back to defaults. Writes are
/// last-write-wins across processes; there is no cross-process locking.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Writes default documents for any key that has none yet.
    pub fn ensure_defaults(&self) -> Result<(), TrackerError> {
        if !self.state_dir.join(TIMER_STATE_JSON).exists() {
            self.save_session(&TimerSession::default())?;
        }
        if !self.state_dir.join(POMODORO_JSON).exists() {
            self.save_cycle(&PomodoroCycle::default())?;
        }
        if !self.state_dir.join(TASK_DRAFT_JSON).exists() {
            self.save_task_draft(&TaskDescriptor::default())?;
        }
        if !self.state_dir.join(PREFERENCES_JSON).exists() {
            self.save_preferences(&Preferences::default())?;
        }
        Ok(())
    }

    pub fn save_session(&self, session: &TimerSession) -> Result<(), TrackerError> {
        self.write_record(TIMER_STATE_JSON, session)
    }

    /// Loads the persisted timer; `None` when absent or when the stored
    /// mode/status combination does not validate.
    pub fn load_session(&self) -> Option<TimerSession> {
        let session: TimerSession = self.read_record(TIMER_STATE_JSON)?;
        session.validate().ok()?;
        Some(session)
    }

    pub fn save_cycle(&self, cycle: &PomodoroCycle) -> Result<(), TrackerError> {
        self.write_record(POMODORO_JSON, cycle)
    }

    pub fn load_cycle(&self) -> Option<PomodoroCycle> {
        let cycle: PomodoroCycle = self.read_record(POMODORO_JSON)?;
        if cycle.current_session == 0 {
            return None;
        }
        Some(cycle)
    }

    pub fn save_task_draft(&self, draft: &TaskDescriptor) -> Result<(), TrackerError> {
        self.write_record(TASK_DRAFT_JSON, draft)
    }

    pub fn load_task_draft(&self) -> Option<TaskDescriptor> {
        self.read_record(TASK_DRAFT_JSON)
    }

    pub fn save_preferences(&self, preferences: &Preferences) -> Result<(), TrackerError> {
        self.write_record(PREFERENCES_JSON, preferences)
    }

    pub fn load_preferences(&self) -> Option<Preferences> {
        let preferences: Preferences = self.read_record(PREFERENCES_JSON)?;
        preferences.validate().ok()?;
        Some(preferences)
    }

    fn write_record<T: Serialize>(&self, name: &str, record: &T) -> Result<(), TrackerError> {
        let wrapped = PersistedRecord {
            schema: SCHEMA_VERSION,
            record,
        };
        let formatted = serde_json::to_string_pretty(&wrapped)?;
        fs::write(self.state_dir.join(name), format!("{formatted}\n"))?;
        Ok(())
    }

    fn read_record<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = fs::read_to_string(self.state_dir.join(name)).ok()?;
        let wrapped: PersistedRecord<T> = serde_json::from_str(&raw).ok()?;
        if wrapped.schema != SCHEMA_VERSION {
            return None;
        }
        Some(wrapped.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PomodoroSettings, TimerMode, TimerStatus};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn store() -> (TempDir, StateStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = StateStore::new(dir.path());
        (dir, store)
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn ensure_defaults_writes_all_documents() {
        let (dir, store) = store();
        store.ensure_defaults().expect("defaults");
        for name in [
            TIMER_STATE_JSON,
            POMODORO_JSON,
            TASK_DRAFT_JSON,
            PREFERENCES_JSON,
        ] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
    }

    #[test]
    fn ensure_defaults_keeps_existing_documents() {
        let (_dir, store) = store();
        let mut preferences = Preferences::default();
        preferences.dark_mode = true;
        store.save_preferences(&preferences).expect("save");

        store.ensure_defaults().expect("defaults");
        let loaded = store.load_preferences().expect("preferences");
        assert!(loaded.dark_mode);
    }

    #[test]
    fn session_roundtrip_preserves_time_fields() {
        let (_dir, store) = store();
        let mut session = TimerSession::stopped(TimerMode::Stopwatch, &PomodoroSettings::default());
        session.status = TimerStatus::Running;
        session.elapsed_seconds = 95;
        session.active_server_id = Some(12);
        session.started_at = Some(fixed_time("2026-03-02T09:00:00Z"));

        store.save_session(&session).expect("save");
        let loaded = store.load_session().expect("session");
        assert_eq!(loaded, session);
    }

    #[test]
    fn corrupt_session_document_yields_none() {
        let (dir, store) = store();
        fs::write(dir.path().join(TIMER_STATE_JSON), "{not json").expect("write");
        assert!(store.load_session().is_none());
    }

    #[test]
    fn schema_mismatch_yields_none() {
        let (dir, store) = store();
        let raw = serde_json::json!({
            "schema": 9,
            "record": TimerSession::default(),
        });
        fs::write(
            dir.path().join(TIMER_STATE_JSON),
            serde_json::to_string(&raw).expect("serialize"),
        )
        .expect("write");
        assert!(store.load_session().is_none());
    }

    #[test]
    fn invalid_persisted_combination_yields_none() {
        let (dir, store) = store();
        // Running without a start anchor cannot be reconciled.
        let mut session = TimerSession::default();
        session.status = TimerStatus::Running;
        session.started_at = None;
        let raw = serde_json::json!({ "schema": 1, "record": session });
        fs::write(
            dir.path().join(TIMER_STATE_JSON),
            serde_json::to_string(&raw).expect("serialize"),
        )
        .expect("write");
        assert!(store.load_session().is_none());
    }

    #[test]
    fn missing_documents_yield_none() {
        let (_dir, store) = store();
        assert!(store.load_session().is_none());
        assert!(store.load_cycle().is_none());
        assert!(store.load_task_draft().is_none());
        assert!(store.load_preferences().is_none());
    }
}
