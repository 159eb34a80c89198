use crate::infrastructure::error::TrackerError;
use crate::infrastructure::state_store::StateStore;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

/// Prepares the workspace layout: a state directory with default documents
/// and a logs directory for the service's operation log.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, TrackerError> {
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");

    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    StateStore::new(&state_dir).ensure_defaults()?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        state_dir,
        logs_dir,
    })
}
