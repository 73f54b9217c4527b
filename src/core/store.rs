//! Per-run state store. Each run owns one directory under `runs/` with a
//! single authoritative `run_state.json`, written with an atomic
//! tmp→fsync→rename replace so readers never observe a torn document.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::run::Run;

pub const STATE_FILE: &str = "run_state.json";

/// Stage I/O directories created with every run.
const RUN_SUBDIRS: [&str; 14] = [
    "raw",
    "reference",
    "metadata",
    "trimmed",
    "trimmed/logs",
    "qc_raw",
    "qc_trimmed",
    "star",
    "star/logs",
    "featurecounts",
    "featurecounts/logs",
    "counts",
    "deseq2",
    "logs",
];

#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: PathBuf) -> Self {
        Self { runs_dir }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(STATE_FILE)
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.run_dir(run_id).is_dir()
    }

    /// Create the run directory skeleton and the initial state file.
    pub fn create(&self, run: &Run) -> PipelineResult<()> {
        let run_dir = self.run_dir(&run.run_id);
        if run_dir.exists() {
            return Err(PipelineError::Conflict(format!(
                "run {} already exists at {}",
                run.run_id,
                run_dir.display()
            )));
        }
        fs::create_dir_all(&run_dir)?;
        for sub in RUN_SUBDIRS {
            fs::create_dir_all(run_dir.join(sub))?;
        }
        self.save(run)
    }

    pub fn load(&self, run_id: &str) -> PipelineResult<Run> {
        let path = self.state_path(run_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::RunNotFound(run_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| PipelineError::StateCorrupt {
            path,
            detail: e.to_string(),
        })
    }

    /// Canonical serialize (sorted object keys, fixed timestamp format),
    /// write a temporary sibling, fsync, rename over the target.
    pub fn save(&self, run: &Run) -> PipelineResult<()> {
        let run_dir = self.run_dir(&run.run_id);
        let target = run_dir.join(STATE_FILE);
        let tmp = run_dir.join(format!(".{STATE_FILE}.tmp"));

        // Round-tripping through a Value sorts keys: serde_json's default
        // Map is BTreeMap-backed.
        let value = serde_json::to_value(run)?;
        let mut bytes = serde_json::to_vec_pretty(&value)?;
        bytes.push(b'\n');

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Enumerate run directories, newest first. A directory without a valid
    /// state file is reported as a failed run with a diagnostic, not hidden.
    pub fn list(&self) -> PipelineResult<Vec<Run>> {
        if !self.runs_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().to_string();
            match self.load(&run_id) {
                Ok(run) => runs.push(run),
                Err(e) => {
                    warn!("run {run_id}: unreadable state ({e})");
                    let seen_at = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());
                    runs.push(Run::failed_placeholder(
                        run_id,
                        format!("state file unreadable: {e}"),
                        seen_at,
                    ));
                }
            }
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    /// Remove the run directory tree. Deleting an absent run is a no-op.
    pub fn delete(&self, run_id: &str) -> PipelineResult<()> {
        match fs::remove_dir_all(self.run_dir(run_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
