//! Path resolution for the two roots the orchestrator lives between: the
//! read-only install directory (templates) and the per-user writable work
//! directory (runs, generated scripts). Resolved once at startup and threaded
//! through every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{PipelineError, PipelineResult};

const APP_DIR: &str = "expressdiff";
const DEFAULT_SCHEDULER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Read-only root holding `slurm_templates/`.
    pub install_dir: PathBuf,
    /// Writable root holding `runs/`, `generated_slurm/` and `mapping_in/`.
    pub work_dir: PathBuf,
    /// Upper bound for any single scheduler command invocation.
    pub scheduler_timeout: Duration,
}

impl PipelineConfig {
    /// Resolve from the process environment.
    ///
    /// Install dir precedence: `EXPRESSDIFF_HOME`, the directory containing
    /// the running binary, the process working directory.
    /// Work dir precedence: `EXPRESSDIFF_WORKDIR`, `$SCRATCH/expressdiff`,
    /// `$HOME/expressdiff`.
    pub fn from_env() -> PipelineResult<Self> {
        let install_dir = match std::env::var_os("EXPRESSDIFF_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .or_else(|| std::env::current_dir().ok())
                .ok_or_else(|| {
                    PipelineError::Config(
                        "cannot locate an install directory; set EXPRESSDIFF_HOME".to_string(),
                    )
                })?,
        };

        let work_dir = match std::env::var_os("EXPRESSDIFF_WORKDIR") {
            Some(dir) => PathBuf::from(dir),
            None => match std::env::var_os("SCRATCH") {
                Some(scratch) => PathBuf::from(scratch).join(APP_DIR),
                None => match std::env::var_os("HOME") {
                    Some(home) => PathBuf::from(home).join(APP_DIR),
                    None => {
                        return Err(PipelineError::Config(
                            "no work directory; set EXPRESSDIFF_WORKDIR, SCRATCH or HOME"
                                .to_string(),
                        ));
                    }
                },
            },
        };

        Ok(Self::new(install_dir, work_dir))
    }

    pub fn new(install_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            install_dir,
            work_dir,
            scheduler_timeout: DEFAULT_SCHEDULER_TIMEOUT,
        }
    }

    pub fn with_scheduler_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler_timeout = timeout;
        self
    }

    /// Create the writable skeleton. The install directory is never touched.
    pub fn ensure_layout(&self) -> PipelineResult<()> {
        std::fs::create_dir_all(self.runs_dir())?;
        std::fs::create_dir_all(self.generated_dir())?;
        Ok(())
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.work_dir.join("runs")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.work_dir.join("generated_slurm")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.install_dir.join("slurm_templates")
    }

    /// Shared reference location consulted when a run carries no local
    /// FASTA/GTF of its own.
    pub fn shared_reference_dir(&self) -> PathBuf {
        self.work_dir.join("mapping_in")
    }

    /// Rough classification of the work directory for the storage-info
    /// endpoint: scratch filesystems beat home directories.
    pub fn storage_type(&self) -> &'static str {
        let dir = self.work_dir.to_string_lossy().to_lowercase();
        if dir.contains("scratch") {
            "scratch"
        } else if std::env::var_os("HOME")
            .map(|home| self.work_dir.starts_with(PathBuf::from(home)))
            .unwrap_or(false)
        {
            "home"
        } else {
            "custom"
        }
    }
}
