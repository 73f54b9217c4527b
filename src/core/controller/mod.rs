//! Run/stage lifecycle controller. All state-mutating operations on a run
//! are serialized by a per-run lock held across the whole
//! read-reconcile-decide-submit-persist sequence; operations on distinct
//! runs proceed in parallel. The controller is constructed against a config
//! and a scheduler gateway, never imported as a global.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config::PipelineConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::run::{Run, RunStatus, StageState, StageStatus};
use crate::core::scripts::ScriptGenerator;
use crate::core::slurm::{JobState, SchedulerGateway};
use crate::core::stage::Stage;
use crate::core::store::RunStore;
use crate::core::validate::{self, SampleValidation, StageValidation};

pub struct RunController {
    config: PipelineConfig,
    store: RunStore,
    scripts: ScriptGenerator,
    scheduler: Arc<dyn SchedulerGateway>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageLogs {
    pub stage: String,
    pub job_id: String,
    pub stdout: String,
    pub stderr: String,
    pub stdout_file: Option<String>,
    pub stderr_file: Option<String>,
}

impl RunController {
    pub fn new(
        config: PipelineConfig,
        scheduler: Arc<dyn SchedulerGateway>,
    ) -> PipelineResult<Self> {
        config.ensure_layout()?;
        let store = RunStore::new(config.runs_dir());
        let scripts = ScriptGenerator::new(&config);
        Ok(Self {
            config,
            store,
            scripts,
            scheduler,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // --- run lifecycle ----------------------------------------------------

    pub async fn create_run(
        &self,
        name: Option<String>,
        description: Option<String>,
        account: String,
        adapter_type: Option<String>,
    ) -> PipelineResult<Run> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = Run::new(run_id, name, description, account, adapter_type, Utc::now());
        self.store.create(&run)?;
        info!("created run {}", run.run_id);
        Ok(run)
    }

    pub async fn list_runs(&self) -> PipelineResult<Vec<Run>> {
        let mut runs = self.store.list()?;
        for run in &mut runs {
            // Unreadable-state placeholders carry no account and cannot be
            // reconciled or persisted.
            if run.account.is_empty() && run.status == RunStatus::Failed {
                continue;
            }
            let lock = self.run_lock(&run.run_id).await;
            let _guard = lock.lock().await;
            if reconcile_flags(run, &self.store.run_dir(&run.run_id), Utc::now()) {
                if let Err(e) = self.store.save(run) {
                    warn!("run {}: failed to persist reconciled state: {e}", run.run_id);
                }
            }
        }
        Ok(runs)
    }

    pub async fn get_run(&self, run_id: &str) -> PipelineResult<Run> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;
        let mut run = self.store.load(run_id)?;
        if reconcile_flags(&mut run, &self.store.run_dir(run_id), Utc::now()) {
            self.store.save(&run)?;
        }
        Ok(run)
    }

    /// Delete a run: best-effort cancel of any running jobs, then remove the
    /// directory tree and the run's generated scripts. Idempotent.
    pub async fn delete_run(&self, run_id: &str) -> PipelineResult<()> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        match self.store.load(run_id) {
            Ok(run) => {
                for stage in Stage::ALL {
                    let state = run.stage(stage);
                    if state.status == StageStatus::Running {
                        if let Some(job_id) = &state.job_id {
                            self.scheduler.cancel(job_id).await;
                        }
                    }
                }
            }
            Err(PipelineError::RunNotFound(_)) | Err(PipelineError::StateCorrupt { .. }) => {}
            Err(e) => return Err(e),
        }

        self.store.delete(run_id)?;
        self.scripts.cleanup_run_scripts(run_id)?;
        self.locks.lock().await.remove(run_id);
        info!("deleted run {run_id}");
        Ok(())
    }

    pub async fn update_adapter(&self, run_id: &str, adapter_type: String) -> PipelineResult<Run> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(run_id)?;
        let now = Utc::now();
        reconcile_flags(&mut run, &self.store.run_dir(run_id), now);
        if run.stage(Stage::Trim).status == StageStatus::Running {
            return Err(PipelineError::Conflict(format!(
                "run {run_id}: adapter type cannot change while trim is running"
            )));
        }
        run.parameters
            .insert("adapter_type".to_string(), adapter_type);
        run.updated_at = now;
        self.store.save(&run)?;
        Ok(run)
    }

    // --- stage operations -------------------------------------------------

    pub async fn validate_stage(
        &self,
        run_id: &str,
        stage: Stage,
    ) -> PipelineResult<StageValidation> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(run_id)?;
        let run_dir = self.store.run_dir(run_id);
        if reconcile_flags(&mut run, &run_dir, Utc::now()) {
            self.store.save(&run)?;
        }
        Ok(validate::validate_stage(
            &run,
            stage,
            &run_dir,
            &self.config.shared_reference_dir(),
        ))
    }

    pub fn validate_samples(&self, run_id: &str) -> PipelineResult<SampleValidation> {
        if !self.store.exists(run_id) {
            return Err(PipelineError::RunNotFound(run_id.to_string()));
        }
        Ok(validate::validate_sample_pairs(&self.store.run_dir(run_id)))
    }

    /// Submit one stage. Holds the per-run lock across the whole sequence:
    /// reconcile, gate on dependencies and validation, guard reruns, clean
    /// up prior outputs when confirmed, render the script, submit, persist.
    /// Any failure before submission leaves the stored state untouched by
    /// the submission itself.
    pub async fn submit_stage(
        &self,
        run_id: &str,
        stage: Stage,
        account: &str,
        confirm_rerun: bool,
        force: bool,
    ) -> PipelineResult<StageState> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(run_id)?;
        let run_dir = self.store.run_dir(run_id);
        let now = Utc::now();

        let mut changed = reconcile_flags(&mut run, &run_dir, now);
        changed |= self.reconcile_with_scheduler(&mut run, &run_dir, stage, now).await?;
        if changed {
            self.store.save(&run)?;
        }

        if run.stage(stage).status == StageStatus::Running {
            return Err(PipelineError::Conflict(format!(
                "stage '{stage}' of run {run_id} is already running (job {})",
                run.stage(stage).job_id.as_deref().unwrap_or("?")
            )));
        }

        if !force {
            for dep in stage.depends_on() {
                if run.stage(*dep).status != StageStatus::Completed {
                    return Err(PipelineError::Dependency {
                        stage: stage.as_str().to_string(),
                        dependency: dep.as_str().to_string(),
                    });
                }
            }
            let validation = validate::validate_stage(
                &run,
                stage,
                &run_dir,
                &self.config.shared_reference_dir(),
            );
            if !validation.valid {
                return Err(PipelineError::Validation {
                    stage: stage.as_str().to_string(),
                    errors: validation.errors,
                    warnings: validation.warnings,
                });
            }
        }

        let flag_path = run_dir.join(stage.done_flag());
        if flag_path.exists() && !confirm_rerun {
            return Err(PipelineError::RerunRequired {
                stage: stage.as_str().to_string(),
            });
        }
        if confirm_rerun {
            self.cleanup_stage_outputs(&run_dir, stage)?;
        }

        let script = self
            .scripts
            .generate(stage, run_id, account, &run.parameters)?;
        let job_id = self.scheduler.submit(&script).await?;
        info!("run {run_id}: submitted {stage} as job {job_id}");

        let state = run.stage_mut(stage);
        state.status = StageStatus::Running;
        state.job_id = Some(job_id);
        state.updated_at = now;
        run.derive_status();
        run.updated_at = now;
        self.store.save(&run)?;
        Ok(run.stage(stage).clone())
    }

    /// Current stage state after reconciliation. Cheap by design: one state
    /// file read plus at most one scheduler query, for this stage only.
    pub async fn stage_status(&self, run_id: &str, stage: Stage) -> PipelineResult<StageState> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(run_id)?;
        let run_dir = self.store.run_dir(run_id);
        let now = Utc::now();
        let mut changed = reconcile_flags(&mut run, &run_dir, now);
        changed |= self.reconcile_with_scheduler(&mut run, &run_dir, stage, now).await?;
        if changed {
            self.store.save(&run)?;
        }
        Ok(run.stage(stage).clone())
    }

    /// Best-effort cancel. The stage keeps its current status; the next
    /// reconciliation reads the outcome back from the scheduler.
    pub async fn cancel_stage(&self, run_id: &str, stage: Stage) -> PipelineResult<()> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let run = self.store.load(run_id)?;
        let state = run.stage(stage);
        if state.status == StageStatus::Running {
            if let Some(job_id) = &state.job_id {
                self.scheduler.cancel(job_id).await;
            }
        }
        Ok(())
    }

    pub async fn stage_logs(&self, run_id: &str, stage: Stage) -> PipelineResult<StageLogs> {
        let run = self.store.load(run_id)?;
        let Some(job_id) = run.stage(stage).job_id.clone() else {
            return Err(PipelineError::NotFound(format!(
                "no job has been submitted for stage '{stage}' of run {run_id}"
            )));
        };

        let run_dir = self.store.run_dir(run_id);
        let stdout_file = find_log_file(&run_dir, &format!("{job_id}.out"));
        let stderr_file = find_log_file(&run_dir, &format!("{job_id}.err"));

        let stdout = match &stdout_file {
            Some(path) => fs::read_to_string(path)
                .unwrap_or_else(|e| format!("error reading stdout log: {e}")),
            None => format!(
                "log file not found for job {job_id}; the job may still be pending"
            ),
        };
        let stderr = match &stderr_file {
            Some(path) => fs::read_to_string(path)
                .unwrap_or_else(|e| format!("error reading stderr log: {e}")),
            None => format!("error log not found for job {job_id}"),
        };

        Ok(StageLogs {
            stage: stage.as_str().to_string(),
            job_id,
            stdout,
            stderr,
            stdout_file: stdout_file.map(|p| p.to_string_lossy().to_string()),
            stderr_file: stderr_file.map(|p| p.to_string_lossy().to_string()),
        })
    }

    pub async fn accounts(&self) -> Vec<String> {
        self.scheduler.accounts().await
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.store.run_dir(run_id)
    }

    pub fn run_exists(&self, run_id: &str) -> bool {
        self.store.exists(run_id)
    }

    // --- reconciliation ---------------------------------------------------

    /// Scheduler-backed reconciliation for one stage: only consulted when the
    /// done-flag is absent and a job id is on record.
    async fn reconcile_with_scheduler(
        &self,
        run: &mut Run,
        run_dir: &Path,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> PipelineResult<bool> {
        if run_dir.join(stage.done_flag()).exists() {
            return Ok(false);
        }
        let Some(job_id) = run.stage(stage).job_id.clone() else {
            return Ok(false);
        };
        let previous = run.stage(stage).status;
        let status = match self.scheduler.status(&job_id).await? {
            JobState::Running | JobState::Pending => StageStatus::Running,
            // The scheduler says the job finished cleanly but the stage never
            // wrote its flag: silent success is failure.
            JobState::Completed => StageStatus::Failed,
            JobState::Failed => StageStatus::Failed,
            JobState::Cancelled => StageStatus::Cancelled,
            JobState::Unknown => previous,
        };
        if status == previous {
            return Ok(false);
        }
        let state = run.stage_mut(stage);
        state.status = status;
        state.updated_at = now;
        run.derive_status();
        run.updated_at = now;
        Ok(true)
    }

    // --- rerun cleanup ----------------------------------------------------

    /// Remove the stage's primary outputs and its done-flag. `logs/`
    /// subdirectories and `star/genome_index/` are never touched. A partial
    /// failure is appended to the run log and aborts the submission; the
    /// stage stays blocked until cleanup succeeds.
    fn cleanup_stage_outputs(&self, run_dir: &Path, stage: Stage) -> PipelineResult<()> {
        let mut failures = Vec::new();

        for pattern in stage.cleanup_globs() {
            let (parent_rel, leaf) = pattern
                .rsplit_once('/')
                .expect("cleanup globs are directory-qualified");
            let parent = run_dir.join(parent_rel);
            if leaf.contains('*') {
                let Ok(entries) = fs::read_dir(&parent) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name == "logs" || name == "genome_index" {
                        continue;
                    }
                    if glob_match(&name, leaf) {
                        remove_path(&entry.path(), &mut failures);
                    }
                }
            } else {
                let path = parent.join(leaf);
                if path.exists() {
                    remove_path(&path, &mut failures);
                }
            }
        }

        let flag = run_dir.join(stage.done_flag());
        if flag.exists() {
            remove_path(&flag, &mut failures);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let detail = failures.join("; ");
            append_run_log(
                run_dir,
                &format!("cleanup for stage '{stage}' incomplete: {detail}"),
            );
            Err(PipelineError::Cleanup {
                stage: stage.as_str().to_string(),
                detail,
            })
        }
    }
}

/// Disk-only reconciliation: a stage is completed iff its done-flag exists.
/// A completed record whose flag has vanished is demoted so the completion
/// invariant holds both ways: to failed when a job ran, back to pending when
/// none ever did. Returns whether anything changed; running it twice in a
/// row is a no-op.
pub fn reconcile_flags(run: &mut Run, run_dir: &Path, now: DateTime<Utc>) -> bool {
    let mut changed = false;
    for stage in Stage::ALL {
        let flag_exists = run_dir.join(stage.done_flag()).exists();
        let state = run.stage_mut(stage);
        if flag_exists && state.status != StageStatus::Completed {
            state.status = StageStatus::Completed;
            state.updated_at = now;
            changed = true;
        } else if !flag_exists && state.status == StageStatus::Completed {
            state.status = if state.job_id.is_some() {
                StageStatus::Failed
            } else {
                StageStatus::Pending
            };
            state.updated_at = now;
            changed = true;
        }
    }
    if changed {
        run.derive_status();
        run.updated_at = now;
    }
    changed
}

fn remove_path(path: &Path, failures: &mut Vec<String>) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            failures.push(format!("{}: {e}", path.display()));
        }
    }
}

/// Single-`*` filename match: `*_paired.fq.gz`, `counts.txt`, `*.bam`.
fn glob_match(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => name == pattern,
    }
}

/// Depth-first search for a scheduler log file by suffix, skipping nothing:
/// job logs land either next to stage outputs or under `logs/`.
fn find_log_file(run_dir: &Path, suffix: &str) -> Option<PathBuf> {
    let mut stack = vec![run_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(suffix))
                .unwrap_or(false)
            {
                return Some(path);
            }
        }
    }
    None
}

fn append_run_log(run_dir: &Path, message: &str) {
    let log_path = run_dir.join("logs").join("controller.log");
    let _ = fs::create_dir_all(run_dir.join("logs"));
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(mut file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = writeln!(file, "{stamp} {message}");
    }
    warn!("{message}");
}

#[cfg(test)]
mod tests;
