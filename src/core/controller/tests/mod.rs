
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::core::config::PipelineConfig;
use crate::core::controller::RunController;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::run::Run;
use crate::core::slurm::{JobState, SchedulerGateway};
use crate::core::stage::Stage;

/// Scripted scheduler: hands out sequential job ids and reports whatever
/// state the test installed for a job.
pub struct FakeScheduler {
    statuses: Mutex<HashMap<String, JobState>>,
    submitted: Mutex<Vec<PathBuf>>,
    cancelled: Mutex<Vec<String>>,
    next_id: AtomicU64,
    fail_submit: AtomicBool,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
            fail_submit: AtomicBool::new(false),
        }
    }

    pub fn set_status(&self, job_id: &str, state: JobState) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), state);
    }

    pub fn fail_next_submit(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<PathBuf> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchedulerGateway for FakeScheduler {
    async fn submit(&self, script: &Path) -> PipelineResult<String> {
        if self.fail_submit.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::Scheduler("sbatch rejected script".into()));
        }
        self.submitted.lock().unwrap().push(script.to_path_buf());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.statuses
            .lock()
            .unwrap()
            .insert(id.clone(), JobState::Running);
        Ok(id)
    }

    async fn status(&self, job_id: &str) -> PipelineResult<JobState> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(JobState::Unknown))
    }

    async fn cancel(&self, job_id: &str) {
        self.cancelled.lock().unwrap().push(job_id.to_string());
    }

    async fn accounts(&self) -> Vec<String> {
        vec!["acct-A".to_string()]
    }
}

pub fn write_templates(install_dir: &Path) {
    let templates = install_dir.join("slurm_templates");
    fs::create_dir_all(&templates).unwrap();
    for stage in Stage::ALL {
        // Same shape as the shipped templates: assign from the placeholder,
        // then dereference the shell variable.
        let body = format!(
            "#!/bin/bash\n#SBATCH --account={{ACCOUNT}}\n#SBATCH --job-name={}_{{RUN_ID}}\n\
             RUN_DIR={{RUN_DIR}}\nBASE_DIR={{BASE_DIR}}\nADAPTER={{ADAPTER_TYPE}}\n\
             cd \"${{RUN_DIR}}\"\necho \"${{BASE_DIR}}\" \"${{ADAPTER}}\"\n",
            stage.as_str()
        );
        fs::write(templates.join(stage.template_name()), body).unwrap();
    }
}

/// Controller against a temporary install/work tree and a fake scheduler.
pub fn harness() -> (tempfile::TempDir, Arc<FakeScheduler>, RunController) {
    let dir = tempfile::tempdir().unwrap();
    let install = dir.path().join("install");
    let work = dir.path().join("work");
    write_templates(&install);
    let scheduler = Arc::new(FakeScheduler::new());
    let controller = RunController::new(
        PipelineConfig::new(install, work),
        scheduler.clone() as Arc<dyn SchedulerGateway>,
    )
    .unwrap();
    (dir, scheduler, controller)
}

pub fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

/// Paired FASTQ inputs so qc_raw/trim validation passes.
pub fn seed_raw_inputs(run_dir: &Path) {
    touch(&run_dir.join("raw").join("sample1_1.fq.gz"));
    touch(&run_dir.join("raw").join("sample1_2.fq.gz"));
}

pub async fn create_run(controller: &RunController) -> Run {
    controller
        .create_run(Some("test".into()), None, "acct-A".into(), None)
        .await
        .unwrap()
}
