//! Thin gateway over the cluster's batch tools. Everything external goes
//! through `tokio::process::Command` with a timeout; the rest of the crate
//! only sees the five canonical job states plus Unknown.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::config::PipelineConfig;
use crate::core::error::{PipelineError, PipelineResult};

/// Canonical job states. Native scheduler vocabulary collapses onto these;
/// anything ambiguous is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl JobState {
    /// Map one raw scheduler state word (long or compact form) onto the
    /// canonical set. `CANCELLED by <uid>` arrives with a payload; only the
    /// first word matters.
    pub fn from_slurm(raw: &str) -> Self {
        let word = raw.split_whitespace().next().unwrap_or("").to_uppercase();
        match word.as_str() {
            "PENDING" | "PD" | "CONFIGURING" | "CF" | "REQUEUED" | "RQ" | "SUSPENDED" | "S" => {
                JobState::Pending
            }
            "RUNNING" | "R" | "COMPLETING" | "CG" => JobState::Running,
            "COMPLETED" | "CD" => JobState::Completed,
            "FAILED" | "F" | "TIMEOUT" | "TO" | "OUT_OF_MEMORY" | "OOM" | "NODE_FAIL" | "NF"
            | "PREEMPTED" | "PR" | "BOOT_FAIL" | "BF" | "DEADLINE" => JobState::Failed,
            w if w.starts_with("CANCELLED") || w == "CA" => JobState::Cancelled,
            _ => JobState::Unknown,
        }
    }
}

#[async_trait]
pub trait SchedulerGateway: Send + Sync {
    /// Submit a generated script; returns the scheduler-assigned job id.
    async fn submit(&self, script: &Path) -> PipelineResult<String>;

    /// Resolve the state of one job: live queue first, then accounting.
    async fn status(&self, job_id: &str) -> PipelineResult<JobState>;

    /// Best-effort cancellation. Failures are logged, never surfaced.
    async fn cancel(&self, job_id: &str);

    /// Charge accounts available to the caller. Never fails: falls back to a
    /// deterministic default list.
    async fn accounts(&self) -> Vec<String>;
}

const FALLBACK_ACCOUNTS: [&str; 3] = ["default", "general", "standard"];

pub struct SlurmGateway {
    timeout: Duration,
    user: String,
}

impl SlurmGateway {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            timeout: config.scheduler_timeout,
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> PipelineResult<Output> {
        let fut = tokio::process::Command::new(program).args(args).output();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(PipelineError::Scheduler(format!(
                "failed to invoke {program}: {e}"
            ))),
            Err(_) => Err(PipelineError::Scheduler(format!(
                "{program} timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl SchedulerGateway for SlurmGateway {
    async fn submit(&self, script: &Path) -> PipelineResult<String> {
        let script_arg = script.to_string_lossy().to_string();
        let output = self.run("sbatch", &[script_arg.as_str()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Scheduler(format!(
                "sbatch rejected {}: {}",
                script.display(),
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_sbatch_job_id(&stdout).ok_or_else(|| {
            PipelineError::Scheduler(format!(
                "sbatch output carried no job id: {}",
                stdout.trim()
            ))
        })
    }

    async fn status(&self, job_id: &str) -> PipelineResult<JobState> {
        // Live queue first.
        if let Ok(output) = self.run("squeue", &["-j", job_id, "-h", "-o", "%T"]).await {
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(line) = stdout.lines().find(|l| !l.trim().is_empty()) {
                    return Ok(JobState::from_slurm(line.trim()));
                }
            }
        }

        // Fall back to historical accounting.
        let output = self
            .run(
                "sacct",
                &[
                    "-j",
                    job_id,
                    "--format=JobID,State",
                    "--noheader",
                    "--parsable2",
                ],
            )
            .await?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(state) = parse_sacct_state(&stdout, job_id) {
                return Ok(state);
            }
        }
        Ok(JobState::Unknown)
    }

    async fn cancel(&self, job_id: &str) {
        match self.run("scancel", &[job_id]).await {
            Ok(output) if output.status.success() => {
                info!("cancelled job {job_id}");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("scancel {job_id} failed: {}", stderr.trim());
            }
            Err(e) => warn!("scancel {job_id} failed: {e}"),
        }
    }

    async fn accounts(&self) -> Vec<String> {
        match self.run("allocations", &[]).await {
            Ok(output) if output.status.success() => {
                let accounts = parse_allocations(&String::from_utf8_lossy(&output.stdout));
                if !accounts.is_empty() {
                    return accounts;
                }
                warn!("allocations produced no accounts, trying sacctmgr");
            }
            Ok(_) | Err(_) => warn!("allocations unavailable, trying sacctmgr"),
        }

        let user_arg = format!("user={}", self.user);
        match self
            .run(
                "sacctmgr",
                &["show", "associations", user_arg.as_str(), "-n", "-P"],
            )
            .await
        {
            Ok(output) if output.status.success() => {
                let accounts = parse_sacctmgr(&String::from_utf8_lossy(&output.stdout));
                if !accounts.is_empty() {
                    return accounts;
                }
            }
            Ok(_) | Err(_) => {}
        }

        warn!("account discovery failed, using fallback list");
        FALLBACK_ACCOUNTS.iter().map(|s| s.to_string()).collect()
    }
}

/// `Submitted batch job 12345` → `12345`.
pub fn parse_sbatch_job_id(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("Submitted batch job ") {
            let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !id.is_empty() {
                return Some(id);
            }
        }
    }
    None
}

/// Pick the parent job row out of parsable sacct output, skipping `.batch`
/// and `.extern` steps.
pub fn parse_sacct_state(stdout: &str, job_id: &str) -> Option<JobState> {
    for line in stdout.lines() {
        let mut fields = line.trim().split('|');
        let (Some(id), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        if id == job_id {
            return Some(JobState::from_slurm(state));
        }
    }
    // No exact match; any step row still tells us something.
    stdout
        .lines()
        .find_map(|line| line.trim().split('|').nth(1))
        .map(JobState::from_slurm)
}

/// Parse the site `allocations` table: two header lines, then
/// `Account Balance Reserved Available` rows, with trailing help text.
pub fn parse_allocations(stdout: &str) -> Vec<String> {
    let mut accounts = Vec::new();
    for line in stdout.lines().skip(2) {
        let line = line.trim();
        if line.is_empty() || line.starts_with("for more information") || line.starts_with("run:")
        {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 4 {
            let name = parts[0];
            let looks_like_help = ["more", "information", "run:", "help"]
                .iter()
                .any(|w| name.to_lowercase().contains(w));
            if !looks_like_help {
                accounts.push(name.to_string());
            }
        }
    }
    accounts
}

/// Parse `sacctmgr show associations -n -P` output; account is column 2.
pub fn parse_sacctmgr(stdout: &str) -> Vec<String> {
    let mut accounts: Vec<String> = stdout
        .lines()
        .filter_map(|line| line.split('|').nth(1))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    accounts.sort();
    accounts.dedup();
    accounts
}
