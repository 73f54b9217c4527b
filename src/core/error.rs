//! Error taxonomy for the pipeline core.
//!
//! Each variant corresponds to one boundary outcome; the web surface maps
//! them onto HTTP status codes in `interfaces::web::error`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No run directory or state file for this id.
    #[error("run {0} not found")]
    RunNotFound(String),

    /// Stage name outside the canonical set.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// A named resource (results file, log, QC report) is missing.
    #[error("{0}")]
    NotFound(String),

    /// Creation collision or an operation that conflicts with current state.
    #[error("{0}")]
    Conflict(String),

    /// A completed stage needs explicit confirmation before re-running.
    #[error(
        "stage '{stage}' was previously completed; re-running will delete its previous \
         results. Set confirm_rerun=true to proceed"
    )]
    RerunRequired { stage: String },

    /// Preflight validation failed; `errors` is never empty.
    #[error("validation failed for stage '{stage}': {}", .errors.join("; "))]
    Validation {
        stage: String,
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    /// A prerequisite stage has not completed.
    #[error("dependency {dependency} not completed for stage '{stage}'")]
    Dependency { stage: String, dependency: String },

    /// Malformed request input (bad file type, bad extension, bad adapter).
    #[error("{0}")]
    InvalidRequest(String),

    /// The batch scheduler rejected or failed an operation, or timed out.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Missing template or an unresolved placeholder in one.
    #[error("template error: {0}")]
    Template(String),

    /// Install or work directory misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rerun cleanup could not remove prior outputs; the stage stays blocked.
    #[error("cleanup incomplete for stage '{stage}': {detail}")]
    Cleanup { stage: String, detail: String },

    /// `run_state.json` exists but does not parse.
    #[error("run state corrupt at {}: {detail}", .path.display())]
    StateCorrupt { path: PathBuf, detail: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
