use std::path::{Component, Path as FsPath, PathBuf};

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::core::error::PipelineError;
use crate::core::results;
use crate::core::stage::Stage;

use super::super::AppState;
use super::super::error::{ApiError, ApiResult};

fn run_dir_checked(state: &AppState, run_id: &str) -> Result<PathBuf, ApiError> {
    if !state.controller.run_exists(run_id) {
        return Err(ApiError(PipelineError::RunNotFound(run_id.to_string())));
    }
    Ok(state.controller.run_dir(run_id))
}

pub async fn featurecounts_summary(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<results::FeatureCountsSummary>> {
    let run_dir = run_dir_checked(&state, &run_id)?;
    Ok(Json(results::featurecounts_summary(&run_dir)?))
}

pub async fn deseq2_results(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<results::Deseq2Results>> {
    let run_dir = run_dir_checked(&state, &run_id)?;
    Ok(Json(results::deseq2_results(&run_dir)?))
}

pub async fn deseq2_download(
    Path((run_id, file_type)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let run_dir = run_dir_checked(&state, &run_id)?;
    let (path, content_type) = results::deseq2_download(&run_dir, &file_type)?;
    serve_file(&path, content_type)
}

pub async fn qc_list(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let run_dir = run_dir_checked(&state, &run_id)?;
    let mut out = serde_json::Map::new();
    for stage in [Stage::QcRaw, Stage::QcTrimmed] {
        let stage_dir = run_dir.join(stage.as_str());
        if !stage_dir.is_dir() {
            continue;
        }
        let multiqc_report = stage_dir.join("multiqc_out").join("multiqc_report.html");
        let fastqc_dir = stage_dir.join("fastqc_out");
        let done = run_dir.join(stage.done_flag()).exists();

        let mut files = Vec::new();
        if multiqc_report.is_file() {
            files.push(serde_json::json!({
                "name": "MultiQC Report",
                "path": "multiqc_out/multiqc_report.html",
                "type": "html",
                "description": "Aggregated quality control report",
            }));
        }
        let mut fastqc_reports = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&fastqc_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(".html") {
                    fastqc_reports.push(name);
                }
            }
        }
        fastqc_reports.sort();
        for name in &fastqc_reports {
            let sample = name.trim_end_matches(".html");
            files.push(serde_json::json!({
                "name": format!("FastQC - {sample}"),
                "path": format!("fastqc_out/{name}"),
                "type": "html",
                "description": format!("Individual FastQC report for {sample}"),
            }));
        }

        out.insert(
            stage.as_str().to_string(),
            serde_json::json!({
                "completed": done,
                "multiqc_available": multiqc_report.is_file(),
                "fastqc_available": !fastqc_reports.is_empty(),
                "files": files,
            }),
        );
    }
    Ok(Json(serde_json::Value::Object(out)))
}

pub async fn qc_file(
    Path((run_id, stage, path)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let run_dir = run_dir_checked(&state, &run_id)?;
    if stage != "qc_raw" && stage != "qc_trimmed" {
        return Err(ApiError(PipelineError::InvalidRequest(format!(
            "invalid QC stage: {stage}"
        ))));
    }

    // Containment: relative components only, no parent traversal.
    let relative = FsPath::new(&path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(ApiError(PipelineError::InvalidRequest(
            "invalid file path".to_string(),
        )));
    }

    let full = run_dir.join(&stage).join(relative);
    if !full.is_file() {
        return Err(ApiError(PipelineError::NotFound(format!(
            "QC file not found: {path}"
        ))));
    }
    serve_file(&full, content_type_for(&path))
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".html") {
        "text/html; charset=utf-8"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".css") {
        "text/css"
    } else if path.ends_with(".js") {
        "application/javascript"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "application/octet-stream"
    }
}

fn serve_file(path: &FsPath, content_type: &str) -> ApiResult<Response> {
    let bytes = std::fs::read(path).map_err(PipelineError::from)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
