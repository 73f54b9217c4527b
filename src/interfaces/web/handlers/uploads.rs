use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::core::error::PipelineError;
use crate::core::validate::SampleValidation;

use super::super::AppState;
use super::super::error::{ApiError, ApiResult};

/// Destination subdirectory by extension. Everything else is rejected.
fn destination_for(filename: &str) -> Option<&'static str> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".fq.gz") || lower.ends_with(".fastq.gz") {
        Some("raw")
    } else if lower.ends_with(".fa") || lower.ends_with(".fasta") || lower.ends_with(".gtf") {
        Some("reference")
    } else if lower.ends_with(".csv") || lower.ends_with(".tsv") {
        Some("metadata")
    } else {
        None
    }
}

/// Multipart upload of input artifacts. Every routable file is written;
/// per-file failures are reported and make the whole response a 400.
pub async fn upload_files(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    if !state.controller.run_exists(&run_id) {
        return Err(ApiError(PipelineError::RunNotFound(run_id)));
    }
    let run_dir = state.controller.run_dir(&run_id);

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(PipelineError::InvalidRequest(format!("bad multipart body: {e}"))))?
    {
        let Some(filename) = field.file_name().map(|n| n.to_string()) else {
            continue;
        };
        if filename.contains('/') || filename.contains("..") {
            errors.push(format!("{filename}: invalid file name"));
            continue;
        }
        let data = field.bytes().await.map_err(|e| {
            ApiError(PipelineError::InvalidRequest(format!(
                "failed to read upload {filename}: {e}"
            )))
        })?;

        match destination_for(&filename) {
            Some(subdir) => {
                let dest_dir = run_dir.join(subdir);
                if let Err(e) = std::fs::create_dir_all(&dest_dir) {
                    errors.push(format!("{filename}: cannot create {subdir}/: {e}"));
                    continue;
                }
                let dest = dest_dir.join(&filename);
                match std::fs::write(&dest, &data) {
                    Ok(()) => uploaded.push(serde_json::json!({
                        "filename": filename,
                        "size": data.len(),
                        "destination": subdir,
                    })),
                    Err(e) => errors.push(format!("{filename}: write failed: {e}")),
                }
            }
            None => errors.push(format!(
                "{filename}: unsupported file type; allowed: .fq.gz, .fastq.gz, .fa, .fasta, \
                 .gtf, .csv, .tsv"
            )),
        }
    }

    let body = serde_json::json!({
        "message": format!("uploaded {} file(s)", uploaded.len()),
        "files": uploaded,
        "errors": errors,
    });
    let status = if errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(body)).into_response())
}

pub async fn validate_samples(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SampleValidation>> {
    Ok(Json(state.controller.validate_samples(&run_id)?))
}
