use axum::{
    Json,
    extract::{Path, State},
};
use chrono::SecondsFormat;
use serde::Deserialize;

use crate::core::controller::StageLogs;
use crate::core::validate::StageValidation;

use super::super::AppState;
use super::super::error::ApiResult;
use super::parse_stage;

pub async fn validate_stage(
    Path((run_id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<StageValidation>> {
    let stage = parse_stage(&stage)?;
    Ok(Json(state.controller.validate_stage(&run_id, stage).await?))
}

#[derive(Deserialize)]
pub struct SubmitStageRequest {
    pub account: String,
    #[serde(default)]
    pub confirm_rerun: bool,
    #[serde(default)]
    pub force: bool,
}

pub async fn submit_stage(
    Path((run_id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<SubmitStageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let stage = parse_stage(&stage)?;
    let submitted = state
        .controller
        .submit_stage(
            &run_id,
            stage,
            &payload.account,
            payload.confirm_rerun,
            payload.force,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "message": format!("stage {stage} submitted"),
        "stage": stage.as_str(),
        "status": submitted.status.as_str(),
        "job_id": submitted.job_id,
    })))
}

pub async fn stage_status(
    Path((run_id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let stage = parse_stage(&stage)?;
    let status = state.controller.stage_status(&run_id, stage).await?;
    Ok(Json(serde_json::json!({
        "stage": stage.as_str(),
        "status": status.status.as_str(),
        "job_id": status.job_id,
        "updated_at": status
            .updated_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    })))
}

pub async fn stage_logs(
    Path((run_id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<StageLogs>> {
    let stage = parse_stage(&stage)?;
    Ok(Json(state.controller.stage_logs(&run_id, stage).await?))
}

pub async fn cancel_stage(
    Path((run_id, stage)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let stage = parse_stage(&stage)?;
    state.controller.cancel_stage(&run_id, stage).await?;
    Ok(Json(serde_json::json!({
        "message": format!("cancellation requested for stage {stage}"),
    })))
}
