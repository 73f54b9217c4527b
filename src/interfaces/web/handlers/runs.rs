use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use crate::core::error::PipelineError;
use crate::core::run::Run;

use super::super::AppState;
use super::super::error::{ApiError, ApiResult};

/// Trimmomatic adapter sets the UI offers. The core treats the value as an
/// opaque string; membership is enforced here at the surface.
const ADAPTER_TYPES: [&str; 6] = [
    "NexteraPE-PE",
    "TruSeq2-PE",
    "TruSeq2-SE",
    "TruSeq3-PE",
    "TruSeq3-PE-2",
    "TruSeq3-SE",
];

fn check_adapter_type(adapter_type: &str) -> Result<(), ApiError> {
    if ADAPTER_TYPES.contains(&adapter_type) {
        Ok(())
    } else {
        Err(ApiError(PipelineError::InvalidRequest(format!(
            "invalid adapter type '{adapter_type}'; valid options: {}",
            ADAPTER_TYPES.join(", ")
        ))))
    }
}

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub account: String,
    pub adapter_type: Option<String>,
}

pub async fn create_run(
    State(state): State<AppState>,
    Json(payload): Json<CreateRunRequest>,
) -> ApiResult<Json<Run>> {
    if payload.account.trim().is_empty() {
        return Err(ApiError(PipelineError::InvalidRequest(
            "account is required".to_string(),
        )));
    }
    if let Some(adapter_type) = &payload.adapter_type {
        check_adapter_type(adapter_type)?;
    }
    let run = state
        .controller
        .create_run(
            payload.name,
            payload.description,
            payload.account,
            payload.adapter_type,
        )
        .await?;
    Ok(Json(run))
}

pub async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<Run>>> {
    Ok(Json(state.controller.list_runs().await?))
}

pub async fn get_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Run>> {
    Ok(Json(state.controller.get_run(&run_id).await?))
}

pub async fn delete_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.controller.delete_run(&run_id).await?;
    Ok(Json(serde_json::json!({
        "message": format!("run {run_id} deleted"),
    })))
}

#[derive(Deserialize)]
pub struct UpdateAdapterRequest {
    pub adapter_type: String,
}

pub async fn update_adapter(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateAdapterRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    check_adapter_type(&payload.adapter_type)?;
    let run = state
        .controller
        .update_adapter(&run_id, payload.adapter_type.clone())
        .await?;
    Ok(Json(serde_json::json!({
        "message": format!("adapter type updated to {}", payload.adapter_type),
        "run_id": run.run_id,
        "adapter_type": payload.adapter_type,
    })))
}
