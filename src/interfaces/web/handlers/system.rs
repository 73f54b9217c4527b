use axum::{Json, extract::State};
use chrono::{SecondsFormat, Utc};

use crate::core::stage::Stage;

use super::super::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn user_info() -> Json<serde_json::Value> {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    Json(serde_json::json!({
        "username": user,
        "computing_id": user,
    }))
}

pub async fn storage_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.controller.config();
    let storage_type = config.storage_type();
    let description = match storage_type {
        "scratch" => "High-performance scratch storage",
        "home" => "Home directory storage",
        _ => "Custom storage location",
    };
    Json(serde_json::json!({
        "install_directory": config.install_dir.to_string_lossy(),
        "data_directory": config.work_dir.to_string_lossy(),
        "runs_directory": config.runs_dir().to_string_lossy(),
        "storage_type": storage_type,
        "storage_description": description,
        "user": std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        "persistent": true,
    }))
}

pub async fn accounts(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.controller.accounts().await)
}

pub async fn stages() -> Json<serde_json::Value> {
    let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
    Json(serde_json::json!({ "stages": names }))
}
