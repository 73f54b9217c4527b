use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::handlers::{results, runs, stages, system, uploads};

/// 1 GiB upload ceiling, matching the largest expected FASTQ batch.
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub fn build_api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(system::health))
        .route("/user", get(system::user_info))
        .route("/storage-info", get(system::storage_info))
        .route("/accounts", get(system::accounts))
        .route("/stages", get(system::stages))
        .route("/runs", post(runs::create_run).get(runs::list_runs))
        .route(
            "/runs/{run_id}",
            get(runs::get_run).delete(runs::delete_run),
        )
        .route("/runs/{run_id}/adapter", put(runs::update_adapter))
        .route("/runs/{run_id}/upload", post(uploads::upload_files))
        .route("/runs/{run_id}/samples", get(uploads::validate_samples))
        .route(
            "/runs/{run_id}/stages/{stage}/validate",
            get(stages::validate_stage),
        )
        .route("/runs/{run_id}/stages/{stage}", post(stages::submit_stage))
        .route(
            "/runs/{run_id}/stages/{stage}/status",
            get(stages::stage_status),
        )
        .route("/runs/{run_id}/stages/{stage}/logs", get(stages::stage_logs))
        .route(
            "/runs/{run_id}/stages/{stage}/cancel",
            post(stages::cancel_stage),
        )
        .route(
            "/runs/{run_id}/featurecounts-summary",
            get(results::featurecounts_summary),
        )
        .route("/runs/{run_id}/deseq2-results", get(results::deseq2_results))
        .route(
            "/runs/{run_id}/deseq2-download/{file_type}",
            get(results::deseq2_download),
        )
        .route("/runs/{run_id}/qc/list", get(results::qc_list))
        .route(
            "/runs/{run_id}/qc/{stage}/{*path}",
            get(results::qc_file),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
