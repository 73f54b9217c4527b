pub mod error;
mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::core::controller::RunController;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) controller: Arc<RunController>,
}

/// Build the full API router for a controller. Tests run this directly on an
/// ephemeral port.
pub fn api_router(controller: Arc<RunController>) -> axum::Router {
    router::build_api_router(AppState { controller })
}

pub struct ApiServer {
    controller: Arc<RunController>,
    api_host: String,
    api_port: u16,
}

impl ApiServer {
    pub fn new(controller: Arc<RunController>, api_host: String, api_port: u16) -> Self {
        Self {
            controller,
            api_host,
            api_port,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let app = router::build_api_router(AppState {
            controller: self.controller,
        });
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("ExpressDiff API running at http://{addr}");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
