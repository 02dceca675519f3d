mod routes;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::ServerConfig, Result};

/// Health and metrics endpoint for the operator.
pub struct Server {
    addr: String,
}

impl Server {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            addr: config.addr.clone(),
        }
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    pub async fn start(self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Metrics server listening on {}", self.addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
