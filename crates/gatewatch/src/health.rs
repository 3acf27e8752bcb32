//! Liveness flag and the HTTP endpoint that exposes it.
//!
//! The processing path overwrites the flag after every frame and every
//! session failure; the endpoint only ever reads it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::MonitorError;

/// Process-wide health flag. Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    /// A new flag starts unhealthy until the first frame is classified.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Release);
    }

    pub fn set_healthy(&self) {
        self.set(true);
    }

    pub fn set_unhealthy(&self) {
        self.set(false);
    }

    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// `GET` on any path: `200 OK` while healthy, `500 UNHEALTHY` otherwise.
pub fn router(flag: HealthFlag) -> Router {
    Router::new()
        .route("/", get(health_check))
        .fallback(get(health_check))
        .with_state(flag)
}

async fn health_check(State(flag): State<HealthFlag>) -> impl IntoResponse {
    if flag.is_healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "UNHEALTHY")
    }
}

/// Bound health endpoint, ready to serve.
pub struct HealthServer {
    listener: TcpListener,
}

impl HealthServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, MonitorError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MonitorError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(
        self,
        flag: HealthFlag,
        shutdown: CancellationToken,
    ) -> Result<(), MonitorError> {
        info!(addr = %self.local_addr()?, "Health endpoint listening");
        axum::serve(self.listener, router(flag))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}
