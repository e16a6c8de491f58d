//! Per-worker health/readiness HTTP surface. Every worker binary starts
//! one of these alongside its broker consumer; graceful shutdown stops
//! the health endpoint only after in-flight handlers have drained (spec
//! §4.5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared readiness flag: `false` until topology declaration and the
/// first successful broker connection complete, and flipped back to
/// `false` the moment graceful shutdown begins consuming no further
/// messages.
#[derive(Clone, Default)]
pub struct ReadinessState(Arc<AtomicBool>);

impl ReadinessState {
    /// A readiness flag starting `false`.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Mark the worker ready to receive traffic/consume.
    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Mark the worker no longer ready (shutdown in progress).
    pub fn set_not_ready(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(State(state): State<ReadinessState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Build the `/health` (liveness) and `/ready` (readiness) router.
#[must_use]
pub fn create_router(state: ReadinessState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

/// Bind and serve the health router on `port`, shutting down cleanly when
/// `shutdown` is cancelled.
pub async fn serve_with_graceful_shutdown(
    port: u16,
    state: ReadinessState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "health endpoint listening");

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn readiness_reflects_state() {
        let state = ReadinessState::new();
        let router = create_router(state.clone());

        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ready")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready();
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ready")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
