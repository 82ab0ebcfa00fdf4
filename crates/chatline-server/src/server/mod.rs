use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chatline_hub::{ChatHub, HubError, Notice, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::auth::JwtVerifier;
use crate::config::ServerConfig;
use crate::shutdown::ShutdownController;
use crate::store::ConversationStore;

pub mod routes;

/// Notice sent to every connection when the server stops.
pub const SHUTDOWN_NOTICE: &str = "Server shutting down.";

/// Shared state of the HTTP and WebSocket handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub hub: ChatHub,
    pub store: Arc<ConversationStore>,
    pub verifier: Arc<JwtVerifier>,
    pub shutdown: ShutdownController,
}

impl AppState {
    /// Build the store, verifier and hub. Returns the registry task too.
    pub fn new(
        config: ServerConfig,
        shutdown: ShutdownController,
    ) -> Result<(Arc<Self>, JoinHandle<()>), HubError> {
        let store = Arc::new(ConversationStore::new());
        let verifier = Arc::new(JwtVerifier::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
        ));
        let (hub, registry_task) = ChatHub::start(config.hub.clone(), store.clone(), verifier.clone())?;

        let state = Arc::new(Self {
            config,
            hub,
            store,
            verifier,
            shutdown,
        });
        Ok((state, registry_task))
    }

    /// Tell every client the server is going away, then close all connections.
    pub async fn close_connections(&self) {
        if let Err(e) = self.hub.broadcast_notice(&Notice::new(SHUTDOWN_NOTICE)).await {
            warn!(error = %e, "Failed to broadcast shutdown notice");
        }
        match self.hub.shutdown().await {
            Ok(closed) => info!(connections = closed, "Closed all chat connections"),
            Err(e) => warn!(error = %e, "Hub was already stopped"),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "not_implemented"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => Self::NotFound(msg),
            ServiceError::InvalidRequest(msg) => Self::BadRequest(msg),
            ServiceError::Conflict(msg) => Self::Conflict(msg),
            ServiceError::Unauthorized(msg) => Self::Unauthorized(msg),
            ServiceError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            warn!(status = %status, error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Bind the configured address and serve until a shutdown signal arrives.
pub async fn start(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    let shutdown = ShutdownController::new(config.shutdown_grace);
    let (state, registry_task) = AppState::new(config, shutdown.clone())?;

    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await })
    };
    let result = serve(listener, state, registry_task).await;
    signals.abort();
    result
}

/// Serve on an already bound listener until the state's shutdown controller
/// is triggered.
///
/// On shutdown the listener stops accepting, every chat connection gets a
/// notice and is closed, and open connections get the grace period to drain.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    registry_task: JoinHandle<()>,
) -> Result<()> {
    let app = router(state.clone());
    info!("Chatline server listening on {}", listener.local_addr()?);

    let stop = state.shutdown.stop_token();
    let closing = {
        let state = state.clone();
        async move {
            stop.cancelled().await;
            info!("Shutdown requested, closing connections");
            state.close_connections().await;
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(closing)
        .await?;

    state.shutdown.drain().await;
    if let Err(e) = registry_task.await {
        warn!(error = %e, "Registry task ended abnormally");
    }
    info!("Chatline server stopped");
    Ok(())
}

/// Create the router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .merge(routes::conversations::router())
        .merge(routes::websocket::router())
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

/// Service status plus live connection counts.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.hub.registry().snapshot().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "chatline-server",
                "version": env!("CARGO_PKG_VERSION"),
                "users": snapshot.user_count(),
                "connections": snapshot.connection_count(),
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Health check: registry unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "chatline-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": e.to_string(),
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let shutdown = ShutdownController::new(std::time::Duration::from_secs(1));
        let (state, _task) = AppState::new(ServerConfig::for_tests(), shutdown).unwrap();
        state
    }

    #[test]
    fn test_service_error_status_codes() {
        let cases = [
            (ServiceError::NotFound("c1".into()), StatusCode::NOT_FOUND),
            (ServiceError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (ServiceError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ServiceError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::not_implemented("not yet").into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "not_implemented");
        assert_eq!(body.message, "not yet");
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["users"], 0);
    }

    #[tokio::test]
    async fn test_health_after_hub_shutdown() {
        let state = test_state().await;
        state.close_connections().await;

        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
