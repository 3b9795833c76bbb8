//! Local control surface.
//!
//! HTTP handlers never touch agent state directly. Each request is sent to
//! the scheduler as a [`ControlRequest`] and answered from inside the tick
//! loop, so control operations are serialized with dispatch and drain.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rackwatch_common::Reading;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::{AgentError, Result};
use crate::queue::PendingQueue;

/// Raw store content as seen by the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueContents {
    Present(Vec<u8>),
    NotFound,
}

/// Result of a clear request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Deleted,
    /// The store was already absent. Not a success.
    NotFound,
}

/// A control operation waiting to be serviced by the scheduler.
#[derive(Debug)]
pub enum ControlRequest {
    CurrentReading {
        reply: oneshot::Sender<Reading>,
    },
    QueueContents {
        reply: oneshot::Sender<Result<QueueContents>>,
    },
    ClearQueue {
        reply: oneshot::Sender<Result<ClearOutcome>>,
    },
}

impl ControlRequest {
    /// Answer this request from the retained reading and the pending queue.
    pub async fn respond(self, reading: &Reading, queue: &PendingQueue) {
        // A dropped receiver only means the HTTP client went away.
        match self {
            ControlRequest::CurrentReading { reply } => {
                let _ = reply.send(*reading);
            }
            ControlRequest::QueueContents { reply } => {
                let result = queue.contents().await.map(|content| match content {
                    Some(bytes) => QueueContents::Present(bytes),
                    None => QueueContents::NotFound,
                });
                let _ = reply.send(result);
            }
            ControlRequest::ClearQueue { reply } => {
                let result = queue.clear().await.map(|deleted| {
                    if deleted {
                        info!(path = %queue.path().display(), "Pending store cleared");
                        ClearOutcome::Deleted
                    } else {
                        ClearOutcome::NotFound
                    }
                });
                let _ = reply.send(result);
            }
        }
    }
}

/// Failure to get an answer through the control channel.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("scheduler is not running")]
    Unavailable,

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Client side of the control channel.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    /// Create a handle and the receiver the scheduler services.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> std::result::Result<T, ControlError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControlError::Unavailable)?;
        response.await.map_err(|_| ControlError::Unavailable)
    }

    /// The retained reading (0.0/0.0 before the first valid sample).
    pub async fn current_reading(&self) -> std::result::Result<Reading, ControlError> {
        self.request(|reply| ControlRequest::CurrentReading { reply })
            .await
    }

    /// Raw content of the pending store.
    pub async fn queue_contents(&self) -> std::result::Result<QueueContents, ControlError> {
        Ok(self
            .request(|reply| ControlRequest::QueueContents { reply })
            .await??)
    }

    /// Delete the pending store.
    pub async fn clear_queue(&self) -> std::result::Result<ClearOutcome, ControlError> {
        Ok(self
            .request(|reply| ControlRequest::ClearQueue { reply })
            .await??)
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    handle: ControlHandle,
}

/// Create the HTTP router.
pub fn create_router(handle: ControlHandle) -> Router {
    let state = AppState { handle };

    Router::new()
        .route("/index.php", get(reading_handler))
        .route("/reading", get(reading_handler))
        .route("/data", get(data_handler).delete(delete_handler))
        .route("/delete", get(delete_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(CONTENT_TYPE, "text/plain")],
        "File not found",
    )
        .into_response()
}

fn control_failure(e: ControlError) -> Response {
    match e {
        ControlError::Unavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "Agent not running").into_response()
        }
        ControlError::Agent(e) => {
            error!(error = %e, "Control request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response()
        }
    }
}

/// Handler for the current reading.
async fn reading_handler(State(state): State<AppState>) -> Response {
    match state.handle.current_reading().await {
        Ok(reading) => Json(reading).into_response(),
        Err(e) => control_failure(e),
    }
}

/// Handler returning the raw pending store.
async fn data_handler(State(state): State<AppState>) -> Response {
    match state.handle.queue_contents().await {
        Ok(QueueContents::Present(bytes)) => {
            (StatusCode::OK, [(CONTENT_TYPE, "text/plain")], bytes).into_response()
        }
        Ok(QueueContents::NotFound) => not_found(),
        Err(e) => control_failure(e),
    }
}

/// Handler deleting the pending store.
async fn delete_handler(State(state): State<AppState>) -> Response {
    match state.handle.clear_queue().await {
        Ok(ClearOutcome::Deleted) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain")],
            "File deleted successfully",
        )
            .into_response(),
        Ok(ClearOutcome::NotFound) => not_found(),
        Err(e) => control_failure(e),
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server for the control surface.
pub struct ControlServer {
    handle: ControlHandle,
    listener: TcpListener,
}

impl ControlServer {
    /// Bind the listen address. Failing here is a startup error.
    pub async fn bind(handle: ControlHandle, listen_addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
            AgentError::config(format!("Failed to bind to {}: {}", listen_addr, e))
        })?;

        Ok(Self { handle, listener })
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        let router = create_router(self.handle);

        info!(addr = %addr, "Control server listening");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("Control server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("Control server error: {}", e))?;

        info!("Control server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Truncation;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use rackwatch_common::Payload;
    use tower::ServiceExt;

    /// Answer control requests the way the scheduler does.
    fn spawn_responder(reading: Reading, queue: PendingQueue) -> ControlHandle {
        let (handle, mut rx) = ControlHandle::channel(8);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                request.respond(&reading, &queue).await;
            }
        });
        handle
    }

    fn queue_in(dir: &tempfile::TempDir) -> PendingQueue {
        PendingQueue::new(dir.path().join("failed_data.txt"), Truncation::WholeStore)
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
        send(router, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_reading_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(spawn_responder(Reading::new(23.44, 40.0), queue_in(&dir)));

        for path in ["/index.php", "/reading"] {
            let response = router
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let content_type = response.headers().get("content-type").unwrap();
            assert!(content_type.to_str().unwrap().contains("application/json"));

            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["temperature"], 23.4);
            assert_eq!(value["humidity"], 40.0);
        }
    }

    #[tokio::test]
    async fn test_reading_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(spawn_responder(Reading::default(), queue_in(&dir)));

        let (status, body) = get(&router, "/index.php").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"temperature":0.0,"humidity":0.0}"#);
    }

    #[tokio::test]
    async fn test_data_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let router = create_router(spawn_responder(Reading::default(), queue.clone()));

        let (status, body) = get(&router, "/data").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "File not found");

        queue
            .append(&Payload::encode(&Reading::new(20.0, 50.0)))
            .await
            .unwrap();

        let (status, body) = get(&router, "/data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "temperature=20.0&humidity=50.0\n");
    }

    #[tokio::test]
    async fn test_delete_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let router = create_router(spawn_responder(Reading::default(), queue.clone()));

        queue
            .append(&Payload::encode(&Reading::new(20.0, 50.0)))
            .await
            .unwrap();

        let (status, body) = get(&router, "/delete").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "File deleted successfully");
        assert!(!queue.exists().await);

        let (status, body) = get(&router, "/delete").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "File not found");

        let (status, _) = send(
            &router,
            Request::delete("/data").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (handle, _rx) = ControlHandle::channel(1);
        let router = create_router(handle);

        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "healthy\n");
    }

    #[tokio::test]
    async fn test_scheduler_gone() {
        let (handle, rx) = ControlHandle::channel(1);
        drop(rx);
        let router = create_router(handle);

        let (status, _) = get(&router, "/index.php").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let (handle, _rx) = ControlHandle::channel(1);
        let server = ControlServer::bind(handle, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
