//! HTTP 控制/状态面 (axum)。
//!
//! A thin republication of the bound call surface plus an SSE stream of
//! state-change events, for tooling that speaks HTTP instead of the control
//! socket. Enable/disable answer 202: the request was accepted or rejected,
//! the transition itself is reported on `/api/events`.

use crate::controller::ApController;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

pub struct AppState {
    pub controller: ApController,
}

pub fn router(controller: ApController) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/ap/enable", post(api_enable))
        .route("/api/ap/disable", post(api_disable))
        .route("/api/events", get(api_events))
        .with_state(Arc::new(AppState { controller }))
}

/// Starts the HTTP server.
///
/// # Returns
/// A `JoinHandle` for the server task.
pub fn start_http_server(
    controller: ApController,
    addr: SocketAddr,
) -> JoinHandle<Result<(), crate::Error>> {
    let app = router(controller);
    info!("🌐 HTTP surface listening on {}", addr);

    tokio::spawn(async move {
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service())
            .await
            .map_err(|e| crate::Error::WebServer(e.into()))
    })
}

// --- Route Handlers ---

async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.controller.config();
    Json(serde_json::json!({
        "state": state.controller.state(),
        "ssid": config.ssid,
        "channel": config.channel,
        "stations": state.controller.station_count().await,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct EnableRequest {
    #[serde(default)]
    ssid: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Body is required but may be `{}` to enable with the current config.
async fn api_enable(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EnableRequest>,
) -> impl IntoResponse {
    let accepted = state
        .controller
        .enable(payload.ssid.as_deref(), payload.password.as_deref());
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": accepted })))
}

async fn api_disable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let accepted = state.controller.disable();
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": accepted })))
}

/// Server-sent `state_changed` events; one line of JSON per transition.
async fn api_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = BroadcastStream::new(state.controller.subscribe());
    let stream = events.filter_map(|message| {
        // A lagged subscriber just loses its backlog.
        message
            .ok()
            .map(|event| Event::default().event("state_changed").json_data(&event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockBackend;
    use crate::store::PropStore;
    use crate::traits::{ApConfig, ApState};

    fn controller_with_mock() -> (ApController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        let store = PropStore::new(dir.path().join("properties"));
        (ApController::new(backend, store, ApConfig::default()), dir)
    }

    #[tokio::test]
    async fn http_enable_and_status() {
        let (controller, _dir) = controller_with_mock();
        let mut events = controller.subscribe();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(controller.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let body = http_post(addr, "/api/ap/enable", r#"{"ssid":"Office"}"#).await;
        assert!(body.contains("\"accepted\":true"));

        // Wait for the transition to settle, then read status.
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
                .await
                .expect("enable never completed")
                .unwrap();
            if event.state == ApState::Enabled {
                break;
            }
        }
        let body = http_get(addr, "/api/status").await;
        assert!(body.contains("\"state\":\"enabled\""));
        assert!(body.contains("\"ssid\":\"Office\""));
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        http_request(addr, &format!("GET {} HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n", path)).await
    }

    async fn http_post(addr: SocketAddr, path: &str, body: &str) -> String {
        http_request(
            addr,
            &format!(
                "POST {} HTTP/1.1\r\nhost: test\r\nconnection: close\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                path,
                body.len(),
                body
            ),
        )
        .await
    }

    async fn http_request(addr: SocketAddr, request: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}
