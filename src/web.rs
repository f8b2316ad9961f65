//! Web surface: axum HTTP + WebSocket.
//!
//! - `GET /stream` — live multipart stream (runs a streaming session)
//! - `GET /api/gallery` — gallery cache listing
//! - `GET /api/status` — device status
//! - `POST /api/command` — JSON command ingress
//! - `GET/DELETE /media/{name}` — fetch / delete one stored artifact
//! - `DELETE /media` — delete everything
//! - `WS /ws` — command ingress + status event push
//!
//! An optional static UI directory is served as the fallback.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::command::{Command, StatusEvent};
use crate::context::AppContext;
use crate::frame::multipart_content_type;
use crate::stream::run_stream;

/// Shared state for the web handlers.
struct WebState {
    ctx: Arc<AppContext>,
    cmd_tx: mpsc::Sender<Command>,
}

/// Start the web server and serve until the process exits.
pub async fn serve(
    ctx: Arc<AppContext>,
    cmd_tx: mpsc::Sender<Command>,
    ui_path: Option<PathBuf>,
) -> Result<()> {
    let bind = ctx.config.bind;
    let state = Arc::new(WebState { ctx, cmd_tx });

    let mut app = Router::new()
        .route("/stream", get(stream_handler))
        .route("/api/gallery", get(api_gallery))
        .route("/api/status", get(api_status))
        .route("/api/command", post(api_command))
        .route("/media/{name}", get(media_get).delete(media_delete))
        .route("/media", delete(media_delete_all))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state);

    if let Some(ref path) = ui_path {
        if path.exists() {
            info!("Serving UI from {:?}", path);
            app = app.fallback_service(
                ServeDir::new(path).append_index_html_on_directories(true),
            );
        } else {
            warn!("UI path {:?} does not exist, skipping static file serving", path);
        }
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind to {}", bind))?;
    info!("Web server listening on http://{}", bind);

    axum::serve(listener, app).await.context("Web server error")
}

/// GET /stream — run a streaming session into this response body.
async fn stream_handler(State(state): State<Arc<WebState>>) -> Response {
    if state.ctx.camera.is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "camera unavailable").into_response();
    }
    if state.ctx.state.streaming_active() {
        // One stream client at a time by design
        return (StatusCode::CONFLICT, "stream already active").into_response();
    }

    let (tx, rx) = mpsc::channel::<Bytes>(8);
    let ctx = state.ctx.clone();
    tokio::spawn(async move {
        run_stream(&ctx, tx).await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, multipart_content_type()),
            (header::CACHE_CONTROL, "no-store, no-cache".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

/// GET /api/gallery — cached listing, rebuilt if dirty.
async fn api_gallery(State(state): State<Arc<WebState>>) -> Response {
    Json(state.ctx.gallery.listing().await).into_response()
}

/// GET /api/status — device status snapshot.
async fn api_status(State(state): State<Arc<WebState>>) -> Json<serde_json::Value> {
    let ctx = &state.ctx;
    Json(serde_json::json!({
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
        "camera": ctx.camera.is_some(),
        "streaming": ctx.state.streaming_active(),
        "recording": ctx.state.recording_active(),
        "stream_enabled": ctx.state.stream_enabled(),
        "link_up": ctx.state.link_up(),
        "target_fps": ctx.config.target_fps,
    }))
}

/// POST /api/command — opaque JSON command. Unknown actions are accepted
/// and ignored, never errors.
async fn api_command(
    State(state): State<Arc<WebState>>,
    Json(value): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    match Command::from_value(value) {
        Some(cmd) => {
            let accepted = state.cmd_tx.send(cmd).await.is_ok();
            Json(serde_json::json!({ "accepted": accepted }))
        }
        None => {
            debug!("unknown command ignored");
            Json(serde_json::json!({ "accepted": false }))
        }
    }
}

/// GET /media/{name} — stream one stored artifact. Multipart videos get
/// cache-defeating headers so playback always hits the device.
async fn media_get(Path(name): Path<String>, State(state): State<Arc<WebState>>) -> Response {
    let path = match state.ctx.gallery.media_path(&name) {
        Ok(path) => path,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let body = Body::from_stream(ReaderStream::new(file));
    if name.ends_with(".mjpg") {
        (
            [
                (header::CONTENT_TYPE, multipart_content_type()),
                (header::CACHE_CONTROL, "no-store, no-cache".to_string()),
                (header::PRAGMA, "no-cache".to_string()),
            ],
            body,
        )
            .into_response()
    } else {
        ([(header::CONTENT_TYPE, "image/jpeg".to_string())], body).into_response()
    }
}

/// DELETE /media/{name}
async fn media_delete(Path(name): Path<String>, State(state): State<Arc<WebState>>) -> Response {
    let result = state.ctx.gallery.delete(&name);
    state.ctx.events.emit(StatusEvent::RefreshGallery);
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(%name, error = %e, "delete failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// DELETE /media — delete everything.
async fn media_delete_all(State(state): State<Arc<WebState>>) -> Response {
    let result = state.ctx.gallery.delete_all();
    state.ctx.events.emit(StatusEvent::RefreshGallery);
    match result {
        Ok(removed) => Json(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => {
            warn!(error = %e, "delete all failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<WebState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// One WebSocket client: inbound JSON commands, outbound status events.
async fn handle_ws(socket: WebSocket, state: Arc<WebState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.ctx.events.subscribe();

    loop {
        tokio::select! {
            result = events.recv() => {
                match result {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Command::parse(&text) {
                            Some(cmd) => {
                                if state.cmd_tx.send(cmd).await.is_err() {
                                    break;
                                }
                            }
                            None => debug!("unknown ws command ignored"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ignore binary
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}
