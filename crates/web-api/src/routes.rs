use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{error::HandshakeError, state::AppState, ws_connection::ConnectionSession};

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/health", get(health))
        .route("/websocket", get(websocket_upgrade))
        .fallback_service(static_files)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 接受任意来源的升级请求；升级失败只放弃这一次连接
async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_failed_upgrade(|err| {
        let err = HandshakeError::from(err);
        tracing::warn!(error = %err, "WebSocket 升级失败");
    })
    .on_upgrade(move |socket| ConnectionSession::new(socket, state).run())
}
