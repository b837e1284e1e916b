use std::time::Instant;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::app_state::AppState;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::ws;

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route(&state.config.ws_path, get(ws_handler))
        .route("/health", get(health));

    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let relay = state.relay.lock().await;
    Json(json!({
        "status": "ok",
        "clients": relay.client_count(),
        "sharing": relay.session().is_active(),
        "links": relay.link_count(),
    }))
}

/// Periodically tears down screen links whose negotiation stalled.
pub fn spawn_link_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = (state.config.link_timeout / 2).max(std::time::Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let expired = state.relay.lock().await.expire_links(Instant::now());
            if expired > 0 {
                tracing::info!(expired, "expired stalled screen links");
            }
        }
    })
}

/// Serves the relay on an already bound listener until the server stops.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let sweeper = spawn_link_sweeper(state.clone());
    let app = build_router(state);
    let result = axum::serve(listener, app.into_make_service()).await;
    sweeper.abort();
    Ok(result?)
}

pub async fn run(config: RelayConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        ws_path = %config.ws_path,
        "screen relay listening"
    );
    serve(listener, AppState::new(config)).await
}
