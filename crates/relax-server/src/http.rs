use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::controller::Controller;

pub fn build_app(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/tenants", get(tenants))
        .with_state(controller)
}

pub async fn serve(listen_addr: &str, controller: Arc<Controller>) -> Result<(), String> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    tracing::info!(%addr, "health surface listening");
    axum::serve(listener, build_app(controller))
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn tenants(State(controller): State<Arc<Controller>>) -> Json<Value> {
    Json(json!({ "tenants": controller.live_indexes() }))
}
