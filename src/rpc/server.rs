//! RPC HTTP server.
//!
//! Axum-based HTTP endpoint that accepts JSON-RPC requests at `/`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::rpc::methods::{handle_request, JsonRpcRequest, JsonRpcResponse, RpcState};

/// Serve JSON-RPC over HTTP until the task is dropped
pub async fn serve(state: Arc<RpcState>, addr: SocketAddr) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", post(handle_rpc))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("rpc listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}

async fn handle_rpc(
    State(state): State<Arc<RpcState>>,
    Json(request): Json<JsonRpcRequest>,
) -> (StatusCode, Json<JsonRpcResponse>) {
    let response = handle_request(&state, request).await;
    (StatusCode::OK, Json(response))
}
