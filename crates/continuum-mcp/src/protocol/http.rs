//! HTTP transport for the MCP dispatcher.
//!
//! Endpoints:
//! - POST /mcp - JSON-RPC request; requires `Authorization: Bearer <token>`
//! - GET /health - liveness, no auth
//!
//! Per the wire contract, JSON-RPC errors ride on HTTP 200; only missing or
//! invalid auth yields 401.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::{DispatchOutcome, McpDispatcher};

/// Shared application state
struct AppState {
    dispatcher: Arc<McpDispatcher>,
}

/// Configuration for the HTTP transport
pub struct HttpTransportConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

/// HTTP transport serving the dispatcher
pub struct HttpTransport {
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self { config }
    }

    /// Build the router; exposed separately for tests
    pub fn router(dispatcher: Arc<McpDispatcher>) -> Router {
        let state = Arc::new(AppState { dispatcher });
        Router::new()
            .route("/mcp", post(handle_mcp))
            .route("/health", get(handle_health))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until shutdown
    pub async fn run(self, dispatcher: Arc<McpDispatcher>) -> Result<(), std::io::Error> {
        let app = Self::router(dispatcher);
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        info!("MCP HTTP server listening on http://{addr}");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("MCP HTTP server shutting down");
        Ok(())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// GET /health - unauthenticated liveness probe
async fn handle_health() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "ok",
            "server": "continuum-mcp",
            "transport": "http",
        })
        .to_string(),
    )
        .into_response()
}

/// POST /mcp - one JSON-RPC request per call, stateless
async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("failed to parse JSON-RPC request: {e}");
            let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
            return json_reply(StatusCode::OK, &response);
        }
    };

    let token = bearer_token(&headers);
    match state.dispatcher.dispatch(token.as_deref(), request).await {
        DispatchOutcome::Unauthorized(message) => (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            serde_json::json!({"error": message}).to_string(),
        )
            .into_response(),
        DispatchOutcome::Reply(response) => json_reply(StatusCode::OK, &response),
        DispatchOutcome::NoReply => StatusCode::ACCEPTED.into_response(),
    }
}

fn json_reply(status: StatusCode, response: &JsonRpcResponse) -> Response {
    let json = serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!("failed to serialize response: {e}");
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
            .to_string()
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        json,
    )
        .into_response()
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
