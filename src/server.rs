//! HTTP command surface.
//!
//! Every route except `GET /` requires the API key, passed either as the
//! `x-api-key` header or the `key` query parameter.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, Request, State},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wacore::transport::TransportFactory;
use wacore::types::SessionSnapshot;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
struct ServerState {
    gateway: Gateway,
    api_key: Option<Arc<str>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRequest {
    account_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    account_id: String,
    recipient: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMessagesRequest {
    account_id: String,
    chat_id: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    account_id: String,
    #[serde(flatten)]
    snapshot: SessionSnapshot,
}

struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::SessionNotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Delivery { .. } => StatusCode::BAD_GATEWAY,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(target: "Gateway/Server", "Request failed: {}", self.0);
        }
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Builds the router. With `api_key` unset every request is accepted.
pub fn build_router(gateway: Gateway, api_key: Option<String>) -> Router {
    let api_key = api_key.filter(|k| !k.is_empty()).map(Arc::from);
    if api_key.is_none() {
        warn!(target: "Gateway/Server", "No API key configured; all requests are allowed");
    }
    let state = ServerState { gateway, api_key };

    let guarded = Router::new()
        .route("/create-session", post(create_session))
        .route("/connect", post(connect))
        .route("/send-message", post(send_message))
        .route("/delete-session", post(delete_session))
        .route("/disconnect", post(delete_session))
        .route("/get-chats", post(get_chats))
        .route("/get-messages", post(get_messages))
        .route("/sessions", get(list_sessions))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/", get(root))
        .merge(guarded)
        .with_state(state)
}

/// Serves `router` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(target: "Gateway/Server", "Listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Opens the gateway described by `config`, serves it on `config.server.bind`
/// and drains every session once `shutdown` fires.
pub async fn run(
    config: GatewayConfig,
    transports: Arc<dyn TransportFactory>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let gateway = Gateway::from_config(&config, transports).await?;
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    let router = build_router(gateway.clone(), config.server.api_key.clone());
    let served = serve(listener, router, shutdown).await;

    gateway.shutdown().await;
    info!(target: "Gateway/Server", "Gateway stopped");
    served.context("HTTP server failed")
}

async fn require_api_key(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_key(request.uri()));

    let authorized = provided
        .is_some_and(|key| bool::from(key.as_bytes().ct_eq(expected.as_bytes())));
    if !authorized {
        warn!(target: "Gateway/Server", "Rejected unauthenticated request to {}", request.uri().path());
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "success": false,
                "error": "Unauthorized",
                "message": "Invalid or missing API key. Pass it in the x-api-key header."
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn query_key(uri: &Uri) -> Option<String> {
    Query::<KeyQuery>::try_from_uri(uri).ok()?.0.key
}

async fn root() -> &'static str {
    concat!("whatsapp-gateway ", env!("CARGO_PKG_VERSION"), " is running")
}

async fn create_session(
    State(state): State<ServerState>,
    Json(req): Json<AccountRequest>,
) -> ApiResult {
    let session_state = state.gateway.connect(&req.account_id, true).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Session initialization started",
        "state": session_state,
    }))
    .into_response())
}

async fn connect(State(state): State<ServerState>, Json(req): Json<AccountRequest>) -> ApiResult {
    let session_state = state.gateway.connect(&req.account_id, false).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Session initialization started",
        "state": session_state,
    }))
    .into_response())
}

async fn send_message(
    State(state): State<ServerState>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult {
    let message_id = state
        .gateway
        .send_message(&req.account_id, &req.recipient, &req.content)
        .await?;
    Ok(Json(json!({ "success": true, "messageId": message_id })).into_response())
}

async fn delete_session(
    State(state): State<ServerState>,
    Json(req): Json<AccountRequest>,
) -> ApiResult {
    state.gateway.delete_session(&req.account_id).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

async fn get_chats(State(state): State<ServerState>, Json(req): Json<AccountRequest>) -> ApiResult {
    let chats = state.gateway.get_chats(&req.account_id).await?;
    Ok(Json(chats).into_response())
}

async fn get_messages(
    State(state): State<ServerState>,
    Json(req): Json<GetMessagesRequest>,
) -> ApiResult {
    let messages = state
        .gateway
        .get_messages(&req.account_id, &req.chat_id, req.limit)
        .await?;
    Ok(Json(messages).into_response())
}

async fn list_sessions(State(state): State<ServerState>) -> Json<Vec<SessionEntry>> {
    let sessions = state
        .gateway
        .registry()
        .list()
        .await
        .into_iter()
        .map(|(account_id, snapshot)| SessionEntry {
            account_id,
            snapshot,
        })
        .collect();
    Json(sessions)
}
