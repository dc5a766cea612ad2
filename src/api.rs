//! REST API Server for the gold investment agent
//!
//! Exposes the session controller and both flows via HTTP endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::controller::SessionController;
use crate::error::GoldAgentError;
use crate::memory::ConversationLog;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentRequest {
    pub user_id: String,
    pub message: String,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlowRequest {
    pub message: String,
    pub user_name: Option<String>,
}

impl FlowRequest {
    fn user_name(&self) -> &str {
        self.user_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("User")
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn bad_request(message: &str) -> ApiResult {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error(message.to_string())),
    )
}

/// Upstream LLM trouble is a gateway problem, everything else is ours
fn error_status(error: &GoldAgentError) -> StatusCode {
    match error {
        GoldAgentError::LlmError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<SessionController>,
}

/// =============================
/// Health Endpoints
/// =============================

async fn root() -> &'static str {
    "Gold investment agent is running"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn agent_chat(State(state): State<ApiState>, Json(req): Json<AgentRequest>) -> ApiResult {
    if req.user_id.trim().is_empty() {
        return bad_request("user_id must not be empty");
    }
    if req.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }

    info!(user = %req.user_id, "Received agent message");

    let user_name = req
        .user_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match state
        .controller
        .chat(&req.user_id, &req.message, user_name)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "reply": outcome.reply,
                "state": outcome.session.mode.label(),
                "purchase_success": outcome.success(),
            }))),
        ),
        Err(e) => {
            error!(user = %req.user_id, "Agent turn failed: {}", e);
            (
                error_status(&e),
                Json(ApiResponse::error(format!("Agent turn failed: {}", e))),
            )
        }
    }
}

async fn reset_session(State(state): State<ApiState>, Path(user_id): Path<String>) -> ApiResult {
    match state.controller.reset(&user_id).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "user_id": user_id,
                "removed": removed,
            }))),
        ),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::error(format!("Reset failed: {}", e))),
        ),
    }
}

/// =============================
/// Stateless Flow Endpoints
/// =============================

async fn investment_chat(State(state): State<ApiState>, Json(req): Json<FlowRequest>) -> ApiResult {
    if req.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }

    match state
        .controller
        .advice()
        .respond(&req.message, req.user_name(), &ConversationLog::new())
        .await
    {
        Ok(reply) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "reply": reply.message,
                "purchase_intent": reply.purchase_intent,
            }))),
        ),
        Err(e) => {
            error!("Investment chat failed: {}", e);
            (
                error_status(&e),
                Json(ApiResponse::error(format!("Investment chat failed: {}", e))),
            )
        }
    }
}

async fn purchase_quote(State(state): State<ApiState>, Json(req): Json<FlowRequest>) -> ApiResult {
    let step = state
        .controller
        .purchase()
        .quote(&req.message, req.user_name())
        .await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "reply": step.message(),
            "success": step.success(),
            "pending_purchase": step.pending_purchase(),
        }))),
    )
}

async fn transactions(State(state): State<ApiState>) -> ApiResult {
    match state.controller.purchases().list_purchases().await {
        Ok(records) => (StatusCode::OK, Json(ApiResponse::success(records))),
        Err(e) => {
            error!("Failed to list purchases: {}", e);
            let mut response = ApiResponse::error(format!("Failed to fetch transactions: {}", e));
            response.data = Some(serde_json::json!([]));
            (StatusCode::OK, Json(response))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(controller: Arc<SessionController>) -> Router {
    let state = ApiState { controller };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/agent", post(agent_chat))
        .route("/agent/:user_id", delete(reset_session))
        .route("/investment-chat", post(investment_chat))
        .route("/purchase", post(purchase_quote))
        .route("/transactions", get(transactions))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    controller: Arc<SessionController>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(controller);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
