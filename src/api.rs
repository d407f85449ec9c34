//! REST API server for the forecasting platform
//!
//! Exposes the tools, the chat assistant, the agent action-group endpoint,
//! the model registry and on-demand monitoring over HTTP.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::Assistant;
use crate::error::ForecastError;
use crate::memory::SessionMemory;
use crate::platform::Platform;
use crate::tools::{create_registry, handle_action_group, ActionGroupRequest, ActionGroupResponse, ToolRegistry};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Either a single `message` or a transcript whose last user turn is answered
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failed(error: ForecastError) -> ApiResult {
    let status = match &error {
        ForecastError::InvalidToolInput(_) | ForecastError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        ForecastError::ToolNotFound(_) | ForecastError::ModelNotFound(_) => StatusCode::NOT_FOUND,
        ForecastError::ToolError(_) | ForecastError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %error, "request failed");
    }
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub platform: Platform,
    pub tools: ToolRegistry,
    pub assistant: Arc<Assistant>,
}

impl ApiState {
    pub fn new(platform: Platform) -> Self {
        let tools = create_registry(platform.lake.clone(), platform.forecasts.clone());
        let memory = SessionMemory::from_database_url(platform.settings.database_url.as_deref());
        let assistant = Assistant::with_tools(tools.clone(), memory, platform.settings.gemini_api_key.clone());
        Self {
            platform,
            tools,
            assistant: Arc::new(assistant),
        }
    }
}

/// Session ids may be any string; non-UUID ids map to a stable UUID.
fn session_uuid(value: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    if let Ok(id) = uuid::Uuid::parse_str(value) {
        return id;
    }
    let hash = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<Value> {
    let active_model = state.platform.registry.active().ok().flatten().map(|b| b.version);
    Json(json!({
        "status": "healthy",
        "active_model": active_model,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Tool Endpoints
/// =============================

async fn run_tool(state: &ApiState, name: &str, params: Value) -> ApiResult {
    info!(tool = name, "tool request");
    match state.tools.execute(name, params).await {
        Ok(output) => ok(output.data),
        Err(e) => failed(e),
    }
}

async fn forecast(State(state): State<ApiState>, Json(params): Json<Value>) -> ApiResult {
    run_tool(&state, "get_forecast", params).await
}

async fn compare(State(state): State<ApiState>, Json(params): Json<Value>) -> ApiResult {
    run_tool(&state, "compare_markets", params).await
}

async fn drivers(State(state): State<ApiState>, Json(params): Json<Value>) -> ApiResult {
    run_tool(&state, "analyze_price_drivers", params).await
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .or_else(|| req.messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()));

    let Some(message) = message else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No user message found".into())),
        );
    };
    let session_id = req.session_id.as_deref().filter(|s| !s.trim().is_empty()).map(session_uuid);

    match state.assistant.chat(session_id, &message).await {
        Ok(reply) => ok(reply),
        Err(e) => failed(e),
    }
}

/// =============================
/// Agent Action Group Endpoint
/// =============================

async fn agent_invoke(
    State(state): State<ApiState>,
    Json(req): Json<ActionGroupRequest>,
) -> Json<ActionGroupResponse> {
    Json(handle_action_group(&state.tools, req).await)
}

/// =============================
/// Operations Endpoints
/// =============================

async fn list_models(State(state): State<ApiState>) -> ApiResult {
    let registry = &state.platform.registry;
    match registry.index() {
        Ok(index) => match registry.list() {
            Ok(models) => ok(json!({ "active": index.active, "models": models })),
            Err(e) => failed(e),
        },
        Err(e) => failed(e),
    }
}

async fn run_monitoring(State(state): State<ApiState>) -> ApiResult {
    match state.platform.run_cycle(Utc::now()).await {
        Ok(outcome) => ok(outcome),
        Err(e) => failed(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/forecast", post(forecast))
        .route("/api/compare", post(compare))
        .route("/api/drivers", post(drivers))
        .route("/api/chat", post(chat_handler))
        .route("/api/agent/invoke", post(agent_invoke))
        .route("/api/models", get(list_models))
        .route("/api/monitor/run", post(run_monitoring))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::tests::{test_platform, write_raw_prices, FixedFx};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::NaiveDate;
    use tower::ServiceExt;

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.map(|b| b.to_string()).unwrap_or_default()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn trained_router() -> Router {
        let (platform, _) = test_platform();
        write_raw_prices(&platform.lake, 40);
        let snapshot = NaiveDate::from_ymd_opt(2024, 10, 7).unwrap();
        platform.run_pipeline(snapshot, Some(&FixedFx(1.0))).await.unwrap();
        create_router(ApiState::new(platform))
    }

    #[tokio::test]
    async fn test_health_reports_active_model() {
        let router = trained_router().await;
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["active_model"].as_str().unwrap().starts_with('v'));
    }

    #[tokio::test]
    async fn test_tool_endpoints() {
        let router = trained_router().await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/forecast",
            Some(json!({"country": "Italy", "months_ahead": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["forecasts"].as_array().unwrap().len(), 1);

        let (status, body) = call(&router, "POST", "/api/compare", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["insights"]["lowest_price"], "Spain");
        assert_eq!(body["data"]["unavailable"], json!(["Greece"]));

        let (status, body) = call(&router, "POST", "/api/forecast", Some(json!({"months_ahead": 20}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_chat_and_agent_invoke() {
        let router = trained_router().await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/chat",
            Some(json!({"session_id": "demo-session", "message": "forecast italy next month"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["intent"], "forecast");
        assert!(body["data"]["answer"]
            .as_str()
            .unwrap()
            .starts_with("Italy extra virgin olive oil: $"));

        let (status, _) = call(&router, "POST", "/api/chat", Some(json!({"messages": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            "POST",
            "/api/agent/invoke",
            Some(json!({
                "actionGroup": "forecast-tool",
                "function": "get_forecast",
                "parameters": [{"name": "country", "type": "string", "value": "Spain"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["function"], "get_forecast");
        let text = body["response"]["functionResponse"]["responseBody"]["TEXT"]["body"]
            .as_str()
            .unwrap();
        let inner: Value = serde_json::from_str(text).unwrap();
        assert_eq!(inner["country"], "Spain");
    }

    #[tokio::test]
    async fn test_models_and_monitoring() {
        let router = trained_router().await;

        let (status, body) = call(&router, "GET", "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["models"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["active"], body["data"]["models"][0]["version"]);

        let (status, body) = call(&router, "POST", "/api/monitor/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["retraining"]["status"], "not_triggered");
    }

    #[test]
    fn test_session_uuid_is_stable() {
        let a = session_uuid("demo-session");
        assert_eq!(a, session_uuid("demo-session"));
        assert_ne!(a, session_uuid("other"));
        let id = uuid::Uuid::new_v4();
        assert_eq!(session_uuid(&id.to_string()), id);
    }
}
