//! REST API server
//!
//! Thin JSON surface over the turn service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::service::TurnService;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TurnRequest {
    /// Any string; non-UUID values map to a stable UUID
    pub session_id: Option<String>,
    pub utterance: String,
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

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<TurnService>,
}

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn session_uuid(value: Option<&str>) -> Uuid {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v)),
        _ => Uuid::new_v4(),
    }
}

fn error_status(err: &OrchestrationError) -> StatusCode {
    match err {
        OrchestrationError::Cancelled => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Handlers
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "session_store": state.service.store_backend(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn submit_turn(
    State(state): State<ApiState>,
    Json(req): Json<TurnRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid(req.session_id.as_deref());
    info!(%session_id, "Received turn request");

    match state.service.submit_turn(session_id, &req.utterance).await {
        Ok(answer) => {
            let mut data = serde_json::to_value(&answer).unwrap_or_default();
            data["session_id"] = serde_json::json!(session_id.to_string());
            (StatusCode::OK, Json(ApiResponse::success(data)))
        }
        Err(e) => {
            warn!(%session_id, error = %e, "Turn failed");
            (error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

async fn session_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid(Some(&id));

    match state.service.history(session_id).await {
        Ok(turns) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "turns": turns,
            }))),
        ),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn clear_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid(Some(&id));

    match state.service.clear(session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "cleared": true,
            }))),
        ),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(service: Arc<TurnService>) -> Router {
    let state = ApiState { service };

    Router::new()
        .route("/health", get(health))
        .route("/api/turn", post(submit_turn))
        .route(
            "/api/sessions/:id",
            get(session_history).delete(clear_session),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    service: Arc<TurnService>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(service);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::state::InMemorySessionStore;
    use crate::testing;

    fn state() -> ApiState {
        ApiState {
            service: Arc::new(TurnService::new(
                testing::orchestrator(),
                Arc::new(InMemorySessionStore::new(8)),
                Arc::new(AuditLog::new()),
            )),
        }
    }

    #[test]
    fn test_stable_session_ids() {
        let a = session_uuid(Some("chat-42"));
        assert_eq!(a, session_uuid(Some("chat-42")));
        assert_ne!(a, session_uuid(Some("chat-43")));

        let explicit = Uuid::new_v4();
        assert_eq!(session_uuid(Some(&explicit.to_string())), explicit);
    }

    #[tokio::test]
    async fn test_turn_then_history_then_clear() {
        let state = state();

        let (status, Json(response)) = submit_turn(
            State(state.clone()),
            Json(TurnRequest {
                session_id: Some("demo".into()),
                utterance: "What is the return policy?".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["kind"], "answer");
        assert_eq!(data["tools_used"][0], "rag");

        let (_, Json(history)) =
            session_history(State(state.clone()), Path("demo".to_string())).await;
        assert_eq!(history.data.unwrap()["turns"].as_array().unwrap().len(), 1);

        let (status, _) = clear_session(State(state.clone()), Path("demo".to_string())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, Json(history)) = session_history(State(state), Path("demo".to_string())).await;
        assert!(history.data.unwrap()["turns"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_routes_are_wired() {
        use axum::body::{to_bytes, Body};
        use axum::http::Request;
        use tower::ServiceExt;

        let router = create_router(state().service);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["session_store"], "in-memory");

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/turn")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"utterance": "hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["kind"], "conversational");
        assert!(json["data"]["session_id"].is_string());

        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sessions/demo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_response_shape() {
        let response = ApiResponse::error("boom".into());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json["data"].is_null());
        assert_eq!(error_status(&OrchestrationError::Cancelled), StatusCode::CONFLICT);
    }
}
