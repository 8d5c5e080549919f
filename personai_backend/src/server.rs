use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::conversation::HistoryEntry;
use crate::runtime::BackendRuntime;
use crate::store::{ConversationKey, RecentChatEntry};
use crate::turn::{TurnRequest, TurnResponse, TurnService, TurnStatus};

#[derive(Clone)]
pub struct ServerState {
    pub turns: Arc<TurnService>,
    pub service_name: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    available_model: String,
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    #[serde(default)]
    character_id: String,
    #[serde(default)]
    persona_id: String,
}

#[derive(Debug, Serialize)]
struct DeleteConversationResponse {
    status: &'static str,
    removed_history: bool,
    removed_recent: bool,
}

#[derive(Debug, Serialize)]
struct DeleteCharacterResponse {
    status: &'static str,
    removed_history: usize,
    removed_recent: usize,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/models", get(models))
        .route("/health", get(health))
        .route("/history", get(get_history).delete(delete_history))
        .route("/recent-chats", get(recent_chats))
        .route("/characters/:id/history", delete(delete_character_history))
        .with_state(state)
}

pub async fn serve_backend(runtime: BackendRuntime) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .context("Invalid bind address (expected host:port)")?;

    let state = Arc::new(ServerState {
        turns: runtime.turns.clone(),
        service_name: runtime.config.service_name.clone(),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!(
        "{} listening on http://{} (backend {}, model {})",
        runtime.config.service_name,
        bind_addr,
        runtime.config.llm_api_url,
        runtime.config.llm_model
    );
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}

/// The body is parsed by hand so that an empty body, `null` and `{}` all reach the
/// orchestrator as "no data" instead of being rejected by the JSON extractor.
async fn generate(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<TurnResponse>), (StatusCode, String)> {
    let request = parse_turn_request(&body)?;
    let outcome = state.turns.run_turn(request).await;
    tracing::debug!("Turn finished via {:?}", outcome.phases);

    let status = match outcome.response.status {
        TurnStatus::Error if outcome.response == TurnResponse::no_data() => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome.response)))
}

fn parse_turn_request(body: &[u8]) -> Result<Option<TurnRequest>, (StatusCode, String)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| bad_request(format!("Invalid JSON body: {e}")))?;
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| bad_request(format!("Invalid turn request: {e}")))
}

async fn models(State(state): State<Arc<ServerState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        available_model: state.turns.default_model().to_string(),
        status: "ready",
    })
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: state.service_name.clone(),
        model: state.turns.default_model().to_string(),
    })
}

async fn get_history(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ConversationQuery>,
) -> Json<Vec<HistoryEntry>> {
    Json(
        state
            .turns
            .history()
            .read(&query.character_id, &query.persona_id)
            .await,
    )
}

async fn delete_history(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<DeleteConversationResponse>, (StatusCode, String)> {
    let key = ConversationKey::new(&query.character_id, &query.persona_id).ok_or_else(|| {
        bad_request(format!(
            "invalid conversation ids (character_id={:?}, persona_id={:?})",
            query.character_id, query.persona_id
        ))
    })?;

    let removed_history = state
        .turns
        .history()
        .delete(&key)
        .await
        .map_err(internal_error)?;
    let removed_recent = state
        .turns
        .recent()
        .remove(&key)
        .await
        .map_err(internal_error)?;
    tracing::info!(
        "Deleted conversation {} (history: {}, recent: {})",
        key.file_name(),
        removed_history,
        removed_recent
    );

    Ok(Json(DeleteConversationResponse {
        status: "deleted",
        removed_history,
        removed_recent,
    }))
}

async fn recent_chats(State(state): State<Arc<ServerState>>) -> Json<Vec<RecentChatEntry>> {
    Json(state.turns.recent().list().await)
}

async fn delete_character_history(
    State(state): State<Arc<ServerState>>,
    Path(character_id): Path<String>,
) -> Result<Json<DeleteCharacterResponse>, (StatusCode, String)> {
    if !crate::store::is_valid_id(&character_id) {
        return Err(bad_request(format!(
            "invalid character id {:?}",
            character_id
        )));
    }

    let removed_history = state
        .turns
        .history()
        .delete_all_for_character(&character_id)
        .await
        .map_err(internal_error)?;
    let removed_recent = state
        .turns
        .recent()
        .remove_character(&character_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(DeleteCharacterResponse {
        status: "deleted",
        removed_history,
        removed_recent,
    }))
}

fn bad_request(message: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message)
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character_catalog::JsonCharacterCatalog;
    use crate::config::{GenerationOptions, ServiceConfig};
    use crate::llm_client::{InferenceBackend, InferenceResult};
    use crate::store::{AssetResolver, HistoryStore, RecentChatsIndex};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct EchoBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        async fn infer(
            &self,
            _model: &str,
            _prompt: &str,
            _options: &GenerationOptions,
            _timeout: Duration,
        ) -> InferenceResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            InferenceResult::Success {
                text: "**Response:** Hi there".to_string(),
            }
        }
    }

    fn test_app() -> (TempDir, Arc<EchoBackend>, Router) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServiceConfig::default();
        config.storage.data_dir = dir.path().join("data").to_string_lossy().to_string();
        config.assets.public_dir = dir.path().join("public").to_string_lossy().to_string();

        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
        });
        let turns = TurnService::new(
            &config,
            backend.clone(),
            Arc::new(HistoryStore::new(config.storage.history_dir(), 100)),
            Arc::new(RecentChatsIndex::new(
                config.storage.recent_chats_path(),
                10,
                AssetResolver::new(&config.assets),
            )),
            Arc::new(JsonCharacterCatalog::new(config.storage.characters_path())),
        );
        let state = Arc::new(ServerState {
            turns: Arc::new(turns),
            service_name: config.service_name.clone(),
        });
        (dir, backend, router(state))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn character_body() -> String {
        json!({
            "type": "character",
            "character_id": "c1",
            "persona_id": "p1",
            "character_name": "Aria",
            "user_message": "Hello"
        })
        .to_string()
    }

    #[tokio::test]
    async fn empty_bodies_are_rejected_without_calling_the_backend() {
        let (_dir, backend, app) = test_app();

        for body in ["", "  ", "null", "{}"] {
            let (status, value) = call(&app, Method::POST, "/generate", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(
                value,
                json!({ "response": "No data received", "status": "error" })
            );
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (_dir, backend, app) = test_app();
        let (status, _) = call(&app, Method::POST, "/generate", "{\"type\":").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generate_then_history_and_recent_chats() {
        let (_dir, _backend, app) = test_app();

        let (status, value) = call(&app, Method::POST, "/generate", &character_body()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["response"], "Hi there");
        assert_eq!(value["status"], "success");
        assert_eq!(value["model_used"], "vicuna:latest");
        assert_eq!(value["api_used"], "generate");

        let (status, history) = call(
            &app,
            Method::GET,
            "/history?character_id=c1&persona_id=p1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().map(Vec::len), Some(2));
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["role"], "assistant");

        let (_, recent) = call(&app, Method::GET, "/recent-chats", "").await;
        assert_eq!(recent.as_array().map(Vec::len), Some(1));
        assert_eq!(recent[0]["character_id"], "c1");
        assert_eq!(recent[0]["name"], "Aria");
    }

    #[tokio::test]
    async fn unknown_conversation_reads_as_empty() {
        let (_dir, _backend, app) = test_app();
        let (status, history) = call(
            &app,
            Method::GET,
            "/history?character_id=unknown&persona_id=p1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history, json!([]));

        let (_, recent) = call(&app, Method::GET, "/recent-chats", "").await;
        assert_eq!(recent, json!([]));
    }

    #[tokio::test]
    async fn health_and_models_report_the_default_model() {
        let (_dir, _backend, app) = test_app();

        let (_, health) = call(&app, Method::GET, "/health", "").await;
        assert_eq!(
            health,
            json!({ "status": "healthy", "service": "PersonAI LLM Service", "model": "vicuna:latest" })
        );

        let (_, models) = call(&app, Method::GET, "/models", "").await;
        assert_eq!(
            models,
            json!({ "available_model": "vicuna:latest", "status": "ready" })
        );
    }

    #[tokio::test]
    async fn deleting_a_conversation_clears_history_and_index() {
        let (_dir, _backend, app) = test_app();
        call(&app, Method::POST, "/generate", &character_body()).await;

        let (status, value) = call(
            &app,
            Method::DELETE,
            "/history?character_id=c1&persona_id=p1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            value,
            json!({ "status": "deleted", "removed_history": true, "removed_recent": true })
        );

        let (_, history) = call(
            &app,
            Method::GET,
            "/history?character_id=c1&persona_id=p1",
            "",
        )
        .await;
        assert_eq!(history, json!([]));

        let (status, _) = call(&app, Method::DELETE, "/history?character_id=c1", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleting_a_character_clears_every_persona() {
        let (_dir, _backend, app) = test_app();
        call(&app, Method::POST, "/generate", &character_body()).await;
        let other_persona = json!({
            "type": "character",
            "character_id": "c1",
            "persona_id": "p2",
            "user_message": "Hi"
        })
        .to_string();
        call(&app, Method::POST, "/generate", &other_persona).await;

        let (status, value) = call(&app, Method::DELETE, "/characters/c1/history", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            value,
            json!({ "status": "deleted", "removed_history": 2, "removed_recent": 2 })
        );

        let (_, recent) = call(&app, Method::GET, "/recent-chats", "").await;
        assert_eq!(recent, json!([]));
    }
}
