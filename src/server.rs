//! HTTP tool server.
//!
//! Exposes the memory tools and the turn hooks over JSON HTTP so agent
//! hosts in any language can use the engine.
//!
//! # Endpoints
//!
//! | Method | Path                 | Description                               |
//! |--------|----------------------|-------------------------------------------|
//! | `GET`  | `/health`            | Liveness (returns version)                |
//! | `GET`  | `/tools/list`        | Registered tools with parameter schemas   |
//! | `POST` | `/tools/{name}`      | Call a tool, `{"result"}` or `{"error"}`  |
//! | `POST` | `/hooks/before-turn` | `{prompt}` → `{context}` recall block     |
//! | `POST` | `/hooks/message`     | `{text, sessionKey?}` → capture outcome   |
//!
//! # Error Contract
//!
//! Tool failures are reported inside a `200` response as `{"error": "..."}`.
//! Only routing problems produce an HTTP error:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no tool registered with name: x" } }
//! ```
//!
//! Codes: `bad_request` (400) for unparseable bodies, `not_found` (404)
//! for unknown tools.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::traits::MemoryHooks;

#[derive(Clone)]
struct AppState {
    hooks: Arc<dyn MemoryHooks>,
}

/// Build the router. Split from [`run_server`] so tests can bind their own
/// listener.
pub fn router(hooks: Arc<dyn MemoryHooks>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/hooks/before-turn", post(handle_before_turn))
        .route("/hooks/message", post(handle_message))
        .layer(cors)
        .with_state(AppState { hooks })
}

/// Start the hooks, serve until `shutdown` fires, then stop the hooks.
pub async fn run_server(
    bind: &str,
    hooks: Arc<dyn MemoryHooks>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    hooks.start().await?;

    for t in hooks.tools().tools() {
        tracing::info!(tool = t.name(), "POST /tools/{}", t.name());
    }

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %bind, "memory server listening");

    axum::serve(listener, router(hooks.clone()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    hooks.stop().await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|e| bad_request(e.body_text()))
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({ "tools": state.hooks.tools().describe() }))
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let params = json_body(body)?;
    state
        .hooks
        .call_tool(&name, params)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))
}

#[derive(Deserialize)]
struct BeforeTurnRequest {
    prompt: String,
}

#[derive(Serialize)]
struct BeforeTurnResponse {
    context: Option<String>,
}

async fn handle_before_turn(
    State(state): State<AppState>,
    body: Result<Json<BeforeTurnRequest>, JsonRejection>,
) -> Result<Json<BeforeTurnResponse>, AppError> {
    let req = json_body(body)?;
    let context = state.hooks.on_before_turn(&req.prompt).await;
    Ok(Json(BeforeTurnResponse { context }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRequest {
    text: String,
    #[serde(default)]
    session_key: Option<String>,
}

async fn handle_message(
    State(state): State<AppState>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = json_body(body)?;
    let outcome = state
        .hooks
        .on_message(&req.text, req.session_key.as_deref())
        .await;
    Ok(Json(serde_json::to_value(&outcome).unwrap_or(Value::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::MemoryEngine;
    use crate::traits::MemoryPlugin;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use vault_recall_core::embedding::Embedder;
    use vault_recall_core::store::memory::InMemoryVectorStore;

    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        fn model_name(&self) -> &str {
            "constant"
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.0, 1.0])
        }
        async fn dimensions(&self) -> anyhow::Result<usize> {
            Ok(2)
        }
    }

    async fn serve(tmp: &TempDir) -> String {
        std::fs::create_dir_all(tmp.path().join("vault")).unwrap();
        let engine = MemoryEngine::with_backends(
            Config::for_vault(tmp.path().join("vault")),
            Arc::new(ConstantEmbedder),
            Arc::new(InMemoryVectorStore::new()),
        )
        .unwrap();
        let hooks: Arc<dyn MemoryHooks> = Arc::new(MemoryPlugin::new(Arc::new(engine)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(hooks)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health_and_tool_list() {
        let tmp = TempDir::new().unwrap();
        let base = serve(&tmp).await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let list: Value = client
            .get(format!("{}/tools/list", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["tools"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_body() {
        let tmp = TempDir::new().unwrap();
        let base = serve(&tmp).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/tools/nope", base))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");

        let resp = client
            .post(format!("{}/tools/memory_search", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tool_error_is_200_with_error_field() {
        let tmp = TempDir::new().unwrap();
        let base = serve(&tmp).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/tools/memory_get", base))
            .json(&serde_json::json!({ "path": "../etc/passwd" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("traversal"));
    }

    #[tokio::test]
    async fn test_hooks() {
        let tmp = TempDir::new().unwrap();
        let base = serve(&tmp).await;
        let client = reqwest::Client::new();

        let outcome: Value = client
            .post(format!("{}/hooks/message", base))
            .json(&serde_json::json!({ "text": "ok" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcome["status"], "excluded");

        let recall: Value = client
            .post(format!("{}/hooks/before-turn", base))
            .json(&serde_json::json!({ "prompt": "what do I know about the garden project?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(recall["context"].is_null());
    }
}
