//! HTTP API gateway for skillrun.
//!
//! Exposes a health check, the tool listing, a collected chat endpoint and
//! a server-sent-events chat stream. Every chat request runs its turn on a
//! worker task through the [`EventBridge`]; the handler only reads events.
//!
//! Built on Axum.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::Router;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use skillrun_agent::{AgentLoop, EventBridge, EventStream, ITERATION_LIMIT_MESSAGE, TurnHandle, TurnOutcome};
use skillrun_config::AppConfig;
use skillrun_core::Error;
use skillrun_core::message::{Conversation, ConversationId, SystemMetadata};

/// Conversation id used when a request names none.
pub const DEFAULT_CONVERSATION: &str = "default";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentLoop>,
    pub bridge: EventBridge,
    system_prompt: String,
    metadata: SystemMetadata,
    sessions: RwLock<HashMap<String, Conversation>>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(agent: Arc<AgentLoop>, bridge: EventBridge, system_prompt: impl Into<String>, metadata: SystemMetadata) -> Self {
        Self {
            agent,
            bridge,
            system_prompt: system_prompt.into(),
            metadata,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig, agent: Arc<AgentLoop>) -> Result<Self, Error> {
        let metadata = config
            .system_metadata()
            .map_err(|e| Error::Config { message: e.to_string() })?;
        Ok(Self::new(
            agent,
            EventBridge::from_config(&config.server),
            config.active_model().system_message.clone(),
            metadata,
        ))
    }

    /// A private copy of the session, created on first use.
    async fn checkout(&self, id: &str) -> Conversation {
        if let Some(conversation) = self.sessions.read().await.get(id) {
            return conversation.clone();
        }
        Conversation::with_id(ConversationId::from(id), &self.system_prompt, &self.metadata)
    }

    /// Write a finished run's conversation back. The last run to finish wins.
    async fn store(&self, id: String, conversation: Conversation) {
        self.sessions.write().await.insert(id, conversation);
    }

    /// Number of messages stored for a session, if it exists.
    pub async fn session_len(&self, id: &str) -> Option<usize> {
        self.sessions.read().await.get(id).map(|c| c.messages().len())
    }

    /// Start one turn on a worker task.
    pub fn start_turn(self: &Arc<Self>, conversation_id: String, message: String) -> (EventStream, TurnHandle<TurnOutcome>) {
        let state = Arc::clone(self);
        self.bridge.start(move |sink| async move {
            let mut conversation = state.checkout(&conversation_id).await;
            let outcome = state.agent.run_turn(&mut conversation, &message, &sink).await;
            state.store(conversation_id, conversation).await;
            outcome
        })
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/tools", get(tools_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(stream_query_handler).post(stream_json_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(state: SharedState, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Errors ---

/// An error rendered as `{"error": <text>}`.
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self.0 {
            Error::Validation(message) => message,
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn tools_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let tools: Vec<serde_json::Value> = state.agent.tools().schemas().iter().map(|s| s.to_openai()).collect();
    let count = tools.len();
    Json(json!({ "tools": tools, "count": count }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

impl ChatRequest {
    /// The trimmed-non-empty message and the session to run it in.
    fn validate(self) -> Result<(String, String), ApiError> {
        if self.message.trim().is_empty() {
            return Err(ApiError(Error::Validation("Message cannot be empty".into())));
        }
        let id = self
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION.to_string());
        Ok((self.message, id))
    }
}

#[derive(Serialize)]
struct ChatResponse {
    success: bool,
    response: String,
    conversation_id: String,
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (message, conversation_id) = payload.validate()?;
    info!(conversation_id = %conversation_id, message_len = message.len(), "Chat request");

    let (stream, handle) = state.start_turn(conversation_id.clone(), message);
    let events = stream.collect().await;

    let (success, response) = match handle.join().await {
        Some(TurnOutcome::Finished { content, .. }) => (true, content),
        Some(TurnOutcome::IterationExhausted { .. }) => (false, ITERATION_LIMIT_MESSAGE.to_string()),
        Some(TurnOutcome::Failed { error }) => (false, error),
        Some(TurnOutcome::Abandoned { .. }) => (false, "Turn abandoned".to_string()),
        None => {
            error!(events = events.len(), "Chat worker did not finish");
            (false, "Internal error".to_string())
        }
    };

    Ok(Json(ChatResponse {
        success,
        response,
        conversation_id,
    }))
}

async fn stream_query_handler(
    State(state): State<SharedState>,
    Query(payload): Query<ChatRequest>,
) -> Result<Response, ApiError> {
    stream_chat(state, payload)
}

async fn stream_json_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    stream_chat(state, payload)
}

/// Respond with the turn's frames as they arrive.
fn stream_chat(state: SharedState, payload: ChatRequest) -> Result<Response, ApiError> {
    let (message, conversation_id) = payload.validate()?;
    info!(conversation_id = %conversation_id, message_len = message.len(), "Chat stream request");

    let (stream, _handle) = state.start_turn(conversation_id, message);
    let body = stream
        .into_frames()
        .map(|frame| Ok::<_, Infallible>(frame.to_sse()));

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}
