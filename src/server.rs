//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer a conversation, using the knowledge base as context |
//! | `GET`  | `/api/knowledge?q=` | Search entries, or list the newest when `q` is empty |
//! | `POST` | `/api/knowledge` | Contribute a question/answer pair |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/` | Chat UI |
//! | `GET`  | `/contribute` | Contribution form |
//!
//! Errors follow the contract in [`crate::error`].
//!
//! # CORS
//!
//! Any origin may call the API with `GET`, `POST`, and `OPTIONS` and a
//! `Content-Type` header; preflight requests are answered by the CORS layer.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, Method, StatusCode},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{self, ChatClient, ChatContext};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::ApiError;
use crate::knowledge;
use crate::migrate;
use crate::models::{ChatReply, ChatRequest, ContributionRequest, KnowledgeEntry};
use crate::search;

/// Shared state handed to every handler. Immutable after startup.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<ChatClient>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: ChatClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            embedder,
            chat: Arc::new(chat),
        }
    }

    /// Connect to the database, apply migrations, and build the embedding
    /// provider and chat client from `config` and the environment.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let embedder = embedding::create_provider(&config.embedding)?;
        let chat = ChatClient::from_env(&config.chat)?;
        Ok(Self::new(config.clone(), pool, embedder, chat))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Build the router with all routes and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handle_index))
        .route("/contribute", get(handle_contribute_page))
        .route("/health", get(handle_health))
        .route("/api/chat", axum::routing::post(handle_chat))
        .route(
            "/api/knowledge",
            get(handle_search_knowledge).post(handle_create_knowledge),
        )
        .layer(cors)
        .with_state(state)
}

/// Start serving on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;

    if !state.chat.has_api_key() {
        tracing::warn!(
            env = %config.chat.api_key_env,
            "chat API key not set; /api/chat will return a configuration error"
        );
    }
    let entries = knowledge::count_entries(state.pool()).await?;
    tracing::info!(
        provider = %config.embedding.provider,
        model = %config.chat.model,
        entries,
        "knowledge base ready"
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ UI pages ============

async fn handle_index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn handle_contribute_page() -> Html<&'static str> {
    Html(include_str!("../static/contribute.html"))
}

// ============ POST /api/chat ============

/// The API key is checked before the body, so a misconfigured server
/// reports that regardless of what the client sent.
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let messages = match payload {
        Ok(Json(request)) => request.messages,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable chat request body");
            None
        }
    };

    let ctx = ChatContext {
        pool: &state.pool,
        retrieval: &state.config.retrieval,
        embedder: state.embedder.as_ref(),
        client: &state.chat,
    };

    let reply = chat::respond(&ctx, messages).await?;
    Ok(Json(reply))
}

// ============ GET /api/knowledge ============

#[derive(Debug, Deserialize)]
struct KnowledgeQuery {
    #[serde(default)]
    q: Option<String>,
}

async fn handle_search_knowledge(
    State(state): State<AppState>,
    Query(params): Query<KnowledgeQuery>,
) -> Result<Json<Vec<KnowledgeEntry>>, ApiError> {
    let query = params.q.unwrap_or_default();

    let outcome = search::search_knowledge(
        &state.pool,
        &state.config.retrieval,
        state.embedder.as_ref(),
        &query,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %format!("{:#}", e), "knowledge search failed");
        ApiError::internal(format!("{:#}", e))
    })?;

    Ok(Json(outcome.into_entries()))
}

// ============ POST /api/knowledge ============

async fn handle_create_knowledge(
    State(state): State<AppState>,
    payload: Result<Json<ContributionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<KnowledgeEntry>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::Validation {
        message: "Invalid request body".to_string(),
        details: Some(rejection.body_text()),
    })?;

    let entry =
        knowledge::submit_contribution(&state.pool, state.embedder.as_ref(), request).await?;
    tracing::info!(entry_id = %entry.id, "knowledge entry contributed");

    Ok((StatusCode::CREATED, Json(entry)))
}
