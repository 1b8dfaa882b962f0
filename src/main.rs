use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kea_pipeline::config::{Settings, DEFAULT_MIN_PROVIDERS};
use kea_pipeline::messages::{Content, Message, Role};
use kea_pipeline::pipeline::run_pipeline;
use kea_pipeline::providers::{ProviderDescriptor, ProviderRegistry};

#[derive(Clone)]
struct AppState {
    registry: Arc<ProviderRegistry>,
    settings: Settings,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    messages: Vec<Message>,
    min_providers: Option<usize>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "kea_pipeline=debug".into()),
            )
            .and_then(tracing_subscriber::fmt::layer()),
        )
        .init();

    if dotenvy::dotenv().is_err() {
        info!(".env file not found, using environment variables directly if set");
    }

    let settings = Settings::from_env();
    let descriptors = load_provider_descriptors();
    info!(count = descriptors.len(), "loaded provider descriptors from KEA_PROVIDERS");

    let http_client = reqwest::Client::new();
    let registry = ProviderRegistry::from_descriptors(
        descriptors,
        http_client,
        settings.app_url.clone(),
        settings.app_name.clone(),
    )
    .expect("provider registry construction failed");
    info!(providers = ?registry.provider_names(), "provider registry initialized");

    let state = AppState { registry: Arc::new(registry), settings };

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(state);

    let port_str = std::env::var("SERVER_PORT").unwrap_or_else(|_| "3001".to_string());
    let port = port_str.parse::<u16>().unwrap_or(3001);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));

    info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Reads `KEA_PROVIDERS`, a JSON array of `ProviderDescriptor`-shaped
/// objects. Absent or malformed input yields an empty provider set rather
/// than failing startup (spec SPEC_FULL.md §F): `/api/chat` reports the
/// problem per-request instead.
fn load_provider_descriptors() -> Vec<ProviderDescriptor> {
    let Ok(raw) = std::env::var("KEA_PROVIDERS") else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<ProviderDescriptor>>(&raw) {
        Ok(descriptors) => descriptors,
        Err(err) => {
            tracing::warn!(error = %err, "KEA_PROVIDERS is not a valid provider descriptor array, ignoring");
            Vec::new()
        }
    }
}

async fn root_handler() -> &'static str {
    "KEA pipeline orchestrator"
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "providers": state.registry.provider_names(),
    }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let provider_order: Vec<String> =
        state.registry.provider_names().into_iter().map(str::to_string).collect();

    if provider_order.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "No AI providers configured. Set KEA_PROVIDERS."})),
        )
            .into_response();
    }

    let mut messages = request.messages;
    messages.push(Message { role: Role::User, content: Content::Text(request.question.clone()) });

    let min_providers = request.min_providers.unwrap_or(DEFAULT_MIN_PROVIDERS);

    let sse_stream = run_pipeline(
        state.registry.clone(),
        provider_order,
        min_providers,
        state.settings.provider_timeout_secs,
        messages,
        request.question,
    );

    let body_stream = sse_stream.map(|chunk| Ok::<_, std::io::Error>(chunk));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap()
}
