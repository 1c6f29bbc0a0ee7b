use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State,
        WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    ai::OpenAiCompatClient,
    catalog::ProductCatalog,
    config::{Config, StorageBackend},
    context::ContextStore,
    error::StartupError,
    live::LiveHub,
    media::{media_content_type_from_extension, MediaStorage, MAX_UPLOAD_BYTES, MAX_UPLOAD_FILES},
    normalize::{verify_handshake, verify_signature},
    pipeline::{Pipeline, WEBHOOK_ACK},
    platform::{GraphHttp, Platforms},
    policy::ReplyPolicy,
    store::{
        MemoryMessageStore, MessageStore, PgMessageStore, CONVERSATION_LIST_LIMIT, HISTORY_LIMIT,
    },
    types::{AppState, ConversationId, ManualReplyBody, OutgoingFile},
};

pub const API_PREFIX: &str = "/api/social-ai-bot";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

fn message_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

async fn webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match verify_handshake(&params, &state.verify_token) {
        Ok(challenge) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        Err(err) => {
            warn!("webhook verification rejected");
            (StatusCode::FORBIDDEN, err.to_string()).into_response()
        }
    }
}

/// Always 200 `EVENT_RECEIVED`, even for unsigned or unreadable bodies.
async fn webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.app_secret, signature, &body) {
        warn!("webhook signature mismatch, event dropped");
        return (StatusCode::OK, WEBHOOK_ACK).into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "webhook body is not json, event dropped");
            return (StatusCode::OK, WEBHOOK_ACK).into_response();
        }
    };

    let ack = state.pipeline.handle_webhook(&payload).await;
    (StatusCode::OK, ack).into_response()
}

async fn get_conversations(State(state): State<Arc<AppState>>) -> Response {
    match state
        .pipeline
        .store()
        .recent_conversations(CONVERSATION_LIST_LIMIT)
        .await
    {
        Ok(conversations) => Json(conversations).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list conversations");
            message_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load conversations")
        }
    }
}

async fn get_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(conversation) = ConversationId::parse(&conversation_id) else {
        return message_response(StatusCode::BAD_REQUEST, "Invalid conversationId");
    };
    match state
        .pipeline
        .store()
        .history(&conversation, HISTORY_LIMIT)
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => {
            error!(conversation_id = %conversation, error = %err, "failed to load history");
            message_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load messages")
        }
    }
}

async fn manual_reply(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ManualReplyBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return message_response(rejection.status(), rejection.body_text()),
    };
    match state
        .pipeline
        .manual_reply(&body.conversation_id, &body.message)
        .await
    {
        Ok(record) => Json(json!({ "ok": true, "record": record })).into_response(),
        Err(err) => {
            warn!(error = %err, "manual reply failed");
            err.into_response()
        }
    }
}

async fn manual_media_reply(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut conversation_id = String::new();
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return message_response(err.status(), err.body_text()),
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "conversationId" => match field.text().await {
                Ok(text) => conversation_id = text.trim().to_string(),
                Err(err) => return message_response(err.status(), err.body_text()),
            },
            "files" => {
                if files.len() == MAX_UPLOAD_FILES {
                    return message_response(StatusCode::BAD_REQUEST, "too many files");
                }
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                match field.bytes().await {
                    Ok(bytes) => files.push(OutgoingFile {
                        original_name,
                        mime_type,
                        bytes: bytes.to_vec(),
                    }),
                    Err(err) => return message_response(err.status(), err.body_text()),
                }
            }
            _ => continue,
        }
    }

    match state
        .pipeline
        .manual_media_reply(&conversation_id, files)
        .await
    {
        Ok(summary) => {
            let status = if summary.ok {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(summary)).into_response()
        }
        Err(err) => {
            warn!(error = %err, "manual media reply rejected");
            err.into_response()
        }
    }
}

async fn serve_upload(
    Path(file_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(bytes) = state.pipeline.media().read(&file_name).await else {
        return message_response(StatusCode::NOT_FOUND, "media file not found");
    };

    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    let mut response = Response::new(axum::body::Body::from(bytes));
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media_content_type_from_extension(&ext)),
    );
    response
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "now": Utc::now().to_rfc3339(),
        "viewers": state.pipeline.live().viewer_count().await,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move { state.pipeline.live().serve_viewer(socket).await })
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/facebook/webhook",
            get(webhook_verify).post(webhook_event),
        )
        .route("/conversations", get(get_conversations))
        .route("/messages/{conversation_id}", get(get_messages))
        .route("/manual-reply", post(manual_reply))
        .route(
            "/manual-media-reply",
            post(manual_media_reply)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_FILES * MAX_UPLOAD_BYTES + 64 * 1024)),
        );

    Router::new()
        .nest(API_PREFIX, api)
        .route("/uploads/{file_name}", get(serve_upload))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,social_chat_server=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.media_storage_dir).await?;

    let store: Arc<dyn MessageStore> = match config.storage {
        StorageBackend::Postgres => {
            let db = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgMessageStore::new(db))
        }
        StorageBackend::Memory => {
            warn!("using in-memory message store, history is lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };

    let catalog = match &config.products_path {
        Some(path) => ProductCatalog::load_json(path).await?,
        None => {
            warn!("PRODUCTS_PATH not set, price quotes disabled");
            ProductCatalog::default()
        }
    };
    if config.pages.is_empty() {
        warn!("PAGE_TOKENS is empty, every inbound event will be ignored");
    }
    if config.public_base_url.is_none() {
        warn!("PUBLIC_BASE_URL not set, manual media replies will fail");
    }

    let http = reqwest::Client::new();
    let ai = OpenAiCompatClient::new(
        http.clone(),
        config.ai.base_url.clone(),
        config.ai.api_key.clone(),
        config.ai.model.clone(),
    );
    let policy = ReplyPolicy::new(
        Arc::new(catalog),
        Arc::new(ai),
        Arc::new(ContextStore::default()),
        &config.persona,
        config.reply_texts.clone(),
    );
    let pipeline = Pipeline::new(
        store,
        Arc::new(LiveHub::new()),
        policy,
        Platforms::graph(GraphHttp::new(http, config.graph_api_base.clone())),
        config.pages.clone(),
        MediaStorage::new(
            config.media_storage_dir.clone(),
            config.public_base_url.clone(),
        ),
    );

    let port = config.port;
    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        verify_token: config.verify_token,
        app_secret: config.app_secret,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "social chat server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
