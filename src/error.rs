use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Graph API error code for an upstream timeout.
const GRAPH_TIMEOUT_CODE: i64 = -2;
/// Graph API sub-code reported when an attachment fetch timed out.
const GRAPH_ATTACHMENT_TIMEOUT_SUBCODE: i64 = 2018386;

/// Failure talking to the messaging platform's send API.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("platform rejected message (status {status}, code {code:?}, subcode {subcode:?}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        subcode: Option<i64>,
        message: String,
    },

    #[error("platform request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl SendError {
    /// Only the platform's timeout signature is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SendError::Api { code, subcode, .. } => {
                *code == Some(GRAPH_TIMEOUT_CODE)
                    || *subcode == Some(GRAPH_ATTACHMENT_TIMEOUT_SUBCODE)
            }
            SendError::Transport(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("completion api key not configured")]
    NotConfigured,

    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion api returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response had no usable choice")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is malformed: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read product table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse product table {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Handshake rejection; the only error the webhook endpoint ever reports.
#[derive(Debug, thiserror::Error)]
#[error("webhook verification failed")]
pub struct Forbidden;

/// Anything that stops an inbound event between normalization and the
/// final broadcast. Logged by the orchestrator, never returned to the platform.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("persisting message failed: {0}")]
    Store(#[from] StoreError),

    #[error("sending reply failed: {0}")]
    Send(#[from] SendError),
}

/// Why one file of a multi-file manual send failed. Siblings are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum MediaItemError {
    #[error("upload failed: {0}")]
    Upload(#[from] std::io::Error),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced to operators by the manual send endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ManualSendError {
    #[error("{0}")]
    InvalidInput(&'static str),

    #[error("Page token not found")]
    UnknownPage,

    #[error("PUBLIC_BASE_URL missing in environment")]
    MissingPublicUrl,

    #[error("failed to send: {0}")]
    Send(#[from] SendError),

    #[error("failed to store message: {0}")]
    Store(#[from] StoreError),
}

impl ManualSendError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ManualSendError::InvalidInput(_) | ManualSendError::UnknownPage => {
                StatusCode::BAD_REQUEST
            }
            ManualSendError::Send(_) => StatusCode::BAD_GATEWAY,
            ManualSendError::MissingPublicUrl | ManualSendError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ManualSendError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({ "message": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
