//! Outbound sends through the Graph messaging API.
//!
//! Messenger pages post to `/me/messages`, Instagram business accounts to
//! `/{page_id}/messages`; everything else about the call is shared. Attachment
//! sends retry the platform's timeout signature, text sends are single-shot.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    config::PageCredential,
    error::SendError,
    retry::{RetryPolicy, Sleeper, TokioSleeper},
    types::Platform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
}

impl AttachmentKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.trim().to_ascii_lowercase().starts_with("video/") {
            AttachmentKind::Video
        } else {
            AttachmentKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
        }
    }

    /// How a sent file shows up in the conversation history.
    pub fn record_text(&self, url: &str) -> String {
        match self {
            AttachmentKind::Image => format!("📷 Image: {url}"),
            AttachmentKind::Video => format!("🎥 Video: {url}"),
        }
    }
}

#[async_trait]
pub trait PlatformSender: Send + Sync {
    async fn send_text(
        &self,
        recipient: &str,
        text: &str,
        credential: &PageCredential,
    ) -> Result<(), SendError>;

    async fn send_attachment(
        &self,
        recipient: &str,
        media_url: &str,
        kind: AttachmentKind,
        credential: &PageCredential,
    ) -> Result<(), SendError>;
}

/// Upper bound on one Graph call. Retried sends get it per attempt.
pub const DEFAULT_GRAPH_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP plumbing shared by both senders.
#[derive(Clone)]
pub struct GraphHttp {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl GraphHttp {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_GRAPH_TIMEOUT,
            retry: RetryPolicy::ATTACHMENT_SEND,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    async fn post_message(
        &self,
        path: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<(), SendError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .query(&[("access_token", access_token)])
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<Value>(&raw_body).unwrap_or(Value::Null);
        let error = parsed.get("error").filter(|e| e.is_object());

        if status.is_success() && error.is_none() {
            debug!(path, status = status.as_u16(), "platform accepted message");
            return Ok(());
        }

        let message = error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(raw_body);
        Err(SendError::Api {
            status: status.as_u16(),
            code: error.and_then(|e| e.get("code")).and_then(Value::as_i64),
            subcode: error
                .and_then(|e| e.get("error_subcode"))
                .and_then(Value::as_i64),
            message,
        })
    }

    async fn post_with_retry(
        &self,
        path: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<(), SendError> {
        self.retry
            .run(self.sleeper.as_ref(), SendError::is_transient, |attempt| {
                if attempt > 1 {
                    info!(path, attempt, "retrying attachment send");
                }
                self.post_message(path, access_token, body)
            })
            .await
    }
}

fn attachment_message(kind: AttachmentKind, media_url: &str) -> Value {
    json!({
        "attachment": {
            "type": kind.as_str(),
            "payload": { "url": media_url }
        }
    })
}

pub struct FacebookSender {
    graph: GraphHttp,
}

impl FacebookSender {
    pub fn new(graph: GraphHttp) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl PlatformSender for FacebookSender {
    async fn send_text(
        &self,
        recipient: &str,
        text: &str,
        credential: &PageCredential,
    ) -> Result<(), SendError> {
        let body = json!({
            "messaging_type": "RESPONSE",
            "recipient": { "id": recipient },
            "message": { "text": text }
        });
        self.graph
            .post_message("me/messages", &credential.access_token, &body)
            .await
    }

    async fn send_attachment(
        &self,
        recipient: &str,
        media_url: &str,
        kind: AttachmentKind,
        credential: &PageCredential,
    ) -> Result<(), SendError> {
        let body = json!({
            "messaging_type": "RESPONSE",
            "recipient": { "id": recipient },
            "message": attachment_message(kind, media_url)
        });
        self.graph
            .post_with_retry("me/messages", &credential.access_token, &body)
            .await
    }
}

pub struct InstagramSender {
    graph: GraphHttp,
}

impl InstagramSender {
    pub fn new(graph: GraphHttp) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl PlatformSender for InstagramSender {
    async fn send_text(
        &self,
        recipient: &str,
        text: &str,
        credential: &PageCredential,
    ) -> Result<(), SendError> {
        let body = json!({
            "recipient": { "id": recipient },
            "message": { "text": text }
        });
        let path = format!("{}/messages", credential.page_id);
        self.graph
            .post_message(&path, &credential.access_token, &body)
            .await
    }

    async fn send_attachment(
        &self,
        recipient: &str,
        media_url: &str,
        kind: AttachmentKind,
        credential: &PageCredential,
    ) -> Result<(), SendError> {
        let body = json!({
            "recipient": { "id": recipient },
            "message": attachment_message(kind, media_url)
        });
        let path = format!("{}/messages", credential.page_id);
        self.graph
            .post_with_retry(&path, &credential.access_token, &body)
            .await
    }
}

/// Picks the sender for a conversation's platform.
#[derive(Clone)]
pub struct Platforms {
    facebook: Arc<dyn PlatformSender>,
    instagram: Arc<dyn PlatformSender>,
}

impl Platforms {
    pub fn new(facebook: Arc<dyn PlatformSender>, instagram: Arc<dyn PlatformSender>) -> Self {
        Self {
            facebook,
            instagram,
        }
    }

    pub fn graph(graph: GraphHttp) -> Self {
        Self::new(
            Arc::new(FacebookSender::new(graph.clone())),
            Arc::new(InstagramSender::new(graph)),
        )
    }

    pub fn for_platform(&self, platform: Platform) -> &dyn PlatformSender {
        match platform {
            Platform::Facebook => self.facebook.as_ref(),
            Platform::Instagram => self.instagram.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{body_partial_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::retry::tests::RecordingSleeper;

    fn credential() -> PageCredential {
        PageCredential {
            page_id: "P1".into(),
            access_token: "tok".into(),
        }
    }

    fn graph(server: &MockServer, sleeper: Arc<RecordingSleeper>) -> GraphHttp {
        GraphHttp::new(reqwest::Client::new(), server.uri())
            .with_retry(RetryPolicy::ATTACHMENT_SEND, sleeper)
    }

    fn timeout_error() -> Value {
        json!({ "error": { "message": "timeout", "code": -2, "error_subcode": 2018386 } })
    }

    #[test]
    fn attachment_kind_follows_mime_type() {
        assert_eq!(AttachmentKind::from_mime("video/mp4"), AttachmentKind::Video);
        assert_eq!(AttachmentKind::from_mime("image/png"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_mime(""), AttachmentKind::Image);
        assert_eq!(
            AttachmentKind::Video.record_text("https://x/v.mp4"),
            "🎥 Video: https://x/v.mp4"
        );
    }

    #[tokio::test]
    async fn facebook_text_goes_to_me_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(query_param("access_token", "tok"))
            .and(body_partial_json(json!({
                "recipient": { "id": "S1" },
                "message": { "text": "hello" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message_id": "m1" })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = FacebookSender::new(graph(&server, Arc::default()));
        sender.send_text("S1", "hello", &credential()).await.unwrap();
    }

    #[tokio::test]
    async fn instagram_uses_page_scoped_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/P1/messages"))
            .and(body_partial_json(json!({
                "message": { "attachment": { "type": "video", "payload": { "url": "https://x/v.mp4" } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let sender = InstagramSender::new(graph(&server, Arc::default()));
        sender
            .send_attachment("S1", "https://x/v.mp4", AttachmentKind::Video, &credential())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attachment_timeout_is_retried_three_times() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_json(timeout_error()))
            .expect(3)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sender = FacebookSender::new(graph(&server, sleeper.clone()));
        let err = sender
            .send_attachment("S1", "https://x/a.jpg", AttachmentKind::Image, &credential())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(
            sleeper.slept(),
            vec![
                Duration::from_millis(800),
                Duration::from_millis(1600),
                Duration::from_millis(2400)
            ]
        );
    }

    #[tokio::test]
    async fn attachment_recovers_after_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(timeout_error()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message_id": "m" })))
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sender = FacebookSender::new(graph(&server, sleeper.clone()));
        sender
            .send_attachment("S1", "https://x/a.jpg", AttachmentKind::Image, &credential())
            .await
            .unwrap();
        assert_eq!(sleeper.slept(), vec![Duration::from_millis(800)]);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Invalid OAuth access token", "code": 190 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sender = FacebookSender::new(graph(&server, sleeper.clone()));
        let err = sender
            .send_attachment("S1", "https://x/a.jpg", AttachmentKind::Image, &credential())
            .await
            .unwrap_err();

        match err {
            SendError::Api { status, code, message, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(190));
                assert_eq!(message, "Invalid OAuth access token");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn text_send_is_not_retried_even_on_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(timeout_error()))
            .expect(1)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sender = FacebookSender::new(graph(&server, sleeper.clone()));
        let err = sender.send_text("S1", "hi", &credential()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn error_envelope_on_success_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": { "message": "nope", "code": 10 }
            })))
            .mount(&server)
            .await;

        let sender = InstagramSender::new(graph(&server, Arc::default()));
        assert!(sender.send_text("S1", "hi", &credential()).await.is_err());
    }

    #[tokio::test]
    async fn stalled_graph_call_gives_up_at_the_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "message_id": "m1" }))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sender = FacebookSender::new(
            graph(&server, sleeper.clone()).with_timeout(Duration::from_millis(200)),
        );
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            sender.send_text("S1", "hi", &credential()),
        )
        .await
        .expect("send should give up before the outer deadline");

        let err = result.unwrap_err();
        assert!(matches!(&err, SendError::Transport(e) if e.is_timeout()));
        assert!(!err.is_transient());
        assert!(sleeper.slept().is_empty());
    }
}
