use std::{fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "facebook" => Some(Platform::Facebook),
            "instagram" => Some(Platform::Instagram),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Customer,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Customer => "customer",
            Sender::Bot => "bot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "customer" => Some(Sender::Customer),
            "bot" => Some(Sender::Bot),
            _ => None,
        }
    }
}

/// Stable identity of one sender talking to one page: `{page_id}_{sender_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(page_id: &str, sender_id: &str) -> Self {
        Self(format!("{page_id}_{sender_id}"))
    }

    /// Accepts an id coming back from the dashboard. Both halves must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (page_id, sender_id) = raw.split_once('_')?;
        if page_id.is_empty() || sender_id.is_empty() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn page_id(&self) -> &str {
        self.0.split_once('_').map(|(page, _)| page).unwrap_or("")
    }

    pub fn sender_id(&self) -> &str {
        self.0.split_once('_').map(|(_, sender)| sender).unwrap_or("")
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound customer message, already reduced to the fields the reply
/// pipeline cares about. Carries text, attachments, or both, never neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub platform: Platform,
    pub page_id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub attachment_urls: Vec<String>,
}

impl InboundEvent {
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::new(&self.page_id, &self.sender_id)
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachment_urls.is_empty()
    }

    /// Text stored for the customer turn and fed to the conversation context.
    pub fn content(&self) -> String {
        if self.has_attachments() {
            return crate::normalize::summarize_attachments(&self.attachment_urls);
        }
        self.text.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub conversation_id: ConversationId,
    pub customer_name: String,
    pub sender: Sender,
    pub message: String,
    pub platform: Platform,
    pub page_id: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    pub fn live(&self) -> LiveMessage {
        LiveMessage {
            conversation_id: self.conversation_id.to_string(),
            customer_name: self.customer_name.clone(),
            sender: self.sender,
            message: self.message.clone(),
            platform: self.platform,
            page_id: self.page_id.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// What dashboard viewers receive over the live socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessage {
    pub conversation_id: String,
    pub customer_name: String,
    pub sender: Sender,
    pub message: String,
    pub platform: Platform,
    pub page_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_type: String,
    pub size: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub customer_name: String,
    pub platform: Platform,
    pub page_id: String,
    pub last_message: String,
    pub last_time: DateTime<Utc>,
}

impl From<&MessageRecord> for ConversationSummary {
    fn from(record: &MessageRecord) -> Self {
        Self {
            conversation_id: record.conversation_id.to_string(),
            customer_name: record.customer_name.clone(),
            platform: record.platform,
            page_id: record.page_id.clone(),
            last_message: record.message.clone(),
            last_time: record.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualReplyBody {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub message: String,
}

/// A file an operator attached to a manual media reply.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMedia {
    #[serde(rename = "type")]
    pub kind: crate::platform::AttachmentKind,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMedia {
    pub name: String,
    pub mimetype: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSendSummary {
    pub ok: bool,
    pub sent: usize,
    pub failed: usize,
    pub sent_items: Vec<SentMedia>,
    pub failed_items: Vec<FailedMedia>,
}

impl MediaSendSummary {
    pub fn from_results(sent_items: Vec<SentMedia>, failed_items: Vec<FailedMedia>) -> Self {
        Self {
            ok: !sent_items.is_empty(),
            sent: sent_items.len(),
            failed: failed_items.len(),
            sent_items,
            failed_items,
        }
    }
}

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub verify_token: String,
    pub app_secret: String,
}
