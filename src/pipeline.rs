//! Webhook-to-reply orchestration and operator-initiated sends.
//!
//! An inbound event runs normalize → persist customer → broadcast → decide
//! reply → send → persist bot → broadcast, in one pass. The webhook boundary
//! always acknowledges: drops, unknown pages and failures are logged here
//! and never reach the platform.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    config::{PageCredential, PageDirectory},
    error::{ManualSendError, MediaItemError, PipelineError, StoreError},
    live::LiveHub,
    media::{MediaStorage, MAX_UPLOAD_FILES},
    normalize::normalize_event,
    platform::Platforms,
    policy::{Reply, ReplyPolicy},
    store::MessageStore,
    types::{
        ConversationId, FailedMedia, MediaSendSummary, MessageRecord, OutgoingFile, Platform,
        SentMedia, Sender,
    },
};

/// Body returned for every event delivery, whatever happened internally.
pub const WEBHOOK_ACK: &str = "EVENT_RECEIVED";

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// No entry, sender or content.
    Dropped,
    UnknownPage { page_id: String },
    Replied(Reply),
}

pub struct Pipeline {
    store: Arc<dyn MessageStore>,
    live: Arc<LiveHub>,
    policy: ReplyPolicy,
    platforms: Platforms,
    pages: PageDirectory,
    media: MediaStorage,
}

/// Where a manual send goes, resolved from the conversation id and its history.
struct ManualTarget {
    conversation: ConversationId,
    recipient: String,
    platform: Platform,
    customer_name: String,
    credential: PageCredential,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        live: Arc<LiveHub>,
        policy: ReplyPolicy,
        platforms: Platforms,
        pages: PageDirectory,
        media: MediaStorage,
    ) -> Self {
        Self {
            store,
            live,
            policy,
            platforms,
            pages,
            media,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn live(&self) -> &Arc<LiveHub> {
        &self.live
    }

    pub fn media(&self) -> &MediaStorage {
        &self.media
    }

    pub async fn handle_webhook(&self, payload: &Value) -> &'static str {
        match self.process_event(payload).await {
            Ok(WebhookOutcome::Dropped) => debug!("webhook carried no usable message"),
            Ok(WebhookOutcome::UnknownPage { page_id }) => {
                warn!(page_id = %page_id, "event for unknown page ignored")
            }
            Ok(WebhookOutcome::Replied(reply)) => {
                info!(source = ?reply.source, "replied to inbound message")
            }
            Err(err) => error!(error = %err, "webhook processing failed"),
        }
        WEBHOOK_ACK
    }

    pub async fn process_event(&self, payload: &Value) -> Result<WebhookOutcome, PipelineError> {
        let Some(event) = normalize_event(payload) else {
            return Ok(WebhookOutcome::Dropped);
        };
        let Some(credential) = self.pages.credential(&event.page_id) else {
            return Ok(WebhookOutcome::UnknownPage {
                page_id: event.page_id,
            });
        };

        let conversation = event.conversation_id();
        // No profile lookup; the sender id doubles as the display name.
        let customer_name = event.sender_id.clone();

        self.record(MessageRecord {
            conversation_id: conversation.clone(),
            customer_name: customer_name.clone(),
            sender: Sender::Customer,
            message: event.content(),
            platform: event.platform,
            page_id: event.page_id.clone(),
            timestamp: Utc::now(),
        })
        .await?;

        let reply = self.policy.decide(&event, &conversation).await;

        self.platforms
            .for_platform(event.platform)
            .send_text(&event.sender_id, &reply.text, &credential)
            .await?;

        self.record(MessageRecord {
            conversation_id: conversation,
            customer_name,
            sender: Sender::Bot,
            message: reply.text.clone(),
            platform: event.platform,
            page_id: event.page_id,
            timestamp: Utc::now(),
        })
        .await?;

        Ok(WebhookOutcome::Replied(reply))
    }

    /// Persists, then announces to live viewers.
    async fn record(&self, record: MessageRecord) -> Result<MessageRecord, StoreError> {
        self.store.append(&record).await?;
        self.live.broadcast(&record.live()).await;
        Ok(record)
    }

    async fn resolve_target(&self, conversation_id: &str) -> Result<ManualTarget, ManualSendError> {
        let conversation = ConversationId::parse(conversation_id)
            .ok_or(ManualSendError::InvalidInput("Invalid conversationId"))?;
        let recipient = conversation.sender_id().to_string();
        let last = self.store.latest(&conversation).await?;
        let credential = self
            .pages
            .credential(conversation.page_id())
            .ok_or(ManualSendError::UnknownPage)?;

        Ok(ManualTarget {
            platform: last.as_ref().map(|r| r.platform).unwrap_or(Platform::Facebook),
            customer_name: last
                .map(|r| r.customer_name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| recipient.clone()),
            conversation,
            recipient,
            credential,
        })
    }

    fn bot_record(&self, target: &ManualTarget, message: String) -> MessageRecord {
        MessageRecord {
            conversation_id: target.conversation.clone(),
            customer_name: target.customer_name.clone(),
            sender: Sender::Bot,
            message,
            platform: target.platform,
            page_id: target.credential.page_id.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Operator text reply. Sent once, no retry.
    pub async fn manual_reply(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<MessageRecord, ManualSendError> {
        if conversation_id.trim().is_empty() || message.trim().is_empty() {
            return Err(ManualSendError::InvalidInput(
                "conversationId and message required",
            ));
        }
        let target = self.resolve_target(conversation_id).await?;

        self.platforms
            .for_platform(target.platform)
            .send_text(&target.recipient, message, &target.credential)
            .await?;

        let record = self
            .record(self.bot_record(&target, message.to_string()))
            .await?;
        info!(conversation_id = %target.conversation, "manual reply sent");
        Ok(record)
    }

    /// Operator media reply. Each file is uploaded, sent and recorded on its
    /// own; the call is ok when at least one file made it.
    pub async fn manual_media_reply(
        &self,
        conversation_id: &str,
        files: Vec<OutgoingFile>,
    ) -> Result<MediaSendSummary, ManualSendError> {
        if conversation_id.trim().is_empty() || files.is_empty() {
            return Err(ManualSendError::InvalidInput(
                "conversationId and files required",
            ));
        }
        if files.len() > MAX_UPLOAD_FILES {
            return Err(ManualSendError::InvalidInput("too many files"));
        }
        let target = self.resolve_target(conversation_id).await?;
        if !self.media.has_public_url() {
            return Err(ManualSendError::MissingPublicUrl);
        }

        let mut sent_items = Vec::new();
        let mut failed_items = Vec::new();
        for file in files {
            match self.send_media_file(&target, &file).await {
                Ok(sent) => sent_items.push(sent),
                Err(err) => {
                    warn!(
                        conversation_id = %target.conversation,
                        file = %file.original_name,
                        error = %err,
                        "manual media file failed"
                    );
                    failed_items.push(FailedMedia {
                        name: file.original_name,
                        mimetype: file.mime_type,
                        error: err.to_string(),
                    });
                }
            }
        }

        let summary = MediaSendSummary::from_results(sent_items, failed_items);
        info!(
            conversation_id = %target.conversation,
            sent = summary.sent,
            failed = summary.failed,
            "manual media reply finished"
        );
        Ok(summary)
    }

    async fn send_media_file(
        &self,
        target: &ManualTarget,
        file: &OutgoingFile,
    ) -> Result<SentMedia, MediaItemError> {
        let stored = self
            .media
            .store(&file.original_name, &file.mime_type, &file.bytes)
            .await?;

        self.platforms
            .for_platform(target.platform)
            .send_attachment(&target.recipient, &stored.url, stored.kind, &target.credential)
            .await?;

        self.record(self.bot_record(target, stored.kind.record_text(&stored.url)))
            .await?;

        Ok(SentMedia {
            kind: stored.kind,
            url: stored.url,
        })
    }
}
