//! In-process fakes for the pipeline's collaborators.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    ai::{CompletionProvider, CompletionRequest},
    config::PageCredential,
    error::{AiError, SendError},
    platform::{AttachmentKind, PlatformSender},
    types::{InboundEvent, Platform},
};

pub(crate) fn text_event(page_id: &str, sender_id: &str, text: &str) -> InboundEvent {
    InboundEvent {
        platform: Platform::Facebook,
        page_id: page_id.into(),
        sender_id: sender_id.into(),
        text: Some(text.into()),
        attachment_urls: Vec::new(),
    }
}

pub(crate) struct FakeAi {
    reply: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeAi {
    pub(crate) fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for FakeAi {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(AiError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SentCall {
    Text {
        page_id: String,
        recipient: String,
        text: String,
    },
    Attachment {
        page_id: String,
        recipient: String,
        url: String,
        kind: AttachmentKind,
    },
}

/// Records every send; calls listed in `failing_calls` (1-based) fail.
#[derive(Default)]
pub(crate) struct RecordingSender {
    calls: AtomicUsize,
    failing_calls: HashSet<usize>,
    sent: Mutex<Vec<SentCall>>,
}

impl RecordingSender {
    pub(crate) fn failing_on(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing_calls: calls.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn sent(&self) -> Vec<SentCall> {
        self.sent.lock().unwrap().clone()
    }

    fn attempt(&self) -> Result<(), SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(SendError::Api {
                status: 400,
                code: Some(100),
                subcode: None,
                message: format!("call {call} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformSender for RecordingSender {
    async fn send_text(
        &self,
        recipient: &str,
        text: &str,
        credential: &PageCredential,
    ) -> Result<(), SendError> {
        self.attempt()?;
        self.sent.lock().unwrap().push(SentCall::Text {
            page_id: credential.page_id.clone(),
            recipient: recipient.into(),
            text: text.into(),
        });
        Ok(())
    }

    async fn send_attachment(
        &self,
        recipient: &str,
        media_url: &str,
        kind: AttachmentKind,
        credential: &PageCredential,
    ) -> Result<(), SendError> {
        self.attempt()?;
        self.sent.lock().unwrap().push(SentCall::Attachment {
            page_id: credential.page_id.clone(),
            recipient: recipient.into(),
            url: media_url.into(),
            kind,
        });
        Ok(())
    }
}
