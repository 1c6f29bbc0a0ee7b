//! Decides what the bot answers to an inbound event.
//!
//! First match wins: attachment acknowledgment, catalog price quote, AI
//! completion, fixed fallback. Whatever is chosen, the exchange is appended
//! to the conversation's context window.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    ai::{CompletionProvider, CompletionRequest, PromptMessage, PromptRole},
    catalog::ProductCatalog,
    context::ContextStore,
    error::AiError,
    prompting::{
        render_price_quote, render_reply_style, render_system_prompt, PriceQuoteContext,
        SystemPromptContext,
    },
    types::{ChatTurn, ConversationId, InboundEvent},
};

pub const AI_TEMPERATURE: f32 = 0.3;
pub const AI_MAX_TOKENS: u32 = 120;

#[derive(Debug, Clone)]
pub struct ReplyTexts {
    pub attachment_ack: String,
    pub fallback: String,
}

impl Default for ReplyTexts {
    fn default() -> Self {
        Self {
            attachment_ack: "ধন্যবাদ! ছবিটা পেয়েছি দয়া করে আপনার whatsapp নাম্বার দিন, আমাদের একজন প্রতিনিধি শিগ্রই আপনার সাথে যোগাযোগ করবে।".to_string(),
            fallback: "ধন্যবাদ! অনুগ্রহ করে আপনার প্রোডাক্টের ছবি দিন 😊".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Persona {
    pub business_name: String,
    pub offerings: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            business_name: "Takesell".to_string(),
            offerings: vec![
                "We provide custom sofa covers, pillow covers, and chair covers".to_string(),
                "Cash on Delivery is available all over Bangladesh".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplySource {
    AttachmentAck,
    PriceQuote { price: f64 },
    Ai,
    /// The completion collaborator failed; the cause is kept for logs.
    Fallback { cause: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

pub struct ReplyPolicy {
    catalog: Arc<ProductCatalog>,
    ai: Arc<dyn CompletionProvider>,
    context: Arc<ContextStore>,
    texts: ReplyTexts,
    system_prompt: String,
    style_directive: String,
}

impl ReplyPolicy {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        ai: Arc<dyn CompletionProvider>,
        context: Arc<ContextStore>,
        persona: &Persona,
        texts: ReplyTexts,
    ) -> Self {
        Self {
            system_prompt: render_system_prompt(&SystemPromptContext {
                business_name: &persona.business_name,
                offerings: &persona.offerings,
                attachment_reply: &texts.attachment_ack,
            }),
            style_directive: render_reply_style("1-2"),
            catalog,
            ai,
            context,
            texts,
        }
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub async fn decide(&self, event: &InboundEvent, conversation: &ConversationId) -> Reply {
        let content = event.content();
        let reply = self.choose(event, conversation, &content).await;
        debug!(
            conversation_id = %conversation,
            source = ?reply.source,
            "reply chosen"
        );
        self.context
            .append_exchange(conversation, content, reply.text.clone())
            .await;
        reply
    }

    async fn choose(
        &self,
        event: &InboundEvent,
        conversation: &ConversationId,
        content: &str,
    ) -> Reply {
        if event.has_attachments() {
            return Reply {
                text: self.texts.attachment_ack.clone(),
                source: ReplySource::AttachmentAck,
            };
        }

        if let Some(quote) = self.price_quote(content) {
            return quote;
        }

        match self.ai_reply(conversation, content).await {
            Ok(text) => Reply {
                text,
                source: ReplySource::Ai,
            },
            Err(err) => {
                warn!(conversation_id = %conversation, error = %err, "ai reply failed, using fallback");
                Reply {
                    text: self.texts.fallback.clone(),
                    source: ReplySource::Fallback {
                        cause: err.to_string(),
                    },
                }
            }
        }
    }

    fn price_quote(&self, text: &str) -> Option<Reply> {
        let mut tokens = text.split_whitespace();
        let product_type = tokens.next()?;
        let size = tokens.next()?;
        let product = self.catalog.find(product_type, size)?;
        Some(Reply {
            text: render_price_quote(&PriceQuoteContext {
                product_type: &product.product_type,
                size: &product.size,
                price: product.price,
            }),
            source: ReplySource::PriceQuote {
                price: product.price,
            },
        })
    }

    async fn ai_reply(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<String, AiError> {
        let window = self.context.window(conversation).await;
        let request = CompletionRequest {
            messages: self.build_messages(&window, text),
            temperature: AI_TEMPERATURE,
            max_tokens: AI_MAX_TOKENS,
        };
        self.ai.complete(&request).await
    }

    /// System persona, style directive, prior turns oldest first, new text.
    pub fn build_messages(&self, window: &[ChatTurn], text: &str) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(window.len() + 3);
        messages.push(PromptMessage::new(PromptRole::System, &self.system_prompt));
        messages.push(PromptMessage::new(PromptRole::Assistant, &self.style_directive));
        messages.extend(window.iter().map(PromptMessage::from));
        messages.push(PromptMessage::new(PromptRole::User, text));
        messages
    }
}
