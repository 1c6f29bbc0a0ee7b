//! Turns Messenger / Instagram webhook payloads into [`InboundEvent`]s.
//!
//! The platform posts two shapes: the Messenger style
//! (`entry[].messaging[]`) and the change-feed style
//! (`entry[].changes[].value.messages[]`). Only the first entry and the first
//! message of each are read; anything without a sender or content is dropped.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::{
    error::Forbidden,
    types::{InboundEvent, Platform},
};

pub const IMAGES_MARKER: &str = "📷 Images:";

/// Answers the subscription handshake with the caller's challenge.
pub fn verify_handshake(
    params: &HashMap<String, String>,
    expected_token: &str,
) -> Result<String, Forbidden> {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe" && !expected_token.is_empty() && token == expected_token {
        return Ok(challenge);
    }
    Err(Forbidden)
}

/// Checks `X-Hub-Signature-256` against the app secret. No secret, no check.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

pub fn normalize_event(payload: &Value) -> Option<InboundEvent> {
    let entry = payload.get("entry")?.as_array()?.first()?;
    let page_id = id_text(entry.get("id")?)?;

    let (platform, sender_id, text, attachment_urls) = if let Some(messaging) =
        entry.get("messaging").and_then(Value::as_array)
    {
        let msg = messaging.first()?;
        let sender_id = msg.get("sender").and_then(|s| s.get("id")).and_then(id_text);
        let message = msg.get("message");
        let text = message
            .and_then(|m| m.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let urls = message
            .and_then(|m| m.get("attachments"))
            .and_then(Value::as_array)
            .map(|atts| {
                atts.iter()
                    .filter_map(|a| a.get("payload")?.get("url")?.as_str())
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        (Platform::Facebook, sender_id, text, urls)
    } else if let Some(changes) = entry.get("changes").and_then(Value::as_array) {
        let msg = changes
            .first()
            .and_then(|c| c.get("value"))
            .and_then(|v| v.get("messages"))
            .and_then(Value::as_array)
            .and_then(|messages| messages.first());
        let sender_id = msg
            .and_then(|m| m.get("from"))
            .and_then(|f| f.get("id"))
            .and_then(id_text);
        let text = msg.and_then(|m| m.get("text")).and_then(|t| {
            t.as_str()
                .or_else(|| t.get("body").and_then(Value::as_str))
                .map(str::to_string)
        });
        (Platform::Instagram, sender_id, text, Vec::new())
    } else {
        return None;
    };

    let sender_id = sender_id.filter(|id| !id.is_empty())?;
    let text = text.filter(|t| !t.trim().is_empty());
    if text.is_none() && attachment_urls.is_empty() {
        return None;
    }

    Some(InboundEvent {
        platform,
        page_id,
        sender_id,
        text,
        attachment_urls,
    })
}

/// Single-field rendering of an attachment list, readable back with
/// [`parse_attachment_summary`].
pub fn summarize_attachments(urls: &[String]) -> String {
    format!("{IMAGES_MARKER}\n{}", urls.join("\n"))
}

pub fn parse_attachment_summary(text: &str) -> Option<Vec<String>> {
    let rest = text.strip_prefix(IMAGES_MARKER)?;
    let urls = rest
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if urls.is_empty() {
        None
    } else {
        Some(urls)
    }
}

// Page and user ids arrive as strings, but numeric ids show up in test payloads.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
