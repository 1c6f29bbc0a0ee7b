//! Push delivery of new message records to connected dashboard viewers.
//!
//! Frames are `{"event": "new_message", "data": LiveMessage}`. There is no
//! backlog: a viewer only sees records created while it is connected.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::types::LiveMessage;

pub const NEW_MESSAGE_EVENT: &str = "new_message";

#[derive(Default)]
pub struct LiveHub {
    clients: Mutex<HashMap<usize, mpsc::UnboundedSender<String>>>,
    next_client_id: AtomicUsize,
}

fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> (usize, mpsc::UnboundedReceiver<String>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        self.clients.lock().await.insert(client_id, tx);
        (client_id, rx)
    }

    pub async fn unregister(&self, client_id: usize) {
        self.clients.lock().await.remove(&client_id);
    }

    pub async fn viewer_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Sends one frame to every connected viewer; returns how many took it.
    pub async fn broadcast(&self, message: &LiveMessage) -> usize {
        let Some(payload) = event_payload(NEW_MESSAGE_EVENT, message) else {
            return 0;
        };

        let mut clients = self.clients.lock().await;
        let mut delivered = 0usize;
        clients.retain(|_, sender| {
            let ok = sender.send(payload.clone()).is_ok();
            if ok {
                delivered += 1;
            }
            ok
        });
        debug!(
            conversation_id = %message.conversation_id,
            delivered,
            "broadcast live message"
        );
        delivered
    }

    /// Pumps frames to one socket until either side goes away.
    pub async fn serve_viewer(&self, socket: WebSocket) {
        let (client_id, mut rx) = self.register().await;
        let (mut ws_sender, mut ws_receiver) = socket.split();

        let send_task = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        // Viewers only listen; inbound frames other than close are ignored.
        while let Some(Ok(message)) = ws_receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }

        self.unregister(client_id).await;
        send_task.abort();
        debug!(client_id, "live viewer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::types::{Platform, Sender};

    fn live(text: &str) -> LiveMessage {
        LiveMessage {
            conversation_id: "P1_S1".into(),
            customer_name: "S1".into(),
            sender: Sender::Customer,
            message: text.into(),
            platform: Platform::Facebook,
            page_id: "P1".into(),
            timestamp: "2025-01-01T00:00:00.000Z".into(),
        }
    }

    #[tokio::test]
    async fn every_viewer_gets_one_frame() {
        let hub = LiveHub::new();
        let (_, mut a) = hub.register().await;
        let (_, mut b) = hub.register().await;

        assert_eq!(hub.broadcast(&live("hi")).await, 2);

        for rx in [&mut a, &mut b] {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["event"], "new_message");
            assert_eq!(frame["data"]["message"], "hi");
            assert_eq!(frame["data"]["conversationId"], "P1_S1");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn late_viewer_gets_no_backlog() {
        let hub = LiveHub::new();
        assert_eq!(hub.broadcast(&live("early")).await, 0);

        let (_, mut rx) = hub.register().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_viewers_are_pruned() {
        let hub = LiveHub::new();
        let (_, rx) = hub.register().await;
        let (id, _keep) = hub.register().await;
        drop(rx);

        assert_eq!(hub.broadcast(&live("x")).await, 1);
        assert_eq!(hub.viewer_count().await, 1);

        hub.unregister(id).await;
        assert_eq!(hub.viewer_count().await, 0);
    }
}
