//! Durable message history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tokio::sync::RwLock;

use crate::{
    error::StoreError,
    types::{ConversationId, ConversationSummary, MessageRecord, Platform, Sender},
};

pub const CONVERSATION_LIST_LIMIT: usize = 200;
pub const HISTORY_LIMIT: usize = 500;

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Latest message of each conversation, most recent conversation first.
    async fn recent_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Oldest first.
    async fn history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn latest(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<MessageRecord>, StoreError>;
}

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_record_row(row: &PgRow) -> Result<MessageRecord, StoreError> {
    let conversation_id: String = row.try_get("conversation_id")?;
    let sender: String = row.try_get("sender")?;
    let platform: String = row.try_get("platform")?;
    Ok(MessageRecord {
        conversation_id: ConversationId::parse(&conversation_id)
            .ok_or_else(|| StoreError::Corrupt(format!("conversation id '{conversation_id}'")))?,
        customer_name: row.try_get("customer_name")?,
        sender: Sender::parse(&sender)
            .ok_or_else(|| StoreError::Corrupt(format!("sender '{sender}'")))?,
        message: row.try_get("message")?,
        platform: Platform::parse(&platform)
            .ok_or_else(|| StoreError::Corrupt(format!("platform '{platform}'")))?,
        page_id: row.try_get("page_id")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
    })
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO social_chat_messages
                (conversation_id, customer_name, sender, message, platform, page_id, "timestamp")
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(record.conversation_id.as_str())
        .bind(&record.customer_name)
        .bind(record.sender.as_str())
        .bind(&record.message)
        .bind(record.platform.as_str())
        .bind(&record.page_id)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (conversation_id)
                    conversation_id, customer_name, sender, message, platform, page_id, "timestamp"
                FROM social_chat_messages
                ORDER BY conversation_id, "timestamp" DESC, id DESC
            ) latest
            ORDER BY "timestamp" DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_record_row(row).map(|record| ConversationSummary::from(&record)))
            .collect()
    }

    async fn history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, customer_name, sender, message, platform, page_id, "timestamp"
            FROM social_chat_messages
            WHERE conversation_id = $1
            ORDER BY "timestamp" ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(conversation.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_record_row).collect()
    }

    async fn latest(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, customer_name, sender, message, platform, page_id, "timestamp"
            FROM social_chat_messages
            WHERE conversation_id = $1
            ORDER BY "timestamp" DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_record_row).transpose()
    }
}

/// Process-local store for `STORAGE=memory` runs and tests.
#[derive(Default)]
pub struct MemoryMessageStore {
    records: RwLock<Vec<MessageRecord>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<MessageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn recent_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let records = self.records.read().await;
        let mut latest: Vec<&MessageRecord> = Vec::new();
        // Later appends win ties so insertion order breaks equal timestamps.
        for record in records.iter() {
            match latest
                .iter()
                .position(|r| r.conversation_id == record.conversation_id)
            {
                Some(i) if latest[i].timestamp <= record.timestamp => latest[i] = record,
                Some(_) => {}
                None => latest.push(record),
            }
        }
        latest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(latest
            .into_iter()
            .take(limit)
            .map(ConversationSummary::from)
            .collect())
    }

    async fn history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let records = self.records.read().await;
        let mut history = records
            .iter()
            .filter(|r| &r.conversation_id == conversation)
            .cloned()
            .collect::<Vec<_>>();
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        history.truncate(limit);
        Ok(history)
    }

    async fn latest(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| &r.conversation_id == conversation)
            .fold(None, |best: Option<&MessageRecord>, r| match best {
                Some(b) if b.timestamp > r.timestamp => Some(b),
                _ => Some(r),
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn record(page: &str, sender_id: &str, from: Sender, text: &str, secs: i64) -> MessageRecord {
        MessageRecord {
            conversation_id: ConversationId::new(page, sender_id),
            customer_name: sender_id.into(),
            sender: from,
            message: text.into(),
            platform: Platform::Facebook,
            page_id: page.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn history_is_ascending_and_capped() {
        let store = MemoryMessageStore::new();
        store.append(&record("P1", "S1", Sender::Bot, "second", 2)).await.unwrap();
        store.append(&record("P1", "S1", Sender::Customer, "first", 1)).await.unwrap();
        store.append(&record("P1", "S2", Sender::Customer, "other", 0)).await.unwrap();
        store.append(&record("P1", "S1", Sender::Customer, "third", 3)).await.unwrap();

        let conv = ConversationId::new("P1", "S1");
        let history = store.history(&conv, 500).await.unwrap();
        let texts = history.iter().map(|r| r.message.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["first", "second", "third"]);

        assert_eq!(store.history(&conv, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recent_conversations_lists_latest_message_newest_first() {
        let store = MemoryMessageStore::new();
        store.append(&record("P1", "S1", Sender::Customer, "hi", 1)).await.unwrap();
        store.append(&record("P1", "S2", Sender::Customer, "yo", 2)).await.unwrap();
        store.append(&record("P1", "S1", Sender::Bot, "hello", 3)).await.unwrap();

        let list = store.recent_conversations(200).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_id, "P1_S1");
        assert_eq!(list[0].last_message, "hello");
        assert_eq!(list[1].conversation_id, "P1_S2");

        assert_eq!(store.recent_conversations(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_returns_newest_record() {
        let store = MemoryMessageStore::new();
        let conv = ConversationId::new("P1", "S1");
        assert!(store.latest(&conv).await.unwrap().is_none());

        store.append(&record("P1", "S1", Sender::Customer, "b", 5)).await.unwrap();
        store.append(&record("P1", "S1", Sender::Bot, "a", 4)).await.unwrap();
        assert_eq!(store.latest(&conv).await.unwrap().unwrap().message, "b");
    }
}
