use std::collections::HashMap;

use sqlx::{PgPool, Row};

use murmur_core::UserId;

use crate::server::{
    core::{AppState, MessageRecord},
    errors::AuthFailure,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageView {
    pub(crate) message_id: String,
    pub(crate) sender_id: UserId,
    pub(crate) recipient_id: UserId,
    pub(crate) body: String,
    pub(crate) sent_at_unix: i64,
    pub(crate) read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InboxEntry {
    pub(crate) peer_id: UserId,
    pub(crate) peer_username: String,
    pub(crate) last_sent_at_unix: i64,
    pub(crate) last_message_id: String,
    pub(crate) unread_count: i64,
}

pub(crate) trait MessagePersistence {
    async fn insert_message(
        &self,
        message_id: &str,
        sender_id: UserId,
        recipient_id: UserId,
        body: &str,
        sent_at_unix: i64,
    ) -> Result<(), AuthFailure>;

    /// Non-deleted messages exchanged by the two users, newest first, strictly
    /// older than `before` when given. Returns at most `limit` rows.
    async fn thread(
        &self,
        user_a: UserId,
        user_b: UserId,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageView>, AuthFailure>;

    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64, AuthFailure>;

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageView>, AuthFailure>;

    async fn soft_delete(&self, message_id: &str) -> Result<bool, AuthFailure>;

    async fn inbox(&self, user_id: UserId) -> Result<Vec<InboxEntry>, AuthFailure>;
}

pub(crate) struct PostgresMessageRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PostgresMessageRepository<'a> {
    pub(crate) fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> Result<MessageView, AuthFailure> {
    let sender_id: String = row.try_get("sender_id").map_err(|_| AuthFailure::Internal)?;
    let recipient_id: String = row
        .try_get("recipient_id")
        .map_err(|_| AuthFailure::Internal)?;
    Ok(MessageView {
        message_id: row
            .try_get("message_id")
            .map_err(|_| AuthFailure::Internal)?,
        sender_id: UserId::try_from(sender_id).map_err(|_| AuthFailure::Internal)?,
        recipient_id: UserId::try_from(recipient_id).map_err(|_| AuthFailure::Internal)?,
        body: row.try_get("body").map_err(|_| AuthFailure::Internal)?,
        sent_at_unix: row
            .try_get("sent_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
        read: row.try_get("is_read").map_err(|_| AuthFailure::Internal)?,
    })
}

impl MessagePersistence for PostgresMessageRepository<'_> {
    async fn insert_message(
        &self,
        message_id: &str,
        sender_id: UserId,
        recipient_id: UserId,
        body: &str,
        sent_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        sqlx::query(
            "INSERT INTO messages (message_id, sender_id, recipient_id, body, sent_at_unix, is_read, is_deleted)
             VALUES ($1, $2, $3, $4, $5, FALSE, FALSE)",
        )
        .bind(message_id)
        .bind(sender_id.to_string())
        .bind(recipient_id.to_string())
        .bind(body)
        .bind(sent_at_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn thread(
        &self,
        user_a: UserId,
        user_b: UserId,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageView>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT message_id, sender_id, recipient_id, body, sent_at_unix, is_read
             FROM messages
             WHERE ((sender_id = $1 AND recipient_id = $2)
                 OR (sender_id = $2 AND recipient_id = $1))
               AND is_deleted = FALSE
               AND ($3::TEXT IS NULL OR message_id < $3)
             ORDER BY message_id DESC
             LIMIT $4",
        )
        .bind(user_a.to_string())
        .bind(user_b.to_string())
        .bind(before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64, AuthFailure> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = TRUE
             WHERE recipient_id = $1 AND sender_id = $2 AND is_read = FALSE AND is_deleted = FALSE",
        )
        .bind(reader.to_string())
        .bind(sender.to_string())
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(result.rows_affected())
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageView>, AuthFailure> {
        let row = sqlx::query(
            "SELECT message_id, sender_id, recipient_id, body, sent_at_unix, is_read
             FROM messages
             WHERE message_id = $1 AND is_deleted = FALSE",
        )
        .bind(message_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn soft_delete(&self, message_id: &str) -> Result<bool, AuthFailure> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = TRUE WHERE message_id = $1 AND is_deleted = FALSE",
        )
        .bind(message_id)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(result.rows_affected() > 0)
    }

    async fn inbox(&self, user_id: UserId) -> Result<Vec<InboxEntry>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT m.peer_id, u.username AS peer_username,
                    MAX(m.sent_at_unix) AS last_sent_at_unix,
                    MAX(m.message_id) AS last_message_id,
                    COUNT(*) FILTER (WHERE m.recipient_id = $1 AND m.is_read = FALSE) AS unread_count
             FROM (
                 SELECT CASE WHEN sender_id = $1 THEN recipient_id ELSE sender_id END AS peer_id,
                        message_id, recipient_id, sent_at_unix, is_read
                 FROM messages
                 WHERE (sender_id = $1 OR recipient_id = $1) AND is_deleted = FALSE
             ) m
             JOIN users u ON u.user_id = m.peer_id
             GROUP BY m.peer_id, u.username
             ORDER BY last_message_id DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let peer_id: String = row.try_get("peer_id").map_err(|_| AuthFailure::Internal)?;
            entries.push(InboxEntry {
                peer_id: UserId::try_from(peer_id).map_err(|_| AuthFailure::Internal)?,
                peer_username: row
                    .try_get("peer_username")
                    .map_err(|_| AuthFailure::Internal)?,
                last_sent_at_unix: row
                    .try_get("last_sent_at_unix")
                    .map_err(|_| AuthFailure::Internal)?,
                last_message_id: row
                    .try_get("last_message_id")
                    .map_err(|_| AuthFailure::Internal)?,
                unread_count: row
                    .try_get("unread_count")
                    .map_err(|_| AuthFailure::Internal)?,
            });
        }
        Ok(entries)
    }
}

pub(crate) struct InMemoryMessageRepository<'a> {
    state: &'a AppState,
}

impl<'a> InMemoryMessageRepository<'a> {
    pub(crate) fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

fn message_view(message_id: &str, message: &MessageRecord) -> MessageView {
    MessageView {
        message_id: message_id.to_owned(),
        sender_id: message.sender_id,
        recipient_id: message.recipient_id,
        body: message.body.clone(),
        sent_at_unix: message.sent_at_unix,
        read: message.read,
    }
}

impl MessagePersistence for InMemoryMessageRepository<'_> {
    async fn insert_message(
        &self,
        message_id: &str,
        sender_id: UserId,
        recipient_id: UserId,
        body: &str,
        sent_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.state.store.write().await.messages.insert(
            message_id.to_owned(),
            MessageRecord {
                sender_id,
                recipient_id,
                body: body.to_owned(),
                sent_at_unix,
                read: false,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn thread(
        &self,
        user_a: UserId,
        user_b: UserId,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store
            .messages
            .iter()
            .rev()
            .filter(|(message_id, _)| before.is_none_or(|cursor| message_id.as_str() < cursor))
            .filter(|(_, message)| {
                !message.deleted
                    && ((message.sender_id == user_a && message.recipient_id == user_b)
                        || (message.sender_id == user_b && message.recipient_id == user_a))
            })
            .take(limit)
            .map(|(message_id, message)| message_view(message_id, message))
            .collect())
    }

    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64, AuthFailure> {
        let mut store = self.state.store.write().await;
        let mut marked = 0;
        for message in store.messages.values_mut() {
            if message.recipient_id == reader
                && message.sender_id == sender
                && !message.read
                && !message.deleted
            {
                message.read = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store
            .messages
            .get(message_id)
            .filter(|message| !message.deleted)
            .map(|message| message_view(message_id, message)))
    }

    async fn soft_delete(&self, message_id: &str) -> Result<bool, AuthFailure> {
        let mut store = self.state.store.write().await;
        match store.messages.get_mut(message_id) {
            Some(message) if !message.deleted => {
                message.deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn inbox(&self, user_id: UserId) -> Result<Vec<InboxEntry>, AuthFailure> {
        let store = self.state.store.read().await;
        let mut by_peer: HashMap<UserId, (i64, &str, i64)> = HashMap::new();
        for (message_id, message) in store.messages.iter().filter(|(_, message)| !message.deleted) {
            let peer = if message.sender_id == user_id {
                message.recipient_id
            } else if message.recipient_id == user_id {
                message.sender_id
            } else {
                continue;
            };
            let entry = by_peer.entry(peer).or_insert((i64::MIN, "", 0));
            entry.0 = entry.0.max(message.sent_at_unix);
            entry.1 = entry.1.max(message_id.as_str());
            if message.recipient_id == user_id && !message.read {
                entry.2 += 1;
            }
        }

        let mut entries: Vec<InboxEntry> = by_peer
            .into_iter()
            .filter_map(|(peer_id, (last_sent_at_unix, last_message_id, unread_count))| {
                Some(InboxEntry {
                    peer_id,
                    peer_username: store.username_of(peer_id)?.to_owned(),
                    last_sent_at_unix,
                    last_message_id: last_message_id.to_owned(),
                    unread_count,
                })
            })
            .collect();
        // Message ids are monotonic, so the newest id breaks same-second ties.
        entries.sort_by(|left, right| right.last_message_id.cmp(&left.last_message_id));
        Ok(entries)
    }
}

pub(crate) enum MessageRepository<'a> {
    Postgres(PostgresMessageRepository<'a>),
    InMemory(InMemoryMessageRepository<'a>),
}

impl MessageRepository<'_> {
    pub(crate) fn from_state(state: &AppState) -> MessageRepository<'_> {
        if let Some(pool) = &state.db_pool {
            MessageRepository::Postgres(PostgresMessageRepository::new(pool))
        } else {
            MessageRepository::InMemory(InMemoryMessageRepository::new(state))
        }
    }
}

impl MessagePersistence for MessageRepository<'_> {
    async fn insert_message(
        &self,
        message_id: &str,
        sender_id: UserId,
        recipient_id: UserId,
        body: &str,
        sent_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.insert_message(message_id, sender_id, recipient_id, body, sent_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.insert_message(message_id, sender_id, recipient_id, body, sent_at_unix)
                    .await
            }
        }
    }

    async fn thread(
        &self,
        user_a: UserId,
        user_b: UserId,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.thread(user_a, user_b, before, limit).await,
            Self::InMemory(repo) => repo.thread(user_a, user_b, before, limit).await,
        }
    }

    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.mark_read(reader, sender).await,
            Self::InMemory(repo) => repo.mark_read(reader, sender).await,
        }
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_message(message_id).await,
            Self::InMemory(repo) => repo.find_message(message_id).await,
        }
    }

    async fn soft_delete(&self, message_id: &str) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.soft_delete(message_id).await,
            Self::InMemory(repo) => repo.soft_delete(message_id).await,
        }
    }

    async fn inbox(&self, user_id: UserId) -> Result<Vec<InboxEntry>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.inbox(user_id).await,
            Self::InMemory(repo) => repo.inbox(user_id).await,
        }
    }
}
