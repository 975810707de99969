use std::{collections::HashMap, sync::Arc};

use murmur_core::UserId;
use tokio::sync::RwLock;

use super::core::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionStoreError {
    NotFound,
    Rejected,
}

/// In-memory refresh sessions plus the hashes of already-rotated tokens,
/// which are kept around so a replayed token can revoke its session.
#[derive(Clone, Default)]
pub(crate) struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    used_refresh_tokens: Arc<RwLock<HashMap<[u8; 32], (String, i64)>>>,
}

impl SessionStore {
    pub(crate) async fn insert(&self, session_id: String, record: SessionRecord) {
        self.sessions.write().await.insert(session_id, record);
    }

    pub(crate) async fn revoke_if_replayed_token(&self, token_hash: [u8; 32]) -> Option<String> {
        let session_id = self
            .used_refresh_tokens
            .read()
            .await
            .get(&token_hash)
            .map(|(session_id, _)| session_id.clone())?;
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.revoked = true;
        }
        Some(session_id)
    }

    pub(crate) async fn validate_refresh_token(
        &self,
        session_id: &str,
        token_hash: [u8; 32],
        now_unix: i64,
    ) -> Result<UserId, SessionStoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(session_id).ok_or(SessionStoreError::NotFound)?;
        if session.revoked
            || session.expires_at_unix < now_unix
            || session.refresh_token_hash != token_hash
        {
            return Err(SessionStoreError::Rejected);
        }
        Ok(session.user_id)
    }

    pub(crate) async fn rotate_refresh_hash(
        &self,
        session_id: &str,
        presented_hash: [u8; 32],
        next_hash: [u8; 32],
        now_unix: i64,
        next_expires_at_unix: i64,
    ) -> Result<(), SessionStoreError> {
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or(SessionStoreError::NotFound)?;
            if session.revoked || session.refresh_token_hash != presented_hash {
                return Err(SessionStoreError::Rejected);
            }
            session.refresh_token_hash = next_hash;
            session.expires_at_unix = next_expires_at_unix;
        }
        self.used_refresh_tokens
            .write()
            .await
            .insert(presented_hash, (session_id.to_owned(), now_unix));
        Ok(())
    }

    pub(crate) async fn revoke_with_token(
        &self,
        session_id: &str,
        token_hash: [u8; 32],
    ) -> Result<UserId, SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or(SessionStoreError::NotFound)?;
        if session.refresh_token_hash != token_hash {
            return Err(SessionStoreError::Rejected);
        }
        session.revoked = true;
        Ok(session.user_id)
    }

    /// Revokes every session of `user_id` other than `keep_session_id`.
    pub(crate) async fn revoke_all_for_user_except(
        &self,
        user_id: UserId,
        keep_session_id: &str,
    ) -> usize {
        let mut revoked = 0;
        for (session_id, session) in self.sessions.write().await.iter_mut() {
            if session.user_id == user_id && session_id != keep_session_id && !session.revoked {
                session.revoked = true;
                revoked += 1;
            }
        }
        revoked
    }

    pub(crate) async fn prune_expired(&self, now_unix: i64, replay_retention_secs: i64) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at_unix >= now_unix);
        let pruned = before - sessions.len();

        let replay_cutoff = now_unix.saturating_sub(replay_retention_secs);
        self.used_refresh_tokens
            .write()
            .await
            .retain(|_, (session_id, used_at_unix)| {
                *used_at_unix >= replay_cutoff && sessions.contains_key(session_id)
            });
        pruned
    }
}
