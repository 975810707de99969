use std::{collections::HashMap, sync::atomic::Ordering};

use sqlx::{PgPool, Row};

use murmur_core::{UserId, Username};

use crate::server::{
    auth::{hash_refresh_token, verify_password},
    core::{
        AppState, SessionRecord, UserRecord, AUTH_SESSION_SWEEP_INTERVAL_SECS, LOGIN_LOCK_SECS,
        LOGIN_LOCK_THRESHOLD, REFRESH_REPLAY_RETENTION_SECS, REFRESH_TOKEN_TTL_SECS,
    },
    errors::AuthFailure,
};

pub(crate) struct RefreshCheck {
    pub(crate) session_id: String,
    pub(crate) user_id: UserId,
    pub(crate) presented_hash: [u8; 32],
}

pub(crate) enum RefreshCheckError {
    ReplayDetected { session_id: String },
    Unauthorized { session_id: String },
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AccountRecord {
    pub(crate) user_id: UserId,
    pub(crate) username: String,
    pub(crate) is_public: bool,
    pub(crate) joined_at_unix: i64,
}

impl From<&UserRecord> for AccountRecord {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.id,
            username: user.username.as_str().to_owned(),
            is_public: user.is_public,
            joined_at_unix: user.joined_at_unix,
        }
    }
}

pub(crate) trait AuthPersistence {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        password_hash: &str,
        is_public: bool,
        joined_at_unix: i64,
    ) -> Result<bool, AuthFailure>;

    async fn verify_credentials(
        &self,
        username: &Username,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure>;

    async fn insert_session(
        &self,
        session_id: &str,
        user_id: UserId,
        refresh_hash: [u8; 32],
        expires_at_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn check_refresh_token(
        &self,
        refresh_token: &str,
        now_unix: i64,
    ) -> Result<RefreshCheck, RefreshCheckError>;

    async fn rotate_refresh_token(
        &self,
        session_id: &str,
        presented_hash: [u8; 32],
        next_hash: [u8; 32],
        now_unix: i64,
        next_expires_at_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn revoke_session_with_token(
        &self,
        session_id: &str,
        token_hash: [u8; 32],
    ) -> Result<UserId, AuthFailure>;

    async fn revoke_other_sessions(
        &self,
        user_id: UserId,
        keep_session_id: &str,
    ) -> Result<usize, AuthFailure>;

    async fn find_account(&self, user_id: UserId) -> Result<Option<AccountRecord>, AuthFailure>;

    async fn lookup_usernames(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, AuthFailure>;

    /// Applies the given changes and returns the updated account.
    /// A username already taken by someone else is an invalid request.
    async fn update_profile(
        &self,
        user_id: UserId,
        is_public: Option<bool>,
        username: Option<&Username>,
    ) -> Result<AccountRecord, AuthFailure>;

    async fn password_hash(&self, user_id: UserId) -> Result<Option<String>, AuthFailure>;

    async fn set_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure>;

    async fn search_usernames(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<AccountRecord>, AuthFailure>;
}

pub(crate) struct PostgresAuthRepository<'a> {
    state: &'a AppState,
    pool: &'a PgPool,
}

impl<'a> PostgresAuthRepository<'a> {
    pub(crate) fn new(state: &'a AppState, pool: &'a PgPool) -> Self {
        Self { state, pool }
    }

    async fn prune_expired_auth_state(&self, now_unix: i64) -> Result<(), AuthFailure> {
        sqlx::query("DELETE FROM sessions WHERE expires_at_unix < $1")
            .bind(now_unix)
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;

        let replay_cutoff = now_unix.saturating_sub(REFRESH_REPLAY_RETENTION_SECS);
        sqlx::query(
            "DELETE FROM used_refresh_tokens urt
             WHERE urt.used_at_unix < $1
                OR NOT EXISTS (
                    SELECT 1 FROM sessions s WHERE s.session_id = urt.session_id
                )",
        )
        .bind(replay_cutoff)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        Ok(())
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<AccountRecord, AuthFailure> {
    let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
    Ok(AccountRecord {
        user_id: UserId::try_from(user_id).map_err(|_| AuthFailure::Internal)?,
        username: row.try_get("username").map_err(|_| AuthFailure::Internal)?,
        is_public: row.try_get("is_public").map_err(|_| AuthFailure::Internal)?,
        joined_at_unix: row
            .try_get("joined_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn maybe_sweep_auth_state(repo_state: &AppState, now_unix: i64) -> Result<(), AuthFailure> {
    let last = repo_state
        .auth_session_last_sweep_unix
        .load(Ordering::Relaxed);
    if now_unix.saturating_sub(last) < AUTH_SESSION_SWEEP_INTERVAL_SECS {
        return Ok(());
    }
    if repo_state
        .auth_session_last_sweep_unix
        .compare_exchange(last, now_unix, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return Ok(());
    }

    if let Some(pool) = &repo_state.db_pool {
        PostgresAuthRepository::new(repo_state, pool)
            .prune_expired_auth_state(now_unix)
            .await?;
        return Ok(());
    }

    let pruned = repo_state
        .session_store
        .prune_expired(now_unix, REFRESH_REPLAY_RETENTION_SECS)
        .await;
    if pruned > 0 {
        tracing::debug!(event = "auth.session_sweep", pruned);
    }
    Ok(())
}

impl AuthPersistence for PostgresAuthRepository<'_> {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        password_hash: &str,
        is_public: bool,
        joined_at_unix: i64,
    ) -> Result<bool, AuthFailure> {
        let user_id = UserId::from_ulid(self.state.next_id());
        let insert_result = sqlx::query(
            "INSERT INTO users (user_id, username, password_hash, is_public, joined_at_unix, failed_logins, locked_until_unix)
             VALUES ($1, $2, $3, $4, $5, 0, NULL)
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(user_id.to_string())
        .bind(username.as_str())
        .bind(password_hash)
        .bind(is_public)
        .bind(joined_at_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(insert_result.rows_affected() > 0)
    }

    async fn verify_credentials(
        &self,
        username: &Username,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        maybe_sweep_auth_state(self.state, now_unix).await?;

        let row = sqlx::query(
            "SELECT user_id, password_hash, failed_logins, locked_until_unix
             FROM users WHERE username = $1",
        )
        .bind(username.as_str())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        let Some(row) = row else {
            let _ = verify_password(dummy_password_hash, password);
            return Ok(None);
        };

        let user_id_text: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
        let user_id = UserId::try_from(user_id_text).map_err(|_| AuthFailure::Internal)?;
        let stored_password_hash: String = row
            .try_get("password_hash")
            .map_err(|_| AuthFailure::Internal)?;
        let failed_logins: i16 = row
            .try_get("failed_logins")
            .map_err(|_| AuthFailure::Internal)?;
        let locked_until_unix: Option<i64> = row
            .try_get("locked_until_unix")
            .map_err(|_| AuthFailure::Internal)?;

        if locked_until_unix.is_some_and(|lock_until| lock_until > now_unix) {
            return Ok(None);
        }

        if verify_password(&stored_password_hash, password) {
            sqlx::query(
                "UPDATE users SET failed_logins = 0, locked_until_unix = NULL WHERE user_id = $1",
            )
            .bind(user_id.to_string())
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
            return Ok(Some(user_id));
        }

        let mut updated_failed = i32::from(failed_logins) + 1;
        let mut lock_until = None;
        if updated_failed >= i32::from(LOGIN_LOCK_THRESHOLD) {
            updated_failed = 0;
            lock_until = Some(now_unix + LOGIN_LOCK_SECS);
        }
        sqlx::query(
            "UPDATE users SET failed_logins = $2, locked_until_unix = $3 WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .bind(i16::try_from(updated_failed).unwrap_or(i16::MAX))
        .bind(lock_until)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(None)
    }

    async fn insert_session(
        &self,
        session_id: &str,
        user_id: UserId,
        refresh_hash: [u8; 32],
        expires_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, refresh_token_hash, expires_at_unix, revoked)
             VALUES ($1, $2, $3, $4, FALSE)",
        )
        .bind(session_id)
        .bind(user_id.to_string())
        .bind(refresh_hash.as_slice())
        .bind(expires_at_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn check_refresh_token(
        &self,
        refresh_token: &str,
        now_unix: i64,
    ) -> Result<RefreshCheck, RefreshCheckError> {
        maybe_sweep_auth_state(self.state, now_unix)
            .await
            .map_err(|_| RefreshCheckError::Internal)?;

        let presented_hash = hash_refresh_token(refresh_token);
        if let Some(row) =
            sqlx::query("SELECT session_id FROM used_refresh_tokens WHERE token_hash = $1")
                .bind(presented_hash.as_slice())
                .fetch_optional(self.pool)
                .await
                .map_err(|_| RefreshCheckError::Internal)?
        {
            let replay_session_id: String = row
                .try_get("session_id")
                .map_err(|_| RefreshCheckError::Internal)?;
            sqlx::query("UPDATE sessions SET revoked = TRUE WHERE session_id = $1")
                .bind(&replay_session_id)
                .execute(self.pool)
                .await
                .map_err(|_| RefreshCheckError::Internal)?;
            return Err(RefreshCheckError::ReplayDetected {
                session_id: replay_session_id,
            });
        }

        let session_id = session_id_of(refresh_token)?;
        let row = sqlx::query(
            "SELECT user_id, refresh_token_hash, expires_at_unix, revoked
             FROM sessions WHERE session_id = $1",
        )
        .bind(&session_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|_| RefreshCheckError::Internal)?;
        let Some(row) = row else {
            return Err(RefreshCheckError::Unauthorized { session_id });
        };

        let session_user_id: String = row
            .try_get("user_id")
            .map_err(|_| RefreshCheckError::Internal)?;
        let stored_hash: Vec<u8> = row
            .try_get("refresh_token_hash")
            .map_err(|_| RefreshCheckError::Internal)?;
        let expires_at_unix: i64 = row
            .try_get("expires_at_unix")
            .map_err(|_| RefreshCheckError::Internal)?;
        let revoked: bool = row
            .try_get("revoked")
            .map_err(|_| RefreshCheckError::Internal)?;

        if revoked || expires_at_unix < now_unix || stored_hash.as_slice() != presented_hash {
            return Err(RefreshCheckError::Unauthorized { session_id });
        }

        let user_id = UserId::try_from(session_user_id).map_err(|_| RefreshCheckError::Internal)?;
        Ok(RefreshCheck {
            session_id,
            user_id,
            presented_hash,
        })
    }

    async fn rotate_refresh_token(
        &self,
        session_id: &str,
        presented_hash: [u8; 32],
        next_hash: [u8; 32],
        now_unix: i64,
        next_expires_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        maybe_sweep_auth_state(self.state, now_unix).await?;

        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let rotated = sqlx::query(
            "UPDATE sessions SET refresh_token_hash = $2, expires_at_unix = $3
             WHERE session_id = $1 AND refresh_token_hash = $4 AND revoked = FALSE",
        )
        .bind(session_id)
        .bind(next_hash.as_slice())
        .bind(next_expires_at_unix)
        .bind(presented_hash.as_slice())
        .execute(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        if rotated.rows_affected() == 0 {
            return Err(AuthFailure::Unauthorized);
        }

        sqlx::query(
            "INSERT INTO used_refresh_tokens (token_hash, session_id, used_at_unix) VALUES ($1, $2, $3)
             ON CONFLICT (token_hash) DO NOTHING",
        )
        .bind(presented_hash.as_slice())
        .bind(session_id)
        .bind(now_unix)
        .execute(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn revoke_session_with_token(
        &self,
        session_id: &str,
        token_hash: [u8; 32],
    ) -> Result<UserId, AuthFailure> {
        let row =
            sqlx::query("SELECT user_id, refresh_token_hash FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(self.pool)
                .await
                .map_err(|_| AuthFailure::Internal)?;
        let row = row.ok_or(AuthFailure::Unauthorized)?;
        let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
        let session_hash: Vec<u8> = row
            .try_get("refresh_token_hash")
            .map_err(|_| AuthFailure::Internal)?;
        if session_hash.as_slice() != token_hash {
            return Err(AuthFailure::Unauthorized);
        }
        sqlx::query("UPDATE sessions SET revoked = TRUE WHERE session_id = $1")
            .bind(session_id)
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        UserId::try_from(user_id).map_err(|_| AuthFailure::Internal)
    }

    async fn revoke_other_sessions(
        &self,
        user_id: UserId,
        keep_session_id: &str,
    ) -> Result<usize, AuthFailure> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked = TRUE
             WHERE user_id = $1 AND session_id <> $2 AND revoked = FALSE",
        )
        .bind(user_id.to_string())
        .bind(keep_session_id)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn find_account(&self, user_id: UserId) -> Result<Option<AccountRecord>, AuthFailure> {
        let row = sqlx::query(
            "SELECT user_id, username, is_public, joined_at_unix FROM users WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn lookup_usernames(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, AuthFailure> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<String> = user_ids.iter().map(ToString::to_string).collect();
        let rows = sqlx::query("SELECT user_id, username FROM users WHERE user_id = ANY($1)")
            .bind(&ids)
            .fetch_all(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;

        let mut usernames = HashMap::with_capacity(rows.len());
        for row in rows {
            let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
            let username: String = row.try_get("username").map_err(|_| AuthFailure::Internal)?;
            usernames.insert(
                UserId::try_from(user_id).map_err(|_| AuthFailure::Internal)?,
                username,
            );
        }
        Ok(usernames)
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        is_public: Option<bool>,
        username: Option<&Username>,
    ) -> Result<AccountRecord, AuthFailure> {
        let row = sqlx::query(
            "UPDATE users
             SET is_public = COALESCE($2, is_public),
                 username = COALESCE($3, username)
             WHERE user_id = $1
             RETURNING user_id, username, is_public, joined_at_unix",
        )
        .bind(user_id.to_string())
        .bind(is_public)
        .bind(username.map(Username::as_str))
        .fetch_optional(self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                AuthFailure::InvalidRequest
            } else {
                AuthFailure::Internal
            }
        })?;
        let row = row.ok_or(AuthFailure::NotFound)?;
        account_from_row(&row)
    }

    async fn password_hash(&self, user_id: UserId) -> Result<Option<String>, AuthFailure> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE user_id = $1")
            .bind(user_id.to_string())
            .fetch_optional(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        row.map(|row| row.try_get("password_hash"))
            .transpose()
            .map_err(|_| AuthFailure::Internal)
    }

    async fn set_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE user_id = $1")
            .bind(user_id.to_string())
            .bind(password_hash)
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn search_usernames(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<AccountRecord>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT user_id, username, is_public, joined_at_unix
             FROM users
             WHERE strpos(LOWER(username), LOWER($1)) > 0
             ORDER BY username ASC
             LIMIT $2",
        )
        .bind(needle)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter().map(account_from_row).collect()
    }
}

fn session_id_of(refresh_token: &str) -> Result<String, RefreshCheckError> {
    refresh_token
        .split('.')
        .next()
        .filter(|session_id| !session_id.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| RefreshCheckError::Unauthorized {
            session_id: String::from("unknown"),
        })
}

pub(crate) struct InMemoryAuthRepository<'a> {
    state: &'a AppState,
}

impl<'a> InMemoryAuthRepository<'a> {
    pub(crate) fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

impl AuthPersistence for InMemoryAuthRepository<'_> {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        password_hash: &str,
        is_public: bool,
        joined_at_unix: i64,
    ) -> Result<bool, AuthFailure> {
        let mut store = self.state.store.write().await;
        if store.user_ids_by_username.contains_key(username.as_str()) {
            return Ok(false);
        }

        let user_id = UserId::from_ulid(self.state.next_id());
        store.users.insert(
            user_id,
            UserRecord {
                id: user_id,
                username: username.clone(),
                password_hash: password_hash.to_owned(),
                is_public,
                joined_at_unix,
                failed_logins: 0,
                locked_until_unix: None,
            },
        );
        store
            .user_ids_by_username
            .insert(username.as_str().to_owned(), user_id);
        Ok(true)
    }

    async fn verify_credentials(
        &self,
        username: &Username,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        maybe_sweep_auth_state(self.state, now_unix).await?;

        let mut store = self.state.store.write().await;
        let user_id = store.user_ids_by_username.get(username.as_str()).copied();
        let Some(user) = user_id.and_then(|user_id| store.users.get_mut(&user_id)) else {
            drop(store);
            let _ = verify_password(dummy_password_hash, password);
            return Ok(None);
        };

        if user
            .locked_until_unix
            .is_some_and(|lock_until| lock_until > now_unix)
        {
            return Ok(None);
        }

        if verify_password(&user.password_hash, password) {
            user.failed_logins = 0;
            user.locked_until_unix = None;
            return Ok(Some(user.id));
        }

        user.failed_logins = user.failed_logins.saturating_add(1);
        if user.failed_logins >= LOGIN_LOCK_THRESHOLD {
            user.locked_until_unix = Some(now_unix + LOGIN_LOCK_SECS);
            user.failed_logins = 0;
        }
        Ok(None)
    }

    async fn insert_session(
        &self,
        session_id: &str,
        user_id: UserId,
        refresh_hash: [u8; 32],
        expires_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.state
            .session_store
            .insert(
                session_id.to_owned(),
                SessionRecord {
                    user_id,
                    refresh_token_hash: refresh_hash,
                    expires_at_unix,
                    revoked: false,
                },
            )
            .await;
        Ok(())
    }

    async fn check_refresh_token(
        &self,
        refresh_token: &str,
        now_unix: i64,
    ) -> Result<RefreshCheck, RefreshCheckError> {
        maybe_sweep_auth_state(self.state, now_unix)
            .await
            .map_err(|_| RefreshCheckError::Internal)?;

        let presented_hash = hash_refresh_token(refresh_token);
        if let Some(session_id) = self
            .state
            .session_store
            .revoke_if_replayed_token(presented_hash)
            .await
        {
            return Err(RefreshCheckError::ReplayDetected { session_id });
        }

        let session_id = session_id_of(refresh_token)?;
        let user_id = self
            .state
            .session_store
            .validate_refresh_token(&session_id, presented_hash, now_unix)
            .await
            .map_err(|_| RefreshCheckError::Unauthorized {
                session_id: session_id.clone(),
            })?;
        Ok(RefreshCheck {
            session_id,
            user_id,
            presented_hash,
        })
    }

    async fn rotate_refresh_token(
        &self,
        session_id: &str,
        presented_hash: [u8; 32],
        next_hash: [u8; 32],
        now_unix: i64,
        next_expires_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        maybe_sweep_auth_state(self.state, now_unix).await?;

        self.state
            .session_store
            .rotate_refresh_hash(
                session_id,
                presented_hash,
                next_hash,
                now_unix,
                next_expires_at_unix,
            )
            .await
            .map_err(|_| AuthFailure::Unauthorized)
    }

    async fn revoke_session_with_token(
        &self,
        session_id: &str,
        token_hash: [u8; 32],
    ) -> Result<UserId, AuthFailure> {
        self.state
            .session_store
            .revoke_with_token(session_id, token_hash)
            .await
            .map_err(|_| AuthFailure::Unauthorized)
    }

    async fn revoke_other_sessions(
        &self,
        user_id: UserId,
        keep_session_id: &str,
    ) -> Result<usize, AuthFailure> {
        Ok(self
            .state
            .session_store
            .revoke_all_for_user_except(user_id, keep_session_id)
            .await)
    }

    async fn find_account(&self, user_id: UserId) -> Result<Option<AccountRecord>, AuthFailure> {
        Ok(self
            .state
            .store
            .read()
            .await
            .users
            .get(&user_id)
            .map(AccountRecord::from))
    }

    async fn lookup_usernames(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                store
                    .username_of(*user_id)
                    .map(|username| (*user_id, username.to_owned()))
            })
            .collect())
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        is_public: Option<bool>,
        username: Option<&Username>,
    ) -> Result<AccountRecord, AuthFailure> {
        let mut store = self.state.store.write().await;
        if let Some(username) = username {
            if store
                .user_ids_by_username
                .get(username.as_str())
                .is_some_and(|owner| *owner != user_id)
            {
                return Err(AuthFailure::InvalidRequest);
            }
        }

        let user = store.users.get_mut(&user_id).ok_or(AuthFailure::NotFound)?;
        if let Some(is_public) = is_public {
            user.is_public = is_public;
        }
        let mut renamed_from = None;
        if let Some(username) = username {
            if user.username != *username {
                renamed_from = Some(std::mem::replace(&mut user.username, username.clone()));
            }
        }
        let account = AccountRecord::from(&*user);

        if let Some(previous) = renamed_from {
            store.user_ids_by_username.remove(previous.as_str());
            store
                .user_ids_by_username
                .insert(account.username.clone(), user_id);
        }
        Ok(account)
    }

    async fn password_hash(&self, user_id: UserId) -> Result<Option<String>, AuthFailure> {
        Ok(self
            .state
            .store
            .read()
            .await
            .users
            .get(&user_id)
            .map(|user| user.password_hash.clone()))
    }

    async fn set_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure> {
        let mut store = self.state.store.write().await;
        let user = store.users.get_mut(&user_id).ok_or(AuthFailure::NotFound)?;
        password_hash.clone_into(&mut user.password_hash);
        Ok(())
    }

    async fn search_usernames(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<AccountRecord>, AuthFailure> {
        let needle = needle.to_lowercase();
        let store = self.state.store.read().await;
        let mut matches: Vec<AccountRecord> = store
            .users
            .values()
            .filter(|user| user.username.as_str().to_lowercase().contains(&needle))
            .map(AccountRecord::from)
            .collect();
        matches.sort_by(|left, right| left.username.cmp(&right.username));
        matches.truncate(limit);
        Ok(matches)
    }
}

pub(crate) enum AuthRepository<'a> {
    Postgres(PostgresAuthRepository<'a>),
    InMemory(InMemoryAuthRepository<'a>),
}

impl AuthRepository<'_> {
    pub(crate) fn from_state(state: &AppState) -> AuthRepository<'_> {
        if let Some(pool) = &state.db_pool {
            AuthRepository::Postgres(PostgresAuthRepository::new(state, pool))
        } else {
            AuthRepository::InMemory(InMemoryAuthRepository::new(state))
        }
    }
}

impl AuthPersistence for AuthRepository<'_> {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        password_hash: &str,
        is_public: bool,
        joined_at_unix: i64,
    ) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.create_user_if_missing(username, password_hash, is_public, joined_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.create_user_if_missing(username, password_hash, is_public, joined_at_unix)
                    .await
            }
        }
    }

    async fn verify_credentials(
        &self,
        username: &Username,
        password: &str,
        dummy_password_hash: &str,
        now_unix: i64,
    ) -> Result<Option<UserId>, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.verify_credentials(username, password, dummy_password_hash, now_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.verify_credentials(username, password, dummy_password_hash, now_unix)
                    .await
            }
        }
    }

    async fn insert_session(
        &self,
        session_id: &str,
        user_id: UserId,
        refresh_hash: [u8; 32],
        expires_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.insert_session(session_id, user_id, refresh_hash, expires_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.insert_session(session_id, user_id, refresh_hash, expires_at_unix)
                    .await
            }
        }
    }

    async fn check_refresh_token(
        &self,
        refresh_token: &str,
        now_unix: i64,
    ) -> Result<RefreshCheck, RefreshCheckError> {
        match self {
            Self::Postgres(repo) => repo.check_refresh_token(refresh_token, now_unix).await,
            Self::InMemory(repo) => repo.check_refresh_token(refresh_token, now_unix).await,
        }
    }

    async fn rotate_refresh_token(
        &self,
        session_id: &str,
        presented_hash: [u8; 32],
        next_hash: [u8; 32],
        now_unix: i64,
        next_expires_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.rotate_refresh_token(
                    session_id,
                    presented_hash,
                    next_hash,
                    now_unix,
                    next_expires_at_unix,
                )
                .await
            }
            Self::InMemory(repo) => {
                repo.rotate_refresh_token(
                    session_id,
                    presented_hash,
                    next_hash,
                    now_unix,
                    next_expires_at_unix,
                )
                .await
            }
        }
    }

    async fn revoke_session_with_token(
        &self,
        session_id: &str,
        token_hash: [u8; 32],
    ) -> Result<UserId, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.revoke_session_with_token(session_id, token_hash).await,
            Self::InMemory(repo) => repo.revoke_session_with_token(session_id, token_hash).await,
        }
    }

    async fn revoke_other_sessions(
        &self,
        user_id: UserId,
        keep_session_id: &str,
    ) -> Result<usize, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.revoke_other_sessions(user_id, keep_session_id).await,
            Self::InMemory(repo) => repo.revoke_other_sessions(user_id, keep_session_id).await,
        }
    }

    async fn find_account(&self, user_id: UserId) -> Result<Option<AccountRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_account(user_id).await,
            Self::InMemory(repo) => repo.find_account(user_id).await,
        }
    }

    async fn lookup_usernames(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.lookup_usernames(user_ids).await,
            Self::InMemory(repo) => repo.lookup_usernames(user_ids).await,
        }
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        is_public: Option<bool>,
        username: Option<&Username>,
    ) -> Result<AccountRecord, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.update_profile(user_id, is_public, username).await,
            Self::InMemory(repo) => repo.update_profile(user_id, is_public, username).await,
        }
    }

    async fn password_hash(&self, user_id: UserId) -> Result<Option<String>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.password_hash(user_id).await,
            Self::InMemory(repo) => repo.password_hash(user_id).await,
        }
    }

    async fn set_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.set_password_hash(user_id, password_hash).await,
            Self::InMemory(repo) => repo.set_password_hash(user_id, password_hash).await,
        }
    }

    async fn search_usernames(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<AccountRecord>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.search_usernames(needle, limit).await,
            Self::InMemory(repo) => repo.search_usernames(needle, limit).await,
        }
    }
}

pub(crate) fn refresh_session_ttl_unix(now_unix: i64) -> i64 {
    now_unix + REFRESH_TOKEN_TTL_SECS
}

#[cfg(test)]
mod tests {
    use murmur_core::Username;

    use super::{AuthPersistence, AuthRepository};
    use crate::server::{
        auth::hash_password,
        core::{AppConfig, AppState},
        errors::AuthFailure,
    };

    fn username(value: &str) -> Username {
        Username::try_from(value.to_owned()).expect("valid username")
    }

    #[tokio::test]
    async fn in_memory_lockout_engages_after_threshold() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let repo = AuthRepository::from_state(&state);
        let hash = hash_password("super-secure-password").expect("hash");
        assert!(repo
            .create_user_if_missing(&username("alice"), &hash, true, 10)
            .await
            .expect("create"));
        assert!(!repo
            .create_user_if_missing(&username("alice"), &hash, false, 11)
            .await
            .expect("duplicate is ignored"));

        for _ in 0..5 {
            let verified = repo
                .verify_credentials(&username("alice"), "wrong-password!", &hash, 100)
                .await
                .expect("verify");
            assert!(verified.is_none());
        }
        let locked = repo
            .verify_credentials(&username("alice"), "super-secure-password", &hash, 101)
            .await
            .expect("verify");
        assert!(locked.is_none());

        let unlocked = repo
            .verify_credentials(&username("alice"), "super-secure-password", &hash, 131)
            .await
            .expect("verify");
        assert!(unlocked.is_some());
    }

    #[tokio::test]
    async fn in_memory_rename_rejects_taken_username_and_frees_old_one() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let repo = AuthRepository::from_state(&state);
        let hash = hash_password("super-secure-password").expect("hash");
        for name in ["alice", "bob"] {
            repo.create_user_if_missing(&username(name), &hash, true, 1)
                .await
                .expect("create");
        }
        let alice = repo
            .search_usernames("ALI", 10)
            .await
            .expect("search")
            .pop()
            .expect("alice is found");

        assert!(matches!(
            repo.update_profile(alice.user_id, None, Some(&username("bob")))
                .await,
            Err(AuthFailure::InvalidRequest)
        ));

        let renamed = repo
            .update_profile(alice.user_id, Some(false), Some(&username("alicia")))
            .await
            .expect("rename");
        assert_eq!(renamed.username, "alicia");
        assert!(!renamed.is_public);
        assert!(repo
            .create_user_if_missing(&username("alice"), &hash, true, 2)
            .await
            .expect("old name is free"));
    }
}
