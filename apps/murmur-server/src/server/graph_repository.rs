use sqlx::{PgPool, Row};

use murmur_core::{canonical_pair, UserId};

use crate::server::{
    auth_repository::is_unique_violation,
    core::{AppState, ConnectionRequestRecord, PairRecord},
    errors::AuthFailure,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PairView {
    pub(crate) pair_id: String,
    pub(crate) user_a: UserId,
    pub(crate) user_b: UserId,
    pub(crate) created_at_unix: i64,
}

impl PairView {
    pub(crate) fn contains(&self, user_id: UserId) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other member, or `None` when `user_id` is not in the pair.
    pub(crate) fn peer_of(&self, user_id: UserId) -> Option<UserId> {
        if self.user_a == user_id {
            Some(self.user_b)
        } else if self.user_b == user_id {
            Some(self.user_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectionRequestView {
    pub(crate) request_id: String,
    pub(crate) sender_user_id: UserId,
    pub(crate) sender_username: String,
    pub(crate) recipient_user_id: UserId,
    pub(crate) recipient_username: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectionView {
    pub(crate) user_id: UserId,
    pub(crate) username: String,
    pub(crate) pair_id: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PendingRequests {
    pub(crate) sent: bool,
    pub(crate) received: bool,
}

pub(crate) trait GraphPersistence {
    async fn pair_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<PairView>, AuthFailure>;

    async fn pair_by_id(&self, pair_id: &str) -> Result<Option<PairView>, AuthFailure>;

    async fn pending_requests(
        &self,
        viewer: UserId,
        owner: UserId,
    ) -> Result<PendingRequests, AuthFailure>;

    /// Stores a pending request. Fails with `InvalidRequest` when the
    /// recipient is unknown, the users are already paired, or a request is
    /// pending in either direction.
    async fn create_request(
        &self,
        request_id: &str,
        sender: UserId,
        recipient: UserId,
        created_at_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn list_requests(
        &self,
        user_id: UserId,
    ) -> Result<(Vec<ConnectionRequestView>, Vec<ConnectionRequestView>), AuthFailure>;

    async fn approve_request(
        &self,
        request_id: &str,
        recipient: UserId,
        pair_id: &str,
        created_at_unix: i64,
    ) -> Result<PairView, AuthFailure>;

    async fn delete_request(&self, request_id: &str, actor: UserId) -> Result<(), AuthFailure>;

    async fn list_connections(&self, user_id: UserId) -> Result<Vec<ConnectionView>, AuthFailure>;

    async fn remove_connection(&self, user_a: UserId, user_b: UserId)
        -> Result<bool, AuthFailure>;

    async fn connected_user_ids(&self, user_id: UserId) -> Result<Vec<UserId>, AuthFailure>;
}

pub(crate) struct PostgresGraphRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PostgresGraphRepository<'a> {
    pub(crate) fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

fn user_id_column(row: &sqlx::postgres::PgRow, column: &str) -> Result<UserId, AuthFailure> {
    let value: String = row.try_get(column).map_err(|_| AuthFailure::Internal)?;
    UserId::try_from(value).map_err(|_| AuthFailure::Internal)
}

fn pair_from_row(row: &sqlx::postgres::PgRow) -> Result<PairView, AuthFailure> {
    Ok(PairView {
        pair_id: row.try_get("pair_id").map_err(|_| AuthFailure::Internal)?,
        user_a: user_id_column(row, "user_a_id")?,
        user_b: user_id_column(row, "user_b_id")?,
        created_at_unix: row
            .try_get("created_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

fn request_from_row(row: &sqlx::postgres::PgRow) -> Result<ConnectionRequestView, AuthFailure> {
    Ok(ConnectionRequestView {
        request_id: row
            .try_get("request_id")
            .map_err(|_| AuthFailure::Internal)?,
        sender_user_id: user_id_column(row, "sender_user_id")?,
        sender_username: row
            .try_get("sender_username")
            .map_err(|_| AuthFailure::Internal)?,
        recipient_user_id: user_id_column(row, "recipient_user_id")?,
        recipient_username: row
            .try_get("recipient_username")
            .map_err(|_| AuthFailure::Internal)?,
        created_at_unix: row
            .try_get("created_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

const REQUEST_LIST_SQL: &str =
    "SELECT cr.request_id, cr.sender_user_id, su.username AS sender_username,
            cr.recipient_user_id, ru.username AS recipient_username, cr.created_at_unix
     FROM connection_requests cr
     JOIN users su ON su.user_id = cr.sender_user_id
     JOIN users ru ON ru.user_id = cr.recipient_user_id
     WHERE cr.sender_user_id = $1 OR cr.recipient_user_id = $1
     ORDER BY cr.created_at_unix DESC, cr.request_id DESC";

impl GraphPersistence for PostgresGraphRepository<'_> {
    async fn pair_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<PairView>, AuthFailure> {
        let (pair_a, pair_b) = canonical_pair(user_a, user_b);
        let row = sqlx::query(
            "SELECT pair_id, user_a_id, user_b_id, created_at_unix
             FROM pairs WHERE user_a_id = $1 AND user_b_id = $2",
        )
        .bind(pair_a.to_string())
        .bind(pair_b.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn pair_by_id(&self, pair_id: &str) -> Result<Option<PairView>, AuthFailure> {
        let row = sqlx::query(
            "SELECT pair_id, user_a_id, user_b_id, created_at_unix
             FROM pairs WHERE pair_id = $1",
        )
        .bind(pair_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn pending_requests(
        &self,
        viewer: UserId,
        owner: UserId,
    ) -> Result<PendingRequests, AuthFailure> {
        let rows = sqlx::query(
            "SELECT sender_user_id
             FROM connection_requests
             WHERE (sender_user_id = $1 AND recipient_user_id = $2)
                OR (sender_user_id = $2 AND recipient_user_id = $1)",
        )
        .bind(viewer.to_string())
        .bind(owner.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        let mut pending = PendingRequests::default();
        for row in &rows {
            if user_id_column(row, "sender_user_id")? == viewer {
                pending.sent = true;
            } else {
                pending.received = true;
            }
        }
        Ok(pending)
    }

    async fn create_request(
        &self,
        request_id: &str,
        sender: UserId,
        recipient: UserId,
        created_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        let recipient_exists = sqlx::query("SELECT 1 FROM users WHERE user_id = $1")
            .bind(recipient.to_string())
            .fetch_optional(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        if recipient_exists.is_none() {
            return Err(AuthFailure::InvalidRequest);
        }
        if self.pair_between(sender, recipient).await?.is_some() {
            return Err(AuthFailure::InvalidRequest);
        }
        let pending = self.pending_requests(sender, recipient).await?;
        if pending.sent || pending.received {
            return Err(AuthFailure::InvalidRequest);
        }

        sqlx::query(
            "INSERT INTO connection_requests (request_id, sender_user_id, recipient_user_id, created_at_unix)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(request_id)
        .bind(sender.to_string())
        .bind(recipient.to_string())
        .bind(created_at_unix)
        .execute(self.pool)
        .await
        .map_err(|error| {
            // An opposing request landed between the check and the insert.
            if is_unique_violation(&error) {
                AuthFailure::InvalidRequest
            } else {
                AuthFailure::Internal
            }
        })?;
        Ok(())
    }

    async fn list_requests(
        &self,
        user_id: UserId,
    ) -> Result<(Vec<ConnectionRequestView>, Vec<ConnectionRequestView>), AuthFailure> {
        let rows = sqlx::query(REQUEST_LIST_SQL)
            .bind(user_id.to_string())
            .fetch_all(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;

        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();
        for row in &rows {
            let request = request_from_row(row)?;
            if request.recipient_user_id == user_id {
                incoming.push(request);
            } else {
                outgoing.push(request);
            }
        }
        Ok((incoming, outgoing))
    }

    async fn approve_request(
        &self,
        request_id: &str,
        recipient: UserId,
        pair_id: &str,
        created_at_unix: i64,
    ) -> Result<PairView, AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        let row = sqlx::query(
            "SELECT sender_user_id, recipient_user_id
             FROM connection_requests
             WHERE request_id = $1
             FOR UPDATE",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        let row = row.ok_or(AuthFailure::NotFound)?;
        if user_id_column(&row, "recipient_user_id")? != recipient {
            return Err(AuthFailure::NotFound);
        }
        let sender = user_id_column(&row, "sender_user_id")?;
        let (pair_a, pair_b) = canonical_pair(sender, recipient);

        sqlx::query(
            "INSERT INTO pairs (pair_id, user_a_id, user_b_id, created_at_unix)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_a_id, user_b_id) DO NOTHING",
        )
        .bind(pair_id)
        .bind(pair_a.to_string())
        .bind(pair_b.to_string())
        .bind(created_at_unix)
        .execute(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        sqlx::query("DELETE FROM connection_requests WHERE request_id = $1")
            .bind(request_id)
            .execute(&mut *tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        let pair_row = sqlx::query(
            "SELECT pair_id, user_a_id, user_b_id, created_at_unix
             FROM pairs WHERE user_a_id = $1 AND user_b_id = $2",
        )
        .bind(pair_a.to_string())
        .bind(pair_b.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        pair_from_row(&pair_row)
    }

    async fn delete_request(&self, request_id: &str, actor: UserId) -> Result<(), AuthFailure> {
        let result = sqlx::query(
            "DELETE FROM connection_requests
             WHERE request_id = $1 AND (sender_user_id = $2 OR recipient_user_id = $2)",
        )
        .bind(request_id)
        .bind(actor.to_string())
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        if result.rows_affected() == 0 {
            return Err(AuthFailure::NotFound);
        }
        Ok(())
    }

    async fn list_connections(&self, user_id: UserId) -> Result<Vec<ConnectionView>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT u.user_id, u.username, p.pair_id, p.created_at_unix
             FROM pairs p
             JOIN users u
               ON u.user_id = CASE
                   WHEN p.user_a_id = $1 THEN p.user_b_id
                   ELSE p.user_a_id
               END
             WHERE p.user_a_id = $1 OR p.user_b_id = $1
             ORDER BY p.created_at_unix DESC, p.pair_id DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        let mut connections = Vec::with_capacity(rows.len());
        for row in &rows {
            connections.push(ConnectionView {
                user_id: user_id_column(row, "user_id")?,
                username: row.try_get("username").map_err(|_| AuthFailure::Internal)?,
                pair_id: row.try_get("pair_id").map_err(|_| AuthFailure::Internal)?,
                created_at_unix: row
                    .try_get("created_at_unix")
                    .map_err(|_| AuthFailure::Internal)?,
            });
        }
        Ok(connections)
    }

    async fn remove_connection(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<bool, AuthFailure> {
        let (pair_a, pair_b) = canonical_pair(user_a, user_b);
        let result = sqlx::query("DELETE FROM pairs WHERE user_a_id = $1 AND user_b_id = $2")
            .bind(pair_a.to_string())
            .bind(pair_b.to_string())
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        Ok(result.rows_affected() > 0)
    }

    async fn connected_user_ids(&self, user_id: UserId) -> Result<Vec<UserId>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT CASE WHEN user_a_id = $1 THEN user_b_id ELSE user_a_id END AS peer_id
             FROM pairs
             WHERE user_a_id = $1 OR user_b_id = $1",
        )
        .bind(user_id.to_string())
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        rows.iter()
            .map(|row| user_id_column(row, "peer_id"))
            .collect()
    }
}

pub(crate) struct InMemoryGraphRepository<'a> {
    state: &'a AppState,
}

impl<'a> InMemoryGraphRepository<'a> {
    pub(crate) fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

fn pair_view(members: (UserId, UserId), pair: &PairRecord) -> PairView {
    PairView {
        pair_id: pair.pair_id.clone(),
        user_a: members.0,
        user_b: members.1,
        created_at_unix: pair.created_at_unix,
    }
}

impl GraphPersistence for InMemoryGraphRepository<'_> {
    async fn pair_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<PairView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store
            .pair_between(user_a, user_b)
            .map(|pair| pair_view(canonical_pair(user_a, user_b), pair)))
    }

    async fn pair_by_id(&self, pair_id: &str) -> Result<Option<PairView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store.pair_members(pair_id).and_then(|members| {
            store
                .pairs
                .get(&members)
                .map(|pair| pair_view(members, pair))
        }))
    }

    async fn pending_requests(
        &self,
        viewer: UserId,
        owner: UserId,
    ) -> Result<PendingRequests, AuthFailure> {
        let store = self.state.store.read().await;
        let mut pending = PendingRequests::default();
        for request in store.connection_requests.values() {
            if request.sender_user_id == viewer && request.recipient_user_id == owner {
                pending.sent = true;
            } else if request.sender_user_id == owner && request.recipient_user_id == viewer {
                pending.received = true;
            }
        }
        Ok(pending)
    }

    async fn create_request(
        &self,
        request_id: &str,
        sender: UserId,
        recipient: UserId,
        created_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        let mut store = self.state.store.write().await;
        if !store.users.contains_key(&recipient) || store.pair_between(sender, recipient).is_some()
        {
            return Err(AuthFailure::InvalidRequest);
        }
        let exists = store.connection_requests.values().any(|request| {
            (request.sender_user_id == sender && request.recipient_user_id == recipient)
                || (request.sender_user_id == recipient && request.recipient_user_id == sender)
        });
        if exists {
            return Err(AuthFailure::InvalidRequest);
        }

        store.connection_requests.insert(
            request_id.to_owned(),
            ConnectionRequestRecord {
                sender_user_id: sender,
                recipient_user_id: recipient,
                created_at_unix,
            },
        );
        Ok(())
    }

    async fn list_requests(
        &self,
        user_id: UserId,
    ) -> Result<(Vec<ConnectionRequestView>, Vec<ConnectionRequestView>), AuthFailure> {
        let store = self.state.store.read().await;
        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();

        for (request_id, request) in &store.connection_requests {
            if request.recipient_user_id != user_id && request.sender_user_id != user_id {
                continue;
            }
            let sender_username = store
                .username_of(request.sender_user_id)
                .ok_or(AuthFailure::Internal)?;
            let recipient_username = store
                .username_of(request.recipient_user_id)
                .ok_or(AuthFailure::Internal)?;
            let view = ConnectionRequestView {
                request_id: request_id.clone(),
                sender_user_id: request.sender_user_id,
                sender_username: sender_username.to_owned(),
                recipient_user_id: request.recipient_user_id,
                recipient_username: recipient_username.to_owned(),
                created_at_unix: request.created_at_unix,
            };
            if request.recipient_user_id == user_id {
                incoming.push(view);
            } else {
                outgoing.push(view);
            }
        }

        let newest_first = |left: &ConnectionRequestView, right: &ConnectionRequestView| {
            right
                .created_at_unix
                .cmp(&left.created_at_unix)
                .then_with(|| right.request_id.cmp(&left.request_id))
        };
        incoming.sort_by(newest_first);
        outgoing.sort_by(newest_first);
        Ok((incoming, outgoing))
    }

    async fn approve_request(
        &self,
        request_id: &str,
        recipient: UserId,
        pair_id: &str,
        created_at_unix: i64,
    ) -> Result<PairView, AuthFailure> {
        let mut store = self.state.store.write().await;
        let request = store
            .connection_requests
            .get(request_id)
            .ok_or(AuthFailure::NotFound)?;
        if request.recipient_user_id != recipient {
            return Err(AuthFailure::NotFound);
        }
        let members = canonical_pair(request.sender_user_id, recipient);
        store.connection_requests.remove(request_id);

        let pair = store.pairs.entry(members).or_insert_with(|| PairRecord {
            pair_id: pair_id.to_owned(),
            created_at_unix,
        });
        Ok(pair_view(members, pair))
    }

    async fn delete_request(&self, request_id: &str, actor: UserId) -> Result<(), AuthFailure> {
        let mut store = self.state.store.write().await;
        let request = store
            .connection_requests
            .get(request_id)
            .ok_or(AuthFailure::NotFound)?;
        if request.sender_user_id != actor && request.recipient_user_id != actor {
            return Err(AuthFailure::NotFound);
        }
        store.connection_requests.remove(request_id);
        Ok(())
    }

    async fn list_connections(&self, user_id: UserId) -> Result<Vec<ConnectionView>, AuthFailure> {
        let store = self.state.store.read().await;
        let mut connections = Vec::new();
        for ((user_a, user_b), pair) in &store.pairs {
            let peer = if *user_a == user_id {
                *user_b
            } else if *user_b == user_id {
                *user_a
            } else {
                continue;
            };
            let Some(username) = store.username_of(peer) else {
                continue;
            };
            connections.push(ConnectionView {
                user_id: peer,
                username: username.to_owned(),
                pair_id: pair.pair_id.clone(),
                created_at_unix: pair.created_at_unix,
            });
        }
        connections.sort_by(|left, right| {
            right
                .created_at_unix
                .cmp(&left.created_at_unix)
                .then_with(|| right.pair_id.cmp(&left.pair_id))
        });
        Ok(connections)
    }

    async fn remove_connection(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<bool, AuthFailure> {
        Ok(self
            .state
            .store
            .write()
            .await
            .pairs
            .remove(&canonical_pair(user_a, user_b))
            .is_some())
    }

    async fn connected_user_ids(&self, user_id: UserId) -> Result<Vec<UserId>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store
            .pairs
            .keys()
            .filter_map(|(user_a, user_b)| {
                if *user_a == user_id {
                    Some(*user_b)
                } else if *user_b == user_id {
                    Some(*user_a)
                } else {
                    None
                }
            })
            .collect())
    }
}

pub(crate) enum GraphRepository<'a> {
    Postgres(PostgresGraphRepository<'a>),
    InMemory(InMemoryGraphRepository<'a>),
}

impl GraphRepository<'_> {
    pub(crate) fn from_state(state: &AppState) -> GraphRepository<'_> {
        if let Some(pool) = &state.db_pool {
            GraphRepository::Postgres(PostgresGraphRepository::new(pool))
        } else {
            GraphRepository::InMemory(InMemoryGraphRepository::new(state))
        }
    }
}

impl GraphPersistence for GraphRepository<'_> {
    async fn pair_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<PairView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.pair_between(user_a, user_b).await,
            Self::InMemory(repo) => repo.pair_between(user_a, user_b).await,
        }
    }

    async fn pair_by_id(&self, pair_id: &str) -> Result<Option<PairView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.pair_by_id(pair_id).await,
            Self::InMemory(repo) => repo.pair_by_id(pair_id).await,
        }
    }

    async fn pending_requests(
        &self,
        viewer: UserId,
        owner: UserId,
    ) -> Result<PendingRequests, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.pending_requests(viewer, owner).await,
            Self::InMemory(repo) => repo.pending_requests(viewer, owner).await,
        }
    }

    async fn create_request(
        &self,
        request_id: &str,
        sender: UserId,
        recipient: UserId,
        created_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.create_request(request_id, sender, recipient, created_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.create_request(request_id, sender, recipient, created_at_unix)
                    .await
            }
        }
    }

    async fn list_requests(
        &self,
        user_id: UserId,
    ) -> Result<(Vec<ConnectionRequestView>, Vec<ConnectionRequestView>), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_requests(user_id).await,
            Self::InMemory(repo) => repo.list_requests(user_id).await,
        }
    }

    async fn approve_request(
        &self,
        request_id: &str,
        recipient: UserId,
        pair_id: &str,
        created_at_unix: i64,
    ) -> Result<PairView, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.approve_request(request_id, recipient, pair_id, created_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.approve_request(request_id, recipient, pair_id, created_at_unix)
                    .await
            }
        }
    }

    async fn delete_request(&self, request_id: &str, actor: UserId) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.delete_request(request_id, actor).await,
            Self::InMemory(repo) => repo.delete_request(request_id, actor).await,
        }
    }

    async fn list_connections(&self, user_id: UserId) -> Result<Vec<ConnectionView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_connections(user_id).await,
            Self::InMemory(repo) => repo.list_connections(user_id).await,
        }
    }

    async fn remove_connection(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.remove_connection(user_a, user_b).await,
            Self::InMemory(repo) => repo.remove_connection(user_a, user_b).await,
        }
    }

    async fn connected_user_ids(&self, user_id: UserId) -> Result<Vec<UserId>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.connected_user_ids(user_id).await,
            Self::InMemory(repo) => repo.connected_user_ids(user_id).await,
        }
    }
}
