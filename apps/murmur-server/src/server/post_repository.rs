use std::collections::HashSet;

use sqlx::{PgPool, Row};

use murmur_core::{PageRequest, UserId};

use crate::server::{
    core::{AppState, CommentRecord, IndexedUpdate, MemoryStore, UpdateRecord},
    errors::AuthFailure,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateView {
    pub(crate) update_id: String,
    pub(crate) author_id: UserId,
    pub(crate) author_username: String,
    pub(crate) author_is_public: bool,
    pub(crate) body: String,
    pub(crate) posted_at_unix: i64,
}

impl UpdateView {
    pub(crate) fn to_indexed(&self) -> IndexedUpdate {
        IndexedUpdate {
            update_id: self.update_id.clone(),
            author_id: self.author_id.to_string(),
            posted_at_unix: self.posted_at_unix,
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommentView {
    pub(crate) comment_id: String,
    pub(crate) update_id: String,
    pub(crate) author_id: UserId,
    pub(crate) author_username: String,
    pub(crate) body: String,
    pub(crate) posted_at_unix: i64,
}

pub(crate) trait PostPersistence {
    async fn insert_update(
        &self,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn find_update(&self, update_id: &str) -> Result<Option<UpdateView>, AuthFailure>;

    /// Removes the update together with its comments.
    async fn delete_update(&self, update_id: &str) -> Result<bool, AuthFailure>;

    async fn insert_comment(
        &self,
        comment_id: &str,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn list_comments(&self, update_id: &str) -> Result<Vec<CommentView>, AuthFailure>;

    async fn list_user_updates(
        &self,
        author_id: UserId,
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure>;

    async fn count_user_updates(&self, author_id: UserId) -> Result<i64, AuthFailure>;

    async fn public_feed(&self, page: PageRequest) -> Result<Vec<UpdateView>, AuthFailure>;

    async fn connections_feed(
        &self,
        author_ids: &[UserId],
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure>;

    async fn updates_by_ids(&self, update_ids: &[String]) -> Result<Vec<UpdateView>, AuthFailure>;

    async fn all_updates_for_index(&self) -> Result<Vec<IndexedUpdate>, AuthFailure>;
}

pub(crate) struct PostgresPostRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PostgresPostRepository<'a> {
    pub(crate) fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

const UPDATE_SELECT_SQL: &str = "SELECT up.update_id, up.author_id, u.username AS author_username,
            u.is_public AS author_is_public, up.body, up.posted_at_unix
     FROM updates up
     JOIN users u ON u.user_id = up.author_id";

fn page_bounds(page: PageRequest) -> (i64, i64) {
    (
        i64::try_from(page.fetch_limit()).unwrap_or(i64::MAX),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

fn update_from_row(row: &sqlx::postgres::PgRow) -> Result<UpdateView, AuthFailure> {
    let author_id: String = row.try_get("author_id").map_err(|_| AuthFailure::Internal)?;
    Ok(UpdateView {
        update_id: row.try_get("update_id").map_err(|_| AuthFailure::Internal)?,
        author_id: UserId::try_from(author_id).map_err(|_| AuthFailure::Internal)?,
        author_username: row
            .try_get("author_username")
            .map_err(|_| AuthFailure::Internal)?,
        author_is_public: row
            .try_get("author_is_public")
            .map_err(|_| AuthFailure::Internal)?,
        body: row.try_get("body").map_err(|_| AuthFailure::Internal)?,
        posted_at_unix: row
            .try_get("posted_at_unix")
            .map_err(|_| AuthFailure::Internal)?,
    })
}

fn updates_from_rows(rows: &[sqlx::postgres::PgRow]) -> Result<Vec<UpdateView>, AuthFailure> {
    rows.iter().map(update_from_row).collect()
}

impl PostPersistence for PostgresPostRepository<'_> {
    async fn insert_update(
        &self,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        sqlx::query(
            "INSERT INTO updates (update_id, author_id, body, posted_at_unix)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(update_id)
        .bind(author_id.to_string())
        .bind(body)
        .bind(posted_at_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn find_update(&self, update_id: &str) -> Result<Option<UpdateView>, AuthFailure> {
        let row = sqlx::query(&format!("{UPDATE_SELECT_SQL} WHERE up.update_id = $1"))
            .bind(update_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        row.as_ref().map(update_from_row).transpose()
    }

    async fn delete_update(&self, update_id: &str) -> Result<bool, AuthFailure> {
        let mut tx = self.pool.begin().await.map_err(|_| AuthFailure::Internal)?;
        sqlx::query("DELETE FROM comments WHERE update_id = $1")
            .bind(update_id)
            .execute(&mut *tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        let deleted = sqlx::query("DELETE FROM updates WHERE update_id = $1")
            .bind(update_id)
            .execute(&mut *tx)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        tx.commit().await.map_err(|_| AuthFailure::Internal)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn insert_comment(
        &self,
        comment_id: &str,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        sqlx::query(
            "INSERT INTO comments (comment_id, update_id, author_id, body, posted_at_unix)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(comment_id)
        .bind(update_id)
        .bind(author_id.to_string())
        .bind(body)
        .bind(posted_at_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn list_comments(&self, update_id: &str) -> Result<Vec<CommentView>, AuthFailure> {
        let rows = sqlx::query(
            "SELECT c.comment_id, c.update_id, c.author_id, u.username AS author_username,
                    c.body, c.posted_at_unix
             FROM comments c
             JOIN users u ON u.user_id = c.author_id
             WHERE c.update_id = $1
             ORDER BY c.posted_at_unix ASC, c.comment_id ASC",
        )
        .bind(update_id)
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        let mut comments = Vec::with_capacity(rows.len());
        for row in rows {
            let author_id: String = row.try_get("author_id").map_err(|_| AuthFailure::Internal)?;
            comments.push(CommentView {
                comment_id: row
                    .try_get("comment_id")
                    .map_err(|_| AuthFailure::Internal)?,
                update_id: row.try_get("update_id").map_err(|_| AuthFailure::Internal)?,
                author_id: UserId::try_from(author_id).map_err(|_| AuthFailure::Internal)?,
                author_username: row
                    .try_get("author_username")
                    .map_err(|_| AuthFailure::Internal)?,
                body: row.try_get("body").map_err(|_| AuthFailure::Internal)?,
                posted_at_unix: row
                    .try_get("posted_at_unix")
                    .map_err(|_| AuthFailure::Internal)?,
            });
        }
        Ok(comments)
    }

    async fn list_user_updates(
        &self,
        author_id: UserId,
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure> {
        let (limit, offset) = page_bounds(page);
        let rows = sqlx::query(&format!(
            "{UPDATE_SELECT_SQL}
             WHERE up.author_id = $1
             ORDER BY up.posted_at_unix DESC, up.update_id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(author_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        updates_from_rows(&rows)
    }

    async fn count_user_updates(&self, author_id: UserId) -> Result<i64, AuthFailure> {
        let row = sqlx::query("SELECT COUNT(*) AS update_count FROM updates WHERE author_id = $1")
            .bind(author_id.to_string())
            .fetch_one(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        row.try_get("update_count")
            .map_err(|_| AuthFailure::Internal)
    }

    async fn public_feed(&self, page: PageRequest) -> Result<Vec<UpdateView>, AuthFailure> {
        let (limit, offset) = page_bounds(page);
        let rows = sqlx::query(&format!(
            "{UPDATE_SELECT_SQL}
             WHERE u.is_public = TRUE
             ORDER BY up.posted_at_unix DESC, up.update_id DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        updates_from_rows(&rows)
    }

    async fn connections_feed(
        &self,
        author_ids: &[UserId],
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }
        let (limit, offset) = page_bounds(page);
        let ids: Vec<String> = author_ids.iter().map(ToString::to_string).collect();
        let rows = sqlx::query(&format!(
            "{UPDATE_SELECT_SQL}
             WHERE up.author_id = ANY($1)
             ORDER BY up.posted_at_unix DESC, up.update_id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(&ids)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        updates_from_rows(&rows)
    }

    async fn updates_by_ids(&self, update_ids: &[String]) -> Result<Vec<UpdateView>, AuthFailure> {
        if update_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!("{UPDATE_SELECT_SQL} WHERE up.update_id = ANY($1)"))
            .bind(update_ids)
            .fetch_all(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        updates_from_rows(&rows)
    }

    async fn all_updates_for_index(&self) -> Result<Vec<IndexedUpdate>, AuthFailure> {
        let rows = sqlx::query("SELECT update_id, author_id, body, posted_at_unix FROM updates")
            .fetch_all(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            docs.push(IndexedUpdate {
                update_id: row.try_get("update_id").map_err(|_| AuthFailure::Internal)?,
                author_id: row.try_get("author_id").map_err(|_| AuthFailure::Internal)?,
                posted_at_unix: row
                    .try_get("posted_at_unix")
                    .map_err(|_| AuthFailure::Internal)?,
                body: row.try_get("body").map_err(|_| AuthFailure::Internal)?,
            });
        }
        Ok(docs)
    }
}

pub(crate) struct InMemoryPostRepository<'a> {
    state: &'a AppState,
}

impl<'a> InMemoryPostRepository<'a> {
    pub(crate) fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

fn update_view(store: &MemoryStore, update_id: &str, update: &UpdateRecord) -> Option<UpdateView> {
    let author = store.users.get(&update.author_id)?;
    Some(UpdateView {
        update_id: update_id.to_owned(),
        author_id: update.author_id,
        author_username: author.username.as_str().to_owned(),
        author_is_public: author.is_public,
        body: update.body.clone(),
        posted_at_unix: update.posted_at_unix,
    })
}

/// Newest first, then one page plus a lookahead row.
fn paginate_updates<'s>(
    store: &'s MemoryStore,
    page: PageRequest,
    mut include: impl FnMut(&UpdateRecord) -> bool,
) -> Vec<UpdateView> {
    let mut matched: Vec<(&'s String, &'s UpdateRecord)> = store
        .updates
        .iter()
        .filter(|(_, update)| include(update))
        .collect();
    matched.sort_by(|(left_id, left), (right_id, right)| {
        right
            .posted_at_unix
            .cmp(&left.posted_at_unix)
            .then_with(|| right_id.cmp(left_id))
    });
    matched
        .into_iter()
        .skip(page.offset())
        .take(page.fetch_limit())
        .filter_map(|(update_id, update)| update_view(store, update_id, update))
        .collect()
}

impl PostPersistence for InMemoryPostRepository<'_> {
    async fn insert_update(
        &self,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.state.store.write().await.updates.insert(
            update_id.to_owned(),
            UpdateRecord {
                author_id,
                body: body.to_owned(),
                posted_at_unix,
            },
        );
        Ok(())
    }

    async fn find_update(&self, update_id: &str) -> Result<Option<UpdateView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store
            .updates
            .get(update_id)
            .and_then(|update| update_view(&store, update_id, update)))
    }

    async fn delete_update(&self, update_id: &str) -> Result<bool, AuthFailure> {
        let mut store = self.state.store.write().await;
        let removed = store.updates.remove(update_id).is_some();
        store
            .comments
            .retain(|_, comment| comment.update_id != update_id);
        Ok(removed)
    }

    async fn insert_comment(
        &self,
        comment_id: &str,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        let mut store = self.state.store.write().await;
        if !store.updates.contains_key(update_id) {
            return Err(AuthFailure::NotFound);
        }
        store.comments.insert(
            comment_id.to_owned(),
            CommentRecord {
                update_id: update_id.to_owned(),
                author_id,
                body: body.to_owned(),
                posted_at_unix,
            },
        );
        Ok(())
    }

    async fn list_comments(&self, update_id: &str) -> Result<Vec<CommentView>, AuthFailure> {
        let store = self.state.store.read().await;
        let mut comments: Vec<CommentView> = store
            .comments
            .iter()
            .filter(|(_, comment)| comment.update_id == update_id)
            .filter_map(|(comment_id, comment)| {
                Some(CommentView {
                    comment_id: comment_id.clone(),
                    update_id: comment.update_id.clone(),
                    author_id: comment.author_id,
                    author_username: store.username_of(comment.author_id)?.to_owned(),
                    body: comment.body.clone(),
                    posted_at_unix: comment.posted_at_unix,
                })
            })
            .collect();
        comments.sort_by(|left, right| {
            left.posted_at_unix
                .cmp(&right.posted_at_unix)
                .then_with(|| left.comment_id.cmp(&right.comment_id))
        });
        Ok(comments)
    }

    async fn list_user_updates(
        &self,
        author_id: UserId,
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(paginate_updates(&store, page, |update| {
            update.author_id == author_id
        }))
    }

    async fn count_user_updates(&self, author_id: UserId) -> Result<i64, AuthFailure> {
        let store = self.state.store.read().await;
        let count = store
            .updates
            .values()
            .filter(|update| update.author_id == author_id)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn public_feed(&self, page: PageRequest) -> Result<Vec<UpdateView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(paginate_updates(&store, page, |update| {
            store
                .users
                .get(&update.author_id)
                .is_some_and(|author| author.is_public)
        }))
    }

    async fn connections_feed(
        &self,
        author_ids: &[UserId],
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure> {
        let authors: HashSet<UserId> = author_ids.iter().copied().collect();
        let store = self.state.store.read().await;
        Ok(paginate_updates(&store, page, |update| {
            authors.contains(&update.author_id)
        }))
    }

    async fn updates_by_ids(&self, update_ids: &[String]) -> Result<Vec<UpdateView>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(update_ids
            .iter()
            .filter_map(|update_id| {
                store
                    .updates
                    .get(update_id)
                    .and_then(|update| update_view(&store, update_id, update))
            })
            .collect())
    }

    async fn all_updates_for_index(&self) -> Result<Vec<IndexedUpdate>, AuthFailure> {
        let store = self.state.store.read().await;
        Ok(store
            .updates
            .iter()
            .map(|(update_id, update)| IndexedUpdate {
                update_id: update_id.clone(),
                author_id: update.author_id.to_string(),
                posted_at_unix: update.posted_at_unix,
                body: update.body.clone(),
            })
            .collect())
    }
}

pub(crate) enum PostRepository<'a> {
    Postgres(PostgresPostRepository<'a>),
    InMemory(InMemoryPostRepository<'a>),
}

impl PostRepository<'_> {
    pub(crate) fn from_state(state: &AppState) -> PostRepository<'_> {
        if let Some(pool) = &state.db_pool {
            PostRepository::Postgres(PostgresPostRepository::new(pool))
        } else {
            PostRepository::InMemory(InMemoryPostRepository::new(state))
        }
    }
}

impl PostPersistence for PostRepository<'_> {
    async fn insert_update(
        &self,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.insert_update(update_id, author_id, body, posted_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.insert_update(update_id, author_id, body, posted_at_unix)
                    .await
            }
        }
    }

    async fn find_update(&self, update_id: &str) -> Result<Option<UpdateView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.find_update(update_id).await,
            Self::InMemory(repo) => repo.find_update(update_id).await,
        }
    }

    async fn delete_update(&self, update_id: &str) -> Result<bool, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.delete_update(update_id).await,
            Self::InMemory(repo) => repo.delete_update(update_id).await,
        }
    }

    async fn insert_comment(
        &self,
        comment_id: &str,
        update_id: &str,
        author_id: UserId,
        body: &str,
        posted_at_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.insert_comment(comment_id, update_id, author_id, body, posted_at_unix)
                    .await
            }
            Self::InMemory(repo) => {
                repo.insert_comment(comment_id, update_id, author_id, body, posted_at_unix)
                    .await
            }
        }
    }

    async fn list_comments(&self, update_id: &str) -> Result<Vec<CommentView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_comments(update_id).await,
            Self::InMemory(repo) => repo.list_comments(update_id).await,
        }
    }

    async fn list_user_updates(
        &self,
        author_id: UserId,
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.list_user_updates(author_id, page).await,
            Self::InMemory(repo) => repo.list_user_updates(author_id, page).await,
        }
    }

    async fn count_user_updates(&self, author_id: UserId) -> Result<i64, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.count_user_updates(author_id).await,
            Self::InMemory(repo) => repo.count_user_updates(author_id).await,
        }
    }

    async fn public_feed(&self, page: PageRequest) -> Result<Vec<UpdateView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.public_feed(page).await,
            Self::InMemory(repo) => repo.public_feed(page).await,
        }
    }

    async fn connections_feed(
        &self,
        author_ids: &[UserId],
        page: PageRequest,
    ) -> Result<Vec<UpdateView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.connections_feed(author_ids, page).await,
            Self::InMemory(repo) => repo.connections_feed(author_ids, page).await,
        }
    }

    async fn updates_by_ids(&self, update_ids: &[String]) -> Result<Vec<UpdateView>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.updates_by_ids(update_ids).await,
            Self::InMemory(repo) => repo.updates_by_ids(update_ids).await,
        }
    }

    async fn all_updates_for_index(&self) -> Result<Vec<IndexedUpdate>, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.all_updates_for_index().await,
            Self::InMemory(repo) => repo.all_updates_for_index().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use murmur_core::{PageRequest, UserId, Username};

    use super::{PostPersistence, PostRepository};
    use crate::server::{
        auth_repository::{AuthPersistence, AuthRepository},
        core::{AppConfig, AppState},
    };

    async fn seed_user(state: &AppState, name: &str, is_public: bool) -> UserId {
        let repo = AuthRepository::from_state(state);
        let username = Username::try_from(name.to_owned()).expect("valid username");
        repo.create_user_if_missing(&username, "hash", is_public, 1)
            .await
            .expect("create");
        repo.search_usernames(name, 1)
            .await
            .expect("search")
            .pop()
            .expect("user exists")
            .user_id
    }

    #[tokio::test]
    async fn public_feed_pages_newest_first_and_skips_private_authors() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let public = seed_user(&state, "alice", true).await;
        let private = seed_user(&state, "bob", false).await;
        let posts = PostRepository::from_state(&state);

        for (index, posted_at) in (10..15).enumerate() {
            posts
                .insert_update(&format!("u{index}"), public, "hello", posted_at)
                .await
                .expect("insert");
        }
        posts
            .insert_update("hidden", private, "secret", 99)
            .await
            .expect("insert");

        let page = PageRequest::new(Some(0), Some(2)).expect("valid page");
        let mut first = posts.public_feed(page).await.expect("feed");
        assert_eq!(page.finish(&mut first), Some(2));
        let ids: Vec<&str> = first.iter().map(|update| update.update_id.as_str()).collect();
        assert_eq!(ids, vec!["u4", "u3"]);

        let last_page = PageRequest::new(Some(4), Some(2)).expect("valid page");
        let mut last = posts.public_feed(last_page).await.expect("feed");
        assert_eq!(last_page.finish(&mut last), None);
        assert_eq!(last.len(), 1);

        let mut connections = posts
            .connections_feed(&[private], PageRequest::default())
            .await
            .expect("feed");
        assert_eq!(PageRequest::default().finish(&mut connections), None);
        assert_eq!(connections[0].update_id, "hidden");
    }

    #[tokio::test]
    async fn deleting_update_drops_its_comments() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let author = seed_user(&state, "alice", true).await;
        let posts = PostRepository::from_state(&state);
        posts
            .insert_update("u1", author, "hello", 1)
            .await
            .expect("insert");
        posts
            .insert_comment("c2", "u1", author, "second", 3)
            .await
            .expect("comment");
        posts
            .insert_comment("c1", "u1", author, "first", 2)
            .await
            .expect("comment");

        let comments = posts.list_comments("u1").await.expect("comments");
        assert_eq!(comments[0].body, "first");
        assert_eq!(comments[1].author_username, "alice");

        assert!(posts.delete_update("u1").await.expect("delete"));
        assert!(posts.list_comments("u1").await.expect("comments").is_empty());
        assert_eq!(posts.count_user_updates(author).await.expect("count"), 0);
    }
}
