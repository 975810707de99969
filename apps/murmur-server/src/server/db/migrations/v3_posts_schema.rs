use sqlx::{Postgres, Transaction};

const CREATE_UPDATES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS updates (
                    update_id TEXT PRIMARY KEY,
                    author_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    body TEXT NOT NULL,
                    posted_at_unix BIGINT NOT NULL
                )";
const CREATE_UPDATES_AUTHOR_POSTED_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_updates_author_posted
                    ON updates(author_id, posted_at_unix DESC, update_id DESC)";
const CREATE_UPDATES_POSTED_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_updates_posted
                    ON updates(posted_at_unix DESC, update_id DESC)";
const CREATE_COMMENTS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS comments (
                    comment_id TEXT PRIMARY KEY,
                    update_id TEXT NOT NULL REFERENCES updates(update_id) ON DELETE CASCADE,
                    author_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    body TEXT NOT NULL,
                    posted_at_unix BIGINT NOT NULL
                )";
const CREATE_COMMENTS_UPDATE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_comments_update
                    ON comments(update_id, comment_id)";

pub(crate) async fn apply_posts_schema(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_UPDATES_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_UPDATES_AUTHOR_POSTED_INDEX_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_UPDATES_POSTED_INDEX_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_COMMENTS_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_COMMENTS_UPDATE_INDEX_SQL)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
