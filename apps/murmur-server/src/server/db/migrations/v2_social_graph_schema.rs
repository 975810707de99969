use sqlx::{Postgres, Transaction};

const CREATE_PAIRS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS pairs (
                    pair_id TEXT PRIMARY KEY,
                    user_a_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    user_b_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL,
                    CHECK (user_a_id < user_b_id),
                    UNIQUE(user_a_id, user_b_id)
                )";
const CREATE_PAIRS_USER_B_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_pairs_user_b ON pairs(user_b_id)";
const CREATE_CONNECTION_REQUESTS_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS connection_requests (
                    request_id TEXT PRIMARY KEY,
                    sender_user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    recipient_user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL,
                    CHECK (sender_user_id <> recipient_user_id)
                )";
const CREATE_CONNECTION_REQUESTS_PAIR_INDEX_SQL: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_connection_requests_pair
                    ON connection_requests(
                        LEAST(sender_user_id, recipient_user_id),
                        GREATEST(sender_user_id, recipient_user_id)
                    )";
const CREATE_CONNECTION_REQUESTS_SENDER_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_connection_requests_sender
                    ON connection_requests(sender_user_id)";
const CREATE_CONNECTION_REQUESTS_RECIPIENT_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_connection_requests_recipient
                    ON connection_requests(recipient_user_id)";

pub(crate) async fn apply_social_graph_schema(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_PAIRS_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_PAIRS_USER_B_INDEX_SQL)
        .execute(&mut **tx)
        .await?;

    sqlx::query(CREATE_CONNECTION_REQUESTS_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_CONNECTION_REQUESTS_PAIR_INDEX_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_CONNECTION_REQUESTS_SENDER_INDEX_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_CONNECTION_REQUESTS_RECIPIENT_INDEX_SQL)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
