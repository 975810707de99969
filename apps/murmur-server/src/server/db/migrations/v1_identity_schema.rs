use sqlx::{Postgres, Transaction};

const CREATE_USERS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS users (
                    user_id TEXT PRIMARY KEY,
                    username TEXT UNIQUE NOT NULL,
                    password_hash TEXT NOT NULL,
                    is_public BOOLEAN NOT NULL DEFAULT TRUE,
                    joined_at_unix BIGINT NOT NULL,
                    failed_logins SMALLINT NOT NULL DEFAULT 0,
                    locked_until_unix BIGINT NULL
                )";
const CREATE_SESSIONS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    refresh_token_hash BYTEA NOT NULL,
                    expires_at_unix BIGINT NOT NULL,
                    revoked BOOLEAN NOT NULL DEFAULT FALSE
                )";
const CREATE_SESSIONS_USER_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)";
const CREATE_USED_REFRESH_TOKENS_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS used_refresh_tokens (
                    token_hash BYTEA PRIMARY KEY,
                    session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                    used_at_unix BIGINT NOT NULL
                )";

pub(crate) async fn apply_identity_schema(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_USERS_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_SESSIONS_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_SESSIONS_USER_INDEX_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_USED_REFRESH_TOKENS_TABLE_SQL)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        CREATE_SESSIONS_TABLE_SQL, CREATE_SESSIONS_USER_INDEX_SQL,
        CREATE_USED_REFRESH_TOKENS_TABLE_SQL, CREATE_USERS_TABLE_SQL,
    };

    #[test]
    fn identity_schema_statements_define_required_tables() {
        assert!(CREATE_USERS_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS users"));
        assert!(CREATE_USERS_TABLE_SQL.contains("username TEXT UNIQUE NOT NULL"));
        assert!(CREATE_USERS_TABLE_SQL.contains("is_public BOOLEAN NOT NULL DEFAULT TRUE"));
        assert!(CREATE_SESSIONS_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS sessions"));
        assert!(CREATE_SESSIONS_USER_INDEX_SQL.contains("idx_sessions_user"));
        assert!(CREATE_USED_REFRESH_TOKENS_TABLE_SQL
            .contains("CREATE TABLE IF NOT EXISTS used_refresh_tokens"));
    }
}
