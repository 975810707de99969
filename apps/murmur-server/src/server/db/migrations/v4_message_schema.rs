use sqlx::{Postgres, Transaction};

const CREATE_MESSAGES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS messages (
                    message_id TEXT PRIMARY KEY,
                    sender_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    recipient_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    body TEXT NOT NULL,
                    sent_at_unix BIGINT NOT NULL,
                    is_read BOOLEAN NOT NULL DEFAULT FALSE,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE
                )";
const CREATE_MESSAGES_SENDER_RECIPIENT_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_sender_recipient
                    ON messages(sender_id, recipient_id, message_id DESC)";
const CREATE_MESSAGES_RECIPIENT_UNREAD_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_recipient_unread
                    ON messages(recipient_id, is_read)";

pub(crate) async fn apply_message_schema(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_MESSAGES_TABLE_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_MESSAGES_SENDER_RECIPIENT_INDEX_SQL)
        .execute(&mut **tx)
        .await?;
    sqlx::query(CREATE_MESSAGES_RECIPIENT_UNREAD_INDEX_SQL)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        CREATE_MESSAGES_RECIPIENT_UNREAD_INDEX_SQL, CREATE_MESSAGES_SENDER_RECIPIENT_INDEX_SQL,
        CREATE_MESSAGES_TABLE_SQL,
    };

    #[test]
    fn message_schema_statements_define_soft_delete_and_read_flags() {
        assert!(CREATE_MESSAGES_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS messages"));
        assert!(CREATE_MESSAGES_TABLE_SQL.contains("is_read BOOLEAN NOT NULL DEFAULT FALSE"));
        assert!(CREATE_MESSAGES_TABLE_SQL.contains("is_deleted BOOLEAN NOT NULL DEFAULT FALSE"));
        assert!(CREATE_MESSAGES_SENDER_RECIPIENT_INDEX_SQL
            .contains("idx_messages_sender_recipient"));
        assert!(CREATE_MESSAGES_RECIPIENT_UNREAD_INDEX_SQL
            .contains("idx_messages_recipient_unread"));
    }
}
