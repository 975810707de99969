mod migrations;

use super::{core::AppState, errors::AuthFailure};
use migrations::{
    v1_identity_schema::apply_identity_schema, v2_social_graph_schema::apply_social_graph_schema,
    v3_posts_schema::apply_posts_schema, v4_message_schema::apply_message_schema,
};

/// Creates every table on first use. Concurrent servers serialize on an
/// advisory lock so only one of them runs the statements at a time.
pub(crate) async fn ensure_db_schema(state: &AppState) -> Result<(), AuthFailure> {
    const SCHEMA_INIT_LOCK_ID: i64 = 0x4d55_524d_5552_0001;
    let Some(pool) = &state.db_pool else {
        return Ok(());
    };

    state
        .db_init
        .get_or_try_init(|| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SCHEMA_INIT_LOCK_ID)
                .execute(&mut *tx)
                .await?;

            apply_identity_schema(&mut tx).await?;
            apply_social_graph_schema(&mut tx).await?;
            apply_posts_schema(&mut tx).await?;
            apply_message_schema(&mut tx).await?;

            tx.commit().await?;

            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|e| {
            tracing::error!(event = "db.init", error = %e);
            AuthFailure::Internal
        })?;

    Ok(())
}
