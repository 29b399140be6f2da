use sqlx::types::Json;
use sqlx::{Error as SqlxError, PgExecutor};
use tracing::instrument;

use crate::store::{DocumentPath, Fields};

/// Channel every write transaction notifies with the collection it touched.
pub const CHANGES_CHANNEL: &str = "documents_changed";

#[instrument(skip(executor, fields))]
pub async fn upsert_document<'a, E: PgExecutor<'a>>(
    executor: E,
    path: &DocumentPath,
    fields: &Fields,
) -> Result<(), SqlxError> {
    sqlx::query(
        "
            INSERT INTO documents (collection, doc_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, doc_id)
            DO UPDATE SET data = EXCLUDED.data, updated_at = current_timestamp;
        ",
    )
    .bind(path.parent().as_str())
    .bind(path.id())
    .bind(Json(fields))
    .execute(executor)
    .await?;
    Ok(())
}

/// Returns `false` when the document already existed and nothing was written.
#[instrument(skip(executor, fields))]
pub async fn insert_document<'a, E: PgExecutor<'a>>(
    executor: E,
    path: &DocumentPath,
    fields: &Fields,
) -> Result<bool, SqlxError> {
    let result = sqlx::query(
        "
            INSERT INTO documents (collection, doc_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, doc_id) DO NOTHING;
        ",
    )
    .bind(path.parent().as_str())
    .bind(path.id())
    .bind(Json(fields))
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Returns whether a row was removed.
#[instrument(skip(executor))]
pub async fn delete_document<'a, E: PgExecutor<'a>>(
    executor: E,
    path: &DocumentPath,
) -> Result<bool, SqlxError> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND doc_id = $2;")
        .bind(path.parent().as_str())
        .bind(path.id())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn notify_change<'a, E: PgExecutor<'a>>(
    executor: E,
    collection: &str,
) -> Result<(), SqlxError> {
    sqlx::query("SELECT pg_notify($1, $2);")
        .bind(CHANGES_CHANNEL)
        .bind(collection)
        .execute(executor)
        .await?;
    Ok(())
}
