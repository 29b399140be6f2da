use sqlx::{Error as SqlxError, Postgres, Transaction};
use tracing::{info, instrument};

use crate::database::connection::DbConnection;

impl DbConnection {
    pub async fn create_all(&self) -> Result<(), SqlxError> {
        let mut transaction = self.pool().begin().await?;
        create_all_tables(&mut transaction).await?;
        create_all_indexes(&mut transaction).await?;
        transaction.commit().await?;
        info!("document schema created");
        Ok(())
    }

    pub async fn drop_all(&self) -> Result<(), SqlxError> {
        let mut transaction = self.pool().begin().await?;
        drop_all_tables(&mut transaction).await?;
        transaction.commit().await?;
        info!("document schema dropped");
        Ok(())
    }
}

#[instrument(skip_all)]
pub async fn create_all_tables(
    transaction: &mut Transaction<'_, Postgres>,
) -> Result<(), SqlxError> {
    // one row per document, nested collections are encoded in `collection`
    // (e.g. `rooms/ab1/messages`), so deleting a room row leaves its messages
    sqlx::query(
        "
            CREATE TABLE IF NOT EXISTS documents (
                collection      TEXT NOT NULL,
                doc_id          TEXT NOT NULL,
                data            JSONB NOT NULL,
                updated_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT current_timestamp,
                CONSTRAINT documents_pkey PRIMARY KEY (collection, doc_id)
            );
        ",
    )
    .execute(transaction.as_mut())
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_all_indexes(
    transaction: &mut Transaction<'_, Postgres>,
) -> Result<(), SqlxError> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS documents_data_idx ON documents USING GIN (data jsonb_path_ops);",
    )
    .execute(transaction.as_mut())
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn drop_all_tables(transaction: &mut Transaction<'_, Postgres>) -> Result<(), SqlxError> {
    let statements = [
        "DROP INDEX IF EXISTS documents_data_idx;",
        "DROP TABLE IF EXISTS documents;",
    ];
    for statement in &statements {
        sqlx::query(statement).execute(transaction.as_mut()).await?;
    }
    Ok(())
}
