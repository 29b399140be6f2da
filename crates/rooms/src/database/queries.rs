use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use tracing::instrument;

use crate::database::utils::{map_not_found_as_none, DocumentRow};
use crate::store::{Direction, Document, DocumentPath, Fields, Filter, Query, StoreError};

#[instrument(skip(executor))]
pub async fn fetch_document<'a, E: PgExecutor<'a>>(
    executor: E,
    path: &DocumentPath,
) -> Result<Option<Document>, StoreError> {
    let row: Option<DocumentRow> = map_not_found_as_none(
        sqlx::query_as(
            "
    SELECT
        collection, doc_id, data
    FROM
        documents
    WHERE
        collection = $1 AND doc_id = $2;
    ",
        )
        .bind(path.parent().as_str())
        .bind(path.id())
        .fetch_one(executor)
        .await,
    )?;
    row.map(Document::try_from).transpose()
}

/// Compiles a [`Query`] into SQL over the `documents` table.
///
/// `ArrayContains` becomes a jsonb containment test on the whole body so the
/// GIN index applies. Ties on the order field fall back to the document id in
/// byte order, matching the in-memory store.
pub fn build_query(query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut builder =
        QueryBuilder::new("SELECT collection, doc_id, data FROM documents WHERE collection = ");
    builder.push_bind(query.collection.as_str().to_string());

    for filter in &query.filters {
        match filter {
            Filter::ArrayContains { field, value } => {
                let mut probe = Fields::new();
                probe.insert(field.clone(), Value::Array(vec![value.clone()]));
                builder.push(" AND data @> ");
                builder.push_bind(Json(Value::Object(probe)));
            }
            Filter::Equal { field, value } => {
                builder.push(" AND data -> ");
                builder.push_bind(field.clone());
                builder.push(" = ");
                builder.push_bind(Json(value.clone()));
            }
        }
    }

    match &query.order_by {
        Some(order_by) => {
            builder.push(" AND data -> ");
            builder.push_bind(order_by.field.clone());
            builder.push(" IS NOT NULL ORDER BY data -> ");
            builder.push_bind(order_by.field.clone());
            builder.push(format!(
                " {dir}, doc_id COLLATE \"C\" {dir}",
                dir = order_by.direction
            ));
        }
        None => {
            builder.push(format!(" ORDER BY doc_id COLLATE \"C\" {}", Direction::Asc));
        }
    }

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    builder
}

#[instrument(skip(executor), fields(collection = %query.collection))]
pub async fn run_query<'a, E: PgExecutor<'a>>(
    executor: E,
    query: &Query,
) -> Result<Vec<Document>, StoreError> {
    let rows: Vec<DocumentRow> = build_query(query)
        .build_query_as()
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(Document::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CollectionPath;

    #[test]
    fn latest_message_query_sql() {
        let query = Query::new(CollectionPath::parse("rooms/r1/messages").unwrap())
            .order_by("createdAt", Direction::Desc)
            .limit(1);
        let builder = build_query(&query);

        assert_eq!(
            builder.sql(),
            "SELECT collection, doc_id, data FROM documents WHERE collection = $1 \
             AND data -> $2 IS NOT NULL ORDER BY data -> $3 DESC, doc_id COLLATE \"C\" DESC \
             LIMIT $4"
        );
    }

    #[test]
    fn participant_filter_uses_containment() {
        let query = Query::new(CollectionPath::root("rooms")).array_contains("participants", "alice");
        let builder = build_query(&query);

        assert_eq!(
            builder.sql(),
            "SELECT collection, doc_id, data FROM documents WHERE collection = $1 \
             AND data @> $2 ORDER BY doc_id COLLATE \"C\" ASC"
        );
    }
}
