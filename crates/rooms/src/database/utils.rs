use sqlx::types::Json;

use crate::store::{CollectionPath, Document, Fields, StoreError};

pub fn map_not_found_as_none<T>(result: Result<T, sqlx::Error>) -> Result<Option<T>, sqlx::Error> {
    match result {
        Ok(ok) => Ok(Some(ok)),
        Err(e) => {
            if matches!(e, sqlx::Error::RowNotFound) {
                Ok(None)
            } else {
                Err(e)
            }
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DocumentRow {
    pub collection: String,
    pub doc_id: String,
    pub data: Json<Fields>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let path = CollectionPath::parse(&row.collection)?.doc(&row.doc_id)?;
        Ok(Document::new(path, row.data.0))
    }
}
