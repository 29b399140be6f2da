use std::fmt;

use crate::store::StoreError;

/// Path of a collection, e.g. `rooms` or `rooms/ab1/messages`.
///
/// Segments alternate between collection names and document ids, so a
/// valid collection path always has an odd number of segments.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath(String);

/// Path of a single document: its parent collection plus the document id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

fn check_segment(segment: &str, whole: &str) -> Result<(), StoreError> {
    if segment.is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidPath {
            path: whole.to_string(),
            reason: "path segments must be non-empty and cannot contain '/'".to_string(),
        });
    }
    Ok(())
}

impl CollectionPath {
    /// Top-level collection. Panics on an empty name or one containing `/`,
    /// use [`CollectionPath::parse`] for untrusted input.
    pub fn root(name: &str) -> Self {
        assert!(
            !name.is_empty() && !name.contains('/'),
            "invalid collection name: {name:?}"
        );
        Self(name.to_string())
    }

    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let segments: Vec<&str> = path.split('/').collect();
        for segment in &segments {
            check_segment(segment, path)?;
        }
        if segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "collection paths have an odd number of segments".to_string(),
            });
        }
        Ok(Self(path.to_string()))
    }

    pub fn doc(&self, id: &str) -> Result<DocumentPath, StoreError> {
        check_segment(id, &format!("{}/{}", self.0, id))?;
        Ok(DocumentPath {
            collection: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocumentPath {
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let Some((collection, id)) = path.rsplit_once('/') else {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "document paths need a collection and an id".to_string(),
            });
        };
        CollectionPath::parse(collection)?.doc(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> &CollectionPath {
        &self.collection
    }

    /// Sub-collection nested under this document.
    pub fn collection(&self, name: &str) -> Result<CollectionPath, StoreError> {
        let path = format!("{self}/{name}");
        check_segment(name, &path)?;
        Ok(CollectionPath(path))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
