use std::cmp::Ordering;

use serde_json::Value;
use strum_macros::Display;

use crate::store::{CollectionPath, Document, Fields};

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// The field holds an array with an element equal to `value`.
    ArrayContains { field: String, value: Value },
    Equal { field: String, value: Value },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Self::ArrayContains { field, value } => match fields.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Self::Equal { field, value } => fields.get(field) == Some(value),
        }
    }
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn equal(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equal {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document of the query's collection belongs to the result set,
    /// ignoring the limit. Documents without the order field never match.
    pub fn matches(&self, fields: &Fields) -> bool {
        if let Some(order_by) = &self.order_by {
            if !fields.contains_key(&order_by.field) {
                return false;
            }
        }
        self.filters.iter().all(|filter| filter.matches(fields))
    }

    /// Evaluates the query over every document of its collection.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut result: Vec<Document> = documents
            .into_iter()
            .filter(|doc| doc.path.parent() == &self.collection && self.matches(&doc.fields))
            .collect();
        match &self.order_by {
            Some(order_by) => result.sort_by(|a, b| {
                let ordering = compare_values(&a.fields[&order_by.field], &b.fields[&order_by.field])
                    .then_with(|| a.id().cmp(b.id()));
                match order_by.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            }),
            None => result.sort_by(|a, b| a.id().cmp(b.id())),
        }
        if let Some(limit) = self.limit {
            result.truncate(limit);
        }
        result
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(a, b)| compare_values(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
