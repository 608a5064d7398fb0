//! Filter evaluation for in-memory document matching.
//!
//! Filters use the MongoDB query document vocabulary: implicit equality, the comparison
//! operators `$eq $ne $gt $gte $lt $lte $in $nin $exists`, and the logical operators
//! `$and $or $nor`. Field names may be dotted paths into nested documents and arrays.
//! Any other operator is rejected.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docgraph_core::error::{DocumentStoreError, DocumentStoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Null, _) => Some(Ordering::Less),
            (_, Comparable::Null) => Some(Ordering::Greater),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path inside a document. Numeric segments index into arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(nested) => nested.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn unsupported(operator: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("unsupported query operator {operator}"))
}

fn operand_list<'b>(operator: &str, operand: &'b Bson) -> DocumentStoreResult<&'b [Bson]> {
    operand.as_array().map(Vec::as_slice).ok_or_else(|| {
        DocumentStoreError::Backend(format!("{operator} expects an array, got {operand}"))
    })
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Null => false,
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        _ => true,
    }
}

/// Matches a single document against a filter document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&self, filter: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.visit_and(operand_list(key, condition)?)?,
                "$or" => self.visit_or(operand_list(key, condition)?)?,
                "$nor" => !self.visit_or(operand_list(key, condition)?)?,
                operator if operator.starts_with('$') => return Err(unsupported(operator)),
                field => self.visit_field(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Returns the documents matching `filter`, in their original order.
    pub fn filter_documents<'d>(
        documents: impl IntoIterator<Item = &'d Document>,
        filter: &Document,
    ) -> DocumentStoreResult<Vec<&'d Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document);
            }
        }

        Ok(matched)
    }

    fn visit_and(&self, filters: &[Bson]) -> DocumentStoreResult<bool> {
        for filter in filters {
            if !self.visit_nested(filter)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&self, filters: &[Bson]) -> DocumentStoreResult<bool> {
        for filter in filters {
            if self.visit_nested(filter)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_nested(&self, filter: &Bson) -> DocumentStoreResult<bool> {
        match filter {
            Bson::Document(filter) => self.evaluate(filter),
            other => Err(DocumentStoreError::Backend(format!(
                "logical operators expect filter documents, got {other}"
            ))),
        }
    }

    fn visit_field(&self, field: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        let value = lookup(self.document, field);

        let operators = match condition {
            Bson::Document(operators)
                if operators.keys().next().is_some_and(|key| key.starts_with('$')) =>
            {
                operators
            }
            _ => return Ok(equals(value, condition)),
        };

        for (operator, operand) in operators {
            let matched = match operator.as_str() {
                "$eq" => equals(value, operand),
                "$ne" => !equals(value, operand),
                "$gt" => compare(value, operand, |o| o == Ordering::Greater),
                "$gte" => compare(value, operand, |o| o != Ordering::Less),
                "$lt" => compare(value, operand, |o| o == Ordering::Less),
                "$lte" => compare(value, operand, |o| o != Ordering::Greater),
                "$in" => operand_list(operator, operand)?
                    .iter()
                    .any(|candidate| equals(value, candidate)),
                "$nin" => !operand_list(operator, operand)?
                    .iter()
                    .any(|candidate| equals(value, candidate)),
                "$exists" => value.is_some() == truthy(operand),
                other => return Err(unsupported(other)),
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Equality with query semantics: null matches a missing field, and an array field
/// matches when any element equals the operand.
fn equals(value: Option<&Bson>, operand: &Bson) -> bool {
    let Some(value) = value else {
        return matches!(operand, Bson::Null);
    };

    let left = Comparable::from(value);
    let right = Comparable::from(operand);

    if left == right {
        return true;
    }

    match left {
        Comparable::Array(items) => items.iter().any(|item| item == &right),
        _ => false,
    }
}

fn compare(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };

    match (Comparable::from(value), Comparable::from(operand)) {
        (Comparable::Null, _) | (_, Comparable::Null) => false,
        (left, right) => left.partial_cmp(&right).is_some_and(accept),
    }
}
