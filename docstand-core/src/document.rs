//! Dotted-path access into BSON documents.
//!
//! Paths like `"address.city"` or `"items.0.qty"` address nested fields. Reads
//! used by the matcher fan out across arrays ([`resolve_path`]), while reads and
//! writes used by modifications address exactly one location ([`get_path`],
//! [`set_path`], [`remove_path`]).

use bson::{Bson, Document};

use crate::error::{MongoError, MongoResult};

/// Most nulls a positional write may append to reach its index.
pub const MAX_ARRAY_PADDING: usize = 1_500_000;

/// Splits a dotted path into its segments.
///
/// # Errors
///
/// Returns a `BadValue` fault if the path or any of its segments is empty.
pub fn split_path(path: &str) -> MongoResult<Vec<&str>> {
    if path.is_empty() {
        return Err(MongoError::bad_value("An empty field path is not allowed"));
    }

    let segments = path.split('.').collect::<Vec<_>>();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(MongoError::bad_value(format!(
            "The field path '{path}' contains an empty field name"
        )));
    }

    Ok(segments)
}

/// Collects every value reachable at `segments`, fanning out across arrays.
///
/// A segment applied to an array either indexes into it (numeric segment) or is
/// applied to each embedded document element. Missing fields contribute nothing,
/// so an empty result means the path does not exist in the document.
pub fn resolve_path<'a, S: AsRef<str>>(document: &'a Document, segments: &[S]) -> Vec<&'a Bson> {
    let mut found = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(head.as_ref()) {
            collect(value, rest, &mut found);
        }
    }
    found
}

fn collect<'a, S: AsRef<str>>(value: &'a Bson, segments: &[S], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(child) = doc.get(head.as_ref()) {
                collect(child, rest, found);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.as_ref().parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect(item, rest, found);
                }
                return;
            }
            for item in items {
                if let Bson::Document(doc) = item {
                    if let Some(child) = doc.get(head.as_ref()) {
                        collect(child, rest, found);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Returns the single value at `path`, indexing into arrays by numeric segment.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Writes `value` at `path`, creating intermediate documents as needed.
///
/// Numeric segments index into existing arrays, padding them with nulls when the
/// index lies past the end.
///
/// # Errors
///
/// Returns a `BadValue` fault when the path is empty or crosses a value that can
/// hold no fields (e.g. setting `"a.b"` when `a` is a number).
pub fn set_path(document: &mut Document, path: &str, value: Bson) -> MongoResult<()> {
    let segments = split_path(path)?;
    set_in_document(document, &segments, value)
}

fn set_in_document(document: &mut Document, segments: &[&str], value: Bson) -> MongoResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        document.insert(*head, value);
        return Ok(());
    }

    if !document.contains_key(*head) {
        document.insert(*head, Document::new());
    }

    match document.get_mut(*head) {
        Some(child) => set_in_value(child, head, rest, value),
        None => Ok(()),
    }
}

fn set_in_value(target: &mut Bson, name: &str, segments: &[&str], value: Bson) -> MongoResult<()> {
    match target {
        Bson::Document(doc) => set_in_document(doc, segments, value),
        Bson::Array(items) => {
            let Some((head, rest)) = segments.split_first() else {
                return Ok(());
            };
            let index = head.parse::<usize>().map_err(|_| {
                MongoError::bad_value(format!(
                    "Cannot create field '{head}' in element {{{name}: {}}}",
                    Bson::Array(items.clone())
                ))
            })?;

            if index > items.len() && index - items.len() > MAX_ARRAY_PADDING {
                return Err(MongoError::bad_value(format!(
                    "can't backfill array '{name}' to index {index}, more than 1500000 elements would be added"
                )));
            }
            while items.len() <= index {
                items.push(Bson::Null);
            }

            if rest.is_empty() {
                items[index] = value;
                return Ok(());
            }

            if matches!(items[index], Bson::Null) {
                items[index] = Bson::Document(Document::new());
            }
            set_in_value(&mut items[index], head, rest, value)
        }
        other => Err(MongoError::bad_value(format!(
            "Cannot create field '{}' in element {{{name}: {other}}}",
            segments.first().copied().unwrap_or_default()
        ))),
    }
}

/// Removes the value at `path` and returns it.
///
/// Removing an array element by index leaves a null in its place so the
/// positions of the remaining elements are preserved.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    remove_in_document(document, &segments)
}

fn remove_in_document(document: &mut Document, segments: &[&str]) -> Option<Bson> {
    let (head, rest) = segments.split_first()?;
    if rest.is_empty() {
        return document.remove(*head);
    }
    remove_in_value(document.get_mut(*head)?, rest)
}

fn remove_in_value(target: &mut Bson, segments: &[&str]) -> Option<Bson> {
    match target {
        Bson::Document(doc) => remove_in_document(doc, segments),
        Bson::Array(items) => {
            let (head, rest) = segments.split_first()?;
            let index = head.parse::<usize>().ok()?;
            let item = items.get_mut(index)?;
            if rest.is_empty() {
                Some(std::mem::replace(item, Bson::Null))
            } else {
                remove_in_value(item, rest)
            }
        }
        _ => None,
    }
}

/// Rebuilds `document` with `id_field` set to `id` and placed first.
pub fn with_identity_first(id_field: &str, id: Bson, document: Document) -> Document {
    let mut ordered = Document::new();
    ordered.insert(id_field, id);
    for (key, value) in document {
        if key != id_field {
            ordered.insert(key, value);
        }
    }
    ordered
}
