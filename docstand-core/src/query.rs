//! Options shaping the result of finds and updates.
//!
//! # Query Building
//!
//! Find options can be constructed using the fluent builder API:
//!
//! ```ignore
//! use bson::doc;
//! use docstand_core::query::{FindOptions, SortDirection};
//!
//! let options = FindOptions::builder()
//!     .sort("created_at", SortDirection::Desc)
//!     .skip(10)
//!     .limit(10)
//!     .projection(doc! { "name": 1 })
//!     .build();
//! ```

use std::{cmp::Ordering, sync::Arc};

use bson::{Bson, Document};
use tracing::debug;

use crate::{
    document::{get_path, set_path, split_path},
    error::{MongoError, MongoResult},
    value::{as_i64, as_usize, compare_values, is_truthy},
};


/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort key: which field to sort by and in which direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The dotted field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    /// Parses a sort specification such as `{ "age": -1, "name": 1 }`.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault if a direction is not `1` or `-1`.
    pub fn parse(specification: &Document) -> MongoResult<Vec<Sort>> {
        specification
            .iter()
            .map(|(field, direction)| {
                let direction = match as_i64(direction) {
                    Some(1) => SortDirection::Asc,
                    Some(-1) => SortDirection::Desc,
                    _ => {
                        return Err(MongoError::bad_value(format!(
                            "bad sort specification for field '{field}': {direction}"
                        )));
                    }
                };
                split_path(field)?;
                Ok(Sort { field: field.clone(), direction })
            })
            .collect()
    }
}

/// Sorts documents by the given keys; missing fields sort as null.
///
/// The sort is stable, so documents with equal keys keep their storage order.
pub fn sort_documents(documents: &mut [Arc<Document>], sort: &[Sort]) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        for key in sort {
            let left = get_path(a, &key.field).unwrap_or(&Bson::Null);
            let right = get_path(b, &key.field).unwrap_or(&Bson::Null);
            let ordering = match key.direction {
                SortDirection::Asc => compare_values(left, right),
                SortDirection::Desc => compare_values(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// A validated projection: either only the listed fields, or everything but
/// the listed fields. The identity field is kept unless excluded explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    mode: ProjectionMode,
    fields: Vec<String>,
    id_field: String,
    exclude_id: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectionMode {
    Include,
    Exclude,
}

impl Projection {
    /// Parses a projection document such as `{ "name": 1, "_id": 0 }`.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault when inclusions and exclusions are mixed
    /// (other than excluding the identity field) or a path is invalid.
    pub fn parse(specification: &Document, id_field: &str) -> MongoResult<Self> {
        let mut mode = None;
        let mut fields = Vec::new();
        let mut exclude_id = false;

        for (field, flag) in specification {
            split_path(field)?;
            let include = is_truthy(flag);

            if field == id_field {
                exclude_id = !include;
                continue;
            }

            let field_mode = if include { ProjectionMode::Include } else { ProjectionMode::Exclude };
            match mode {
                Some(existing) if existing != field_mode => {
                    return Err(MongoError::bad_value(
                        "Projection cannot have a mix of inclusion and exclusion.",
                    ));
                }
                _ => mode = Some(field_mode),
            }
            fields.push(field.clone());
        }

        Ok(Self {
            mode: mode.unwrap_or(ProjectionMode::Exclude),
            fields,
            id_field: id_field.to_string(),
            exclude_id,
        })
    }

    /// Returns the projected copy of `document`.
    ///
    /// Paths are followed through embedded documents only; a path that crosses
    /// an array selects nothing.
    pub fn apply(&self, document: &Document) -> Document {
        match self.mode {
            ProjectionMode::Include => {
                let mut projected = Document::new();
                if !self.exclude_id {
                    if let Some(id) = document.get(&self.id_field) {
                        projected.insert(self.id_field.clone(), id.clone());
                    }
                }
                for field in &self.fields {
                    let Some(value) = embedded_field(document, field) else {
                        continue;
                    };
                    if let Err(fault) = set_path(&mut projected, field, value.clone()) {
                        debug!(field = %field, error = %fault, "projection path skipped");
                    }
                }
                projected
            }
            ProjectionMode::Exclude => {
                let mut projected = document.clone();
                if self.exclude_id {
                    projected.remove(&self.id_field);
                }
                for field in &self.fields {
                    remove_embedded_field(&mut projected, field);
                }
                projected
            }
        }
    }
}

fn embedded_field<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let (parents, name) = match path.rsplit_once('.') {
        Some((parents, name)) => (Some(parents), name),
        None => (None, path),
    };
    let mut current = document;
    for segment in parents.into_iter().flat_map(|parents| parents.split('.')) {
        current = current.get_document(segment).ok()?;
    }
    current.get(name)
}

fn remove_embedded_field(document: &mut Document, path: &str) {
    match path.split_once('.') {
        Some((head, rest)) => {
            if let Ok(child) = document.get_document_mut(head) {
                remove_embedded_field(child, rest);
            }
        }
        None => {
            document.remove(path);
        }
    }
}

/// Options for a find: ordering, paging and projection of the matches.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Number of matching documents to skip.
    pub skip: Option<usize>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Sort keys, applied in order.
    pub sort: Vec<Sort>,
    /// Raw projection document, validated when the find runs.
    pub projection: Option<Document>,
}

impl FindOptions {
    /// Creates a new options builder.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::new()
    }

    /// Reads `skip`, `limit`, `sort` and `projection` from a find command body.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault when a field has the wrong type.
    pub fn from_command(body: &Document) -> MongoResult<Self> {
        let mut options = FindOptions::default();

        if let Some(skip) = body.get("skip") {
            options.skip = Some(
                as_usize(skip).ok_or_else(|| MongoError::bad_value("skip value must be non-negative"))?,
            );
        }
        if let Some(limit) = body.get("limit") {
            // a limit of zero means no limit
            match as_usize(limit) {
                Some(0) => {}
                Some(limit) => options.limit = Some(limit),
                None => return Err(MongoError::bad_value("limit value must be non-negative")),
            }
        }
        match body.get("sort") {
            None => {}
            Some(Bson::Document(sort)) => options.sort = Sort::parse(sort)?,
            Some(_) => return Err(MongoError::bad_value("sort must be an object")),
        }
        match body.get("projection") {
            None => {}
            Some(Bson::Document(projection)) => options.projection = Some(projection.clone()),
            Some(_) => return Err(MongoError::bad_value("projection must be an object")),
        }

        Ok(options)
    }
}

/// Fluent builder for [`FindOptions`].
#[derive(Debug, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of matching documents to skip.
    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Appends a sort key.
    ///
    /// # Arguments
    ///
    /// * `field` - The field path to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.options.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// Options for an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first one.
    pub multi: bool,
    /// Insert a document built from the filter when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn multi() -> Self {
        Self { multi: true, upsert: false }
    }

    pub fn upsert() -> Self {
        Self { multi: false, upsert: true }
    }
}

/// What an update did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Matched documents whose content actually changed.
    pub modified: u64,
    /// Identity of the inserted document, when the update upserted.
    pub upserted_id: Option<Bson>,
}
