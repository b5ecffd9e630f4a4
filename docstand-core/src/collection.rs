//! The collection implementation shared by every storage backend.
//!
//! [`StandardCollection`] implements the full [`CollectionBackend`] contract on
//! top of any [`DocumentStorage`]: identity derivation, duplicate detection,
//! filtering, all-or-nothing updates and upserts. A backend only has to
//! provide keyed storage.
//!
//! # Concurrency
//!
//! Each collection guards its storage with a read-write lock. Writes hold the
//! write lock for their whole duration, so concurrent writes to one collection
//! are serialized and an update's matching and writing happen atomically.
//! Finds hold the read lock only long enough to copy a snapshot of document
//! handles; the returned [`Cursor`] never observes later writes.

use std::sync::Arc;

use bson::{Bson, Document};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{
    backend::{CollectionBackend, DocumentStorage},
    document::{set_path, with_identity_first},
    error::{ErrorKind, MongoError, MongoResult},
    identity::IdentityDeriver,
    matcher::{FilterMatcher, Predicate, is_operator_document},
    query::{FindOptions, Projection, UpdateOptions, UpdateOutcome, sort_documents},
    update::Updater,
    value::IdentityKey,
};


/// Everything a collection needs besides its storage.
#[derive(Debug, Clone)]
pub struct CollectionContext {
    /// Name of the owning database.
    pub database: String,
    /// Name of the collection.
    pub name: String,
    /// Decides identities of inserted and upserted documents.
    pub deriver: IdentityDeriver,
    /// Compiles filters.
    pub matcher: FilterMatcher,
    /// Applies modifications.
    pub updater: Updater,
}

impl CollectionContext {
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub fn id_field(&self) -> &str {
        self.deriver.id_field()
    }
}

/// A lazily filtered, restartable view over a snapshot of a collection.
///
/// Every call to [`iter`](Cursor::iter) starts again from the first match.
///
/// # Example
///
/// ```ignore
/// let cursor = collection.find(&doc! { "age": { "$gt": 18 } }, &FindOptions::default())?;
///
/// for document in cursor.iter() {
///     println!("{document}");
/// }
/// assert_eq!(cursor.count(), cursor.iter().count());
/// ```
#[derive(Debug, Clone)]
pub struct Cursor {
    documents: Arc<Vec<Arc<Document>>>,
    predicate: Arc<Predicate>,
    projection: Option<Projection>,
    skip: usize,
    limit: Option<usize>,
}

impl Cursor {
    fn new(
        documents: Vec<Arc<Document>>,
        predicate: Predicate,
        projection: Option<Projection>,
        options: &FindOptions,
    ) -> Self {
        Self {
            documents: Arc::new(documents),
            predicate: Arc::new(predicate),
            projection,
            skip: options.skip.unwrap_or(0),
            limit: options.limit,
        }
    }

    /// An empty cursor.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Predicate::Always, None, &FindOptions::default())
    }

    fn matching(&self) -> impl Iterator<Item = &Arc<Document>> + '_ {
        self.documents
            .iter()
            .filter(|document| self.predicate.matches(document))
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
    }

    /// Iterates the matching documents from the start.
    pub fn iter(&self) -> impl Iterator<Item = Document> + '_ {
        self.matching().map(|document| match &self.projection {
            Some(projection) => projection.apply(document),
            None => Document::clone(document),
        })
    }

    /// Number of documents the cursor yields.
    pub fn count(&self) -> usize {
        self.matching().count()
    }

    pub fn is_empty(&self) -> bool {
        self.matching().next().is_none()
    }

    /// Collects every matching document.
    pub fn to_vec(&self) -> Vec<Document> {
        self.iter().collect()
    }
}

impl IntoIterator for &Cursor {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.to_vec().into_iter()
    }
}

/// Builds the base document of an upsert from the plain equality fields of
/// its filter; operator expressions and top-level operators are skipped.
fn document_from_filter(filter: &Document) -> MongoResult<Document> {
    let mut document = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        if let Bson::Document(expression) = value {
            if is_operator_document(expression) {
                continue;
            }
        }
        set_path(&mut document, key, value.clone())?;
    }
    Ok(document)
}

/// The collection implementation shared by every backend.
#[derive(Debug)]
pub struct StandardCollection<S: DocumentStorage> {
    context: CollectionContext,
    storage: RwLock<S>,
}

impl<S: DocumentStorage> StandardCollection<S> {
    pub fn new(context: CollectionContext, storage: S) -> Self {
        Self {
            context,
            storage: RwLock::new(storage),
        }
    }

    pub fn context(&self) -> &CollectionContext {
        &self.context
    }

    fn key_of(&self, document: &Document) -> IdentityKey {
        IdentityKey::from(document.get(self.context.id_field()).unwrap_or(&Bson::Null))
    }

    fn validate_identity(&self, id: &Bson) -> MongoResult<()> {
        if matches!(id, Bson::Array(_)) {
            return Err(MongoError::new(
                ErrorKind::InvalidIdField,
                format!("can't use an array for {}", self.context.id_field()),
            ));
        }
        Ok(())
    }

    /// Puts a new document into storage under its identity.
    fn store_new(&self, storage: &mut S, id: &Bson, document: Document) -> MongoResult<()> {
        let key = IdentityKey::from(id);
        if storage.contains(&key) {
            return Err(MongoError::duplicate_identity(
                &self.context.namespace(),
                self.context.id_field(),
                id,
            ));
        }
        storage.insert(key, Arc::new(document));
        Ok(())
    }

    /// The documents a filter could match: a direct lookup when the filter
    /// pins the identity to a plain value, every document otherwise.
    fn candidates(&self, storage: &S, filter: &Document) -> Vec<Arc<Document>> {
        if filter.len() == 1 {
            if let Some(id) = filter.get(self.context.id_field()) {
                let plain = match id {
                    Bson::Document(expression) => !is_operator_document(expression),
                    Bson::Null | Bson::Undefined | Bson::Array(_) | Bson::RegularExpression(_) => false,
                    _ => true,
                };
                if plain {
                    return storage.get(&IdentityKey::from(id)).into_iter().collect();
                }
            }
        }
        storage.snapshot()
    }

    fn upsert(&self, storage: &mut S, filter: &Document, modification: &Document) -> MongoResult<Bson> {
        let base = document_from_filter(filter)?;
        let id_field = self.context.id_field();
        let document = self.context.updater.apply(&base, modification, id_field, true)?;

        let id = match document.get(id_field) {
            Some(id) => id.clone(),
            None => self.context.deriver.derive(filter),
        };
        self.validate_identity(&id)?;

        let document = with_identity_first(id_field, id.clone(), document);
        self.store_new(storage, &id, document)?;
        Ok(id)
    }
}

impl<S: DocumentStorage> CollectionBackend for StandardCollection<S> {
    fn database_name(&self) -> &str {
        &self.context.database
    }

    fn name(&self) -> &str {
        &self.context.name
    }

    fn id_field(&self) -> &str {
        self.context.id_field()
    }

    fn insert(&self, document: Document) -> MongoResult<Bson> {
        if let Some(key) = document.keys().find(|key| key.starts_with('$')) {
            return Err(MongoError::bad_value(format!(
                "Document can't have $ prefixed field names: {key}"
            )));
        }

        let id = self.context.deriver.derive(&document);
        self.validate_identity(&id)?;
        let document = with_identity_first(self.context.id_field(), id.clone(), document);

        let mut storage = self.storage.write();
        self.store_new(&mut storage, &id, document)?;

        trace!(namespace = %self.context.namespace(), id = %id, "inserted document");
        Ok(id)
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> MongoResult<Cursor> {
        let predicate = self.context.matcher.compile(filter)?;
        let projection = options
            .projection
            .as_ref()
            .map(|projection| Projection::parse(projection, self.context.id_field()))
            .transpose()?;

        let documents = self.candidates(&self.storage.read(), filter);

        if options.sort.is_empty() {
            return Ok(Cursor::new(documents, predicate, projection, options));
        }

        let mut matching = documents
            .into_iter()
            .filter(|document| predicate.matches(document))
            .collect::<Vec<_>>();
        sort_documents(&mut matching, &options.sort);
        Ok(Cursor::new(matching, Predicate::Always, projection, options))
    }

    fn update(
        &self,
        filter: &Document,
        modification: &Document,
        options: &UpdateOptions,
    ) -> MongoResult<UpdateOutcome> {
        let predicate = self.context.matcher.compile(filter)?;
        let is_operator_update = self.context.updater.is_operator_update(modification)?;
        if options.multi && !is_operator_update {
            return Err(MongoError::bad_value("multi update only works with $ operators"));
        }

        let id_field = self.context.id_field();
        let mut storage = self.storage.write();

        let matches = self
            .candidates(&storage, filter)
            .into_iter()
            .filter(|document| predicate.matches(document))
            .take(if options.multi { usize::MAX } else { 1 })
            .collect::<Vec<_>>();

        let mut outcome = UpdateOutcome {
            matched: matches.len() as u64,
            ..UpdateOutcome::default()
        };

        // compute every new version before writing any of them
        let mut staged = Vec::with_capacity(matches.len());
        for original in &matches {
            let updated = self.context.updater.apply(original, modification, id_field, false)?;
            if updated != **original {
                staged.push((self.key_of(original), updated));
            }
        }

        for (key, updated) in staged {
            storage.replace(&key, Arc::new(updated));
            outcome.modified += 1;
        }

        if matches.is_empty() && options.upsert {
            outcome.upserted_id = Some(self.upsert(&mut storage, filter, modification)?);
        }

        debug!(
            namespace = %self.context.namespace(),
            matched = outcome.matched,
            modified = outcome.modified,
            upserted = outcome.upserted_id.is_some(),
            "applied update"
        );
        Ok(outcome)
    }

    fn remove(&self, filter: &Document, limit: Option<usize>) -> MongoResult<u64> {
        let predicate = self.context.matcher.compile(filter)?;
        let mut storage = self.storage.write();

        let keys = self
            .candidates(&storage, filter)
            .into_iter()
            .filter(|document| predicate.matches(document))
            .take(limit.unwrap_or(usize::MAX))
            .map(|document| self.key_of(&document))
            .collect::<Vec<_>>();

        let removed = keys
            .iter()
            .filter(|key| storage.remove(key).is_some())
            .count() as u64;

        debug!(namespace = %self.context.namespace(), removed, "removed documents");
        Ok(removed)
    }

    fn count(&self, filter: &Document) -> MongoResult<u64> {
        let predicate = self.context.matcher.compile(filter)?;
        let storage = self.storage.read();

        if filter.is_empty() {
            return Ok(storage.len() as u64);
        }

        Ok(self
            .candidates(&storage, filter)
            .iter()
            .filter(|document| predicate.matches(document))
            .count() as u64)
    }

    fn len(&self) -> usize {
        self.storage.read().len()
    }

    fn clear(&self) {
        self.storage.write().clear();
    }
}
