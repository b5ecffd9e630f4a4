//! Routing client requests to databases and collections.
//!
//! A transport layer decodes each incoming message into a [`QueryEnvelope`]
//! (or hands over a raw command document) and asks the [`Dispatcher`] for a
//! [`Reply`]. Every fault raised while serving a request becomes an error
//! reply; none escapes to the transport.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docstand::{prelude::*, memory::MemoryBackend};
//!
//! let store = Arc::new(DocumentStore::new(MemoryBackend::new(), StoreConfig::default())?);
//! let dispatcher = Dispatcher::new(store);
//!
//! let reply = dispatcher.handle_command("shop", &doc! {
//!     "insert": "orders",
//!     "documents": [{ "item": "tea", "qty": 2 }],
//! });
//! assert_eq!(reply.to_documents()[0].get_i32("n")?, 1);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use tracing::{debug, warn};

use crate::{
    database::Database,
    error::{ErrorKind, MongoError, MongoResult},
    future::AsyncResult,
    query::{FindOptions, UpdateOptions},
    store::DocumentStore,
    value::{as_usize, is_truthy},
};


/// One statement of an update request.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub filter: Document,
    pub modification: Document,
    pub options: UpdateOptions,
}

/// One statement of a remove request.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveStatement {
    pub filter: Document,
    /// Maximum number of documents to remove; `None` removes every match.
    pub limit: Option<usize>,
}

/// What a request asks for, with its kind-specific payload.
#[derive(Debug, Clone)]
pub enum QueryKind {
    Find {
        filter: Document,
        options: FindOptions,
    },
    Insert {
        documents: Vec<Document>,
        /// Stop at the first failing document instead of trying every one.
        ordered: bool,
    },
    Update {
        statements: Vec<UpdateStatement>,
    },
    Remove {
        statements: Vec<RemoveStatement>,
    },
    /// Any other named command, with its full command document.
    Command {
        name: String,
        body: Document,
    },
}

impl QueryKind {
    pub fn name(&self) -> &str {
        match self {
            QueryKind::Find { .. } => "find",
            QueryKind::Insert { .. } => "insert",
            QueryKind::Update { .. } => "update",
            QueryKind::Remove { .. } => "delete",
            QueryKind::Command { name, .. } => name,
        }
    }
}

/// A decoded client request addressed to a database and collection.
#[derive(Debug, Clone)]
pub struct QueryEnvelope {
    pub database: String,
    /// Target collection; empty for database-level commands.
    pub collection: String,
    pub kind: QueryKind,
}

fn collection_name(command: &str, target: &Bson) -> MongoResult<String> {
    match target {
        Bson::String(name) if !name.is_empty() => Ok(name.clone()),
        Bson::String(_) => Err(MongoError::malformed(format!(
            "Invalid namespace specified for {command}: empty collection name"
        ))),
        other => Err(MongoError::malformed(format!(
            "collection name has invalid type {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        _ => "other",
    }
}

fn optional_document(body: &Document, field: &str) -> MongoResult<Document> {
    match body.get(field) {
        None | Some(Bson::Null) => Ok(Document::new()),
        Some(Bson::Document(document)) => Ok(document.clone()),
        Some(other) => Err(MongoError::malformed(format!(
            "BSON field '{field}' is the wrong type '{}', expected type 'object'",
            type_name(other)
        ))),
    }
}

fn required_document(body: &Document, field: &str) -> MongoResult<Document> {
    match body.get(field) {
        Some(Bson::Document(document)) => Ok(document.clone()),
        Some(other) => Err(MongoError::malformed(format!(
            "BSON field '{field}' is the wrong type '{}', expected type 'object'",
            type_name(other)
        ))),
        None => Err(MongoError::malformed(format!("BSON field '{field}' is missing but a required field"))),
    }
}

fn document_list(body: &Document, field: &str) -> MongoResult<Vec<Document>> {
    let items = match body.get(field) {
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(MongoError::malformed(format!(
                "BSON field '{field}' is the wrong type '{}', expected type 'array'",
                type_name(other)
            )));
        }
        None => return Err(MongoError::malformed(format!("BSON field '{field}' is missing but a required field"))),
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(document) => Ok(document.clone()),
            other => Err(MongoError::malformed(format!(
                "BSON field '{field}' contains an element of type '{}', expected type 'object'",
                type_name(other)
            ))),
        })
        .collect()
}

impl QueryEnvelope {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            kind,
        }
    }

    pub fn find(database: &str, collection: &str, filter: Document, options: FindOptions) -> Self {
        Self::new(database, collection, QueryKind::Find { filter, options })
    }

    pub fn insert(database: &str, collection: &str, documents: Vec<Document>) -> Self {
        Self::new(database, collection, QueryKind::Insert { documents, ordered: true })
    }

    pub fn update(
        database: &str,
        collection: &str,
        filter: Document,
        modification: Document,
        options: UpdateOptions,
    ) -> Self {
        let statement = UpdateStatement { filter, modification, options };
        Self::new(database, collection, QueryKind::Update { statements: vec![statement] })
    }

    pub fn remove(database: &str, collection: &str, filter: Document, limit: Option<usize>) -> Self {
        let statement = RemoveStatement { filter, limit };
        Self::new(database, collection, QueryKind::Remove { statements: vec![statement] })
    }

    /// Decodes a command document such as `{ "insert": "orders", "documents": [...] }`.
    ///
    /// The first field names the command and, for collection-level commands,
    /// the target collection. `insert`, `find`, `update` and `delete` are
    /// decoded into their dedicated kinds; every other command is kept whole
    /// as [`QueryKind::Command`] for the dispatcher to route.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedCommand` fault for empty documents and for fields
    /// of the wrong type, and the query layer's faults for bad find options.
    pub fn from_command(database: &str, command: &Document) -> MongoResult<Self> {
        let Some((name, target)) = command.iter().next() else {
            return Err(MongoError::malformed("empty command document"));
        };

        let kind = match name.as_str() {
            "insert" => QueryKind::Insert {
                documents: document_list(command, "documents")?,
                ordered: command.get("ordered").map(is_truthy).unwrap_or(true),
            },
            "find" => QueryKind::Find {
                filter: optional_document(command, "filter")?,
                options: FindOptions::from_command(command)?,
            },
            "update" => QueryKind::Update {
                statements: document_list(command, "updates")?
                    .iter()
                    .map(|statement| -> MongoResult<UpdateStatement> {
                        Ok(UpdateStatement {
                            filter: required_document(statement, "q")?,
                            modification: required_document(statement, "u")?,
                            options: UpdateOptions {
                                multi: statement.get("multi").map(is_truthy).unwrap_or(false),
                                upsert: statement.get("upsert").map(is_truthy).unwrap_or(false),
                            },
                        })
                    })
                    .collect::<MongoResult<Vec<_>>>()?,
            },
            "delete" => QueryKind::Remove {
                statements: document_list(command, "deletes")?
                    .iter()
                    .map(|statement| -> MongoResult<RemoveStatement> {
                        let limit = match statement.get("limit").map(as_usize) {
                            None | Some(Some(0)) => None,
                            Some(Some(1)) => Some(1),
                            Some(_) => {
                                return Err(MongoError::malformed(
                                    "The limit field in delete objects must be 0 or 1",
                                ));
                            }
                        };
                        Ok(RemoveStatement {
                            filter: required_document(statement, "q")?,
                            limit,
                        })
                    })
                    .collect::<MongoResult<Vec<_>>>()?,
            },
            _ => QueryKind::Command {
                name: name.clone(),
                body: command.clone(),
            },
        };

        let collection = match &kind {
            QueryKind::Command { .. } => target.as_str().unwrap_or_default().to_string(),
            _ => collection_name(name, target)?,
        };

        Ok(Self::new(database, collection, kind))
    }
}

/// The outcome of a write request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Documents inserted, matched (plus upserted) or removed.
    pub n: u64,
    /// Documents changed by updates; `None` for inserts and removes.
    pub modified: Option<u64>,
    /// Statement index and identity of every upserted document.
    pub upserted: Vec<(usize, Bson)>,
    /// Statements that failed, in the order they were attempted.
    pub write_errors: Vec<WriteError>,
}

/// A failed statement of a write batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the statement in the batch.
    pub index: usize,
    pub fault: MongoError,
}

impl WriteError {
    pub fn to_document(&self) -> Document {
        doc! {
            "index": count_value(self.index as u64),
            "code": self.fault.kind().code(),
            "codeName": self.fault.kind().code_name(),
            "errmsg": self.fault.message(),
        }
    }
}

fn count_value(count: u64) -> Bson {
    match i32::try_from(count) {
        Ok(count) => Bson::Int32(count),
        Err(_) => Bson::Int64(i64::try_from(count).unwrap_or(i64::MAX)),
    }
}

impl WriteOutcome {
    pub fn to_document(&self) -> Document {
        let mut document = doc! { "n": count_value(self.n) };
        if let Some(modified) = self.modified {
            document.insert("nModified", count_value(modified));
        }
        if !self.upserted.is_empty() {
            let upserted = self
                .upserted
                .iter()
                .map(|(index, id)| Bson::Document(doc! { "index": count_value(*index as u64), "_id": id.clone() }))
                .collect::<Vec<_>>();
            document.insert("upserted", upserted);
        }
        if !self.write_errors.is_empty() {
            let errors = self
                .write_errors
                .iter()
                .map(|error| Bson::Document(error.to_document()))
                .collect::<Vec<_>>();
            document.insert("writeErrors", errors);
        }
        document.insert("ok", 1.0);
        document
    }

    fn record(&mut self, index: usize, fault: MongoError) {
        debug!(index, code = fault.kind().code(), error = %fault, "write statement failed");
        self.write_errors.push(WriteError { index, fault });
    }
}

/// The response to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Documents returned by a find.
    Documents(Vec<Document>),
    /// Outcome of an insert, update or remove.
    Written(WriteOutcome),
    /// Body of a command reply.
    Command(Document),
    /// The fault that ended the request.
    Error(MongoError),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn fault(&self) -> Option<&MongoError> {
        match self {
            Reply::Error(fault) => Some(fault),
            _ => None,
        }
    }

    /// Statements of a write batch that failed; empty for every other reply.
    pub fn write_errors(&self) -> &[WriteError] {
        match self {
            Reply::Written(outcome) => &outcome.write_errors,
            _ => &[],
        }
    }

    /// Whether the request was refused as an unknown command or operation.
    pub fn is_unsupported(&self) -> bool {
        self.fault()
            .map(|fault| fault.kind() == ErrorKind::UnsupportedOperation)
            .unwrap_or(false)
    }

    /// Renders the documents sent back to the client.
    ///
    /// Command, write and error replies are a single document carrying an `ok`
    /// field; find replies are the found documents themselves.
    pub fn to_documents(&self) -> Vec<Document> {
        match self {
            Reply::Documents(documents) => documents.clone(),
            Reply::Written(outcome) => vec![outcome.to_document()],
            Reply::Command(body) => {
                let mut body = body.clone();
                if !body.contains_key("ok") {
                    body.insert("ok", 1.0);
                }
                vec![body]
            }
            Reply::Error(fault) => vec![fault.to_document()],
        }
    }
}

/// Serves requests against a [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<DocumentStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Serves `query`, turning any fault into an error reply.
    pub fn handle_query(&self, query: QueryEnvelope) -> Reply {
        Self::settle(self.handle_query_async(query))
    }

    /// Serves `query`, returning faults as a failed result.
    pub fn handle_query_async(&self, query: QueryEnvelope) -> AsyncResult<Reply> {
        debug!(
            database = %query.database,
            collection = %query.collection,
            kind = query.kind.name(),
            "dispatching query"
        );
        AsyncResult::wrap(|| self.route(query))
    }

    /// Decodes and serves a command document, turning any fault into an
    /// error reply.
    pub fn handle_command(&self, database: &str, command: &Document) -> Reply {
        Self::settle(self.dispatch_command(database, command))
    }

    /// Decodes and serves a command document; an undecodable command yields
    /// a failed result without touching any collection.
    pub fn dispatch_command(&self, database: &str, command: &Document) -> AsyncResult<Reply> {
        match QueryEnvelope::from_command(database, command) {
            Ok(query) => self.handle_query_async(query),
            Err(fault) => AsyncResult::failed(fault),
        }
    }

    fn settle(result: AsyncResult<Reply>) -> Reply {
        result
            .recover(|fault| {
                if fault.kind().is_client_fault() {
                    debug!(code = fault.kind().code(), error = %fault, "request failed");
                } else {
                    warn!(code = fault.kind().code(), error = %fault, "request failed");
                }
                Reply::Error(fault)
            })
            .into_result()
            .unwrap_or_else(Reply::Error)
    }

    fn route(&self, query: QueryEnvelope) -> MongoResult<Reply> {
        let QueryEnvelope { database, collection, kind } = query;
        let database = self.store.database(&database)?;

        match kind {
            QueryKind::Find { filter, options } => {
                let collection = database.get_or_create_collection(&collection)?;
                let cursor = collection.find(&filter, &options)?;
                Ok(Reply::Documents(cursor.to_vec()))
            }
            QueryKind::Insert { documents, ordered } => {
                let collection = database.get_or_create_collection(&collection)?;
                let mut outcome = WriteOutcome::default();

                for (index, document) in documents.into_iter().enumerate() {
                    match collection.insert(document) {
                        Ok(_) => outcome.n += 1,
                        Err(fault) => {
                            outcome.record(index, fault);
                            if ordered {
                                break;
                            }
                        }
                    }
                }
                Ok(Reply::Written(outcome))
            }
            QueryKind::Update { statements } => {
                let collection = database.get_or_create_collection(&collection)?;
                let mut outcome = WriteOutcome {
                    modified: Some(0),
                    ..WriteOutcome::default()
                };

                for (index, statement) in statements.iter().enumerate() {
                    let updated = match collection.update(&statement.filter, &statement.modification, &statement.options) {
                        Ok(updated) => updated,
                        Err(fault) => {
                            outcome.record(index, fault);
                            break;
                        }
                    };
                    outcome.n += updated.matched;
                    outcome.modified = outcome.modified.map(|modified| modified + updated.modified);
                    if let Some(id) = updated.upserted_id {
                        outcome.n += 1;
                        outcome.upserted.push((index, id));
                    }
                }
                Ok(Reply::Written(outcome))
            }
            QueryKind::Remove { statements } => {
                let collection = database.get_or_create_collection(&collection)?;
                let mut outcome = WriteOutcome::default();
                for (index, statement) in statements.iter().enumerate() {
                    match collection.remove(&statement.filter, statement.limit) {
                        Ok(removed) => outcome.n += removed,
                        Err(fault) => {
                            outcome.record(index, fault);
                            break;
                        }
                    }
                }
                Ok(Reply::Written(outcome))
            }
            QueryKind::Command { name, body } => self.run_command(&database, &collection, &name, &body),
        }
    }

    fn run_command(&self, database: &Database, collection: &str, name: &str, body: &Document) -> MongoResult<Reply> {
        let require_collection = || {
            if collection.is_empty() {
                Err(MongoError::malformed(format!("collection name missing for {name}")))
            } else {
                Ok(collection)
            }
        };

        match name.to_ascii_lowercase().as_str() {
            "ping" => Ok(Reply::Command(Document::new())),
            "count" => {
                let target = database.get_or_create_collection(require_collection()?)?;
                let mut n = target.count(&optional_document(body, "query")?)?;
                if let Some(skip) = body.get("skip").and_then(as_usize) {
                    n = n.saturating_sub(skip as u64);
                }
                if let Some(limit) = body.get("limit").and_then(as_usize).filter(|limit| *limit > 0) {
                    n = n.min(limit as u64);
                }
                Ok(Reply::Command(doc! { "n": count_value(n) }))
            }
            "create" => {
                database.create_collection(require_collection()?)?;
                Ok(Reply::Command(Document::new()))
            }
            "drop" => {
                let target = require_collection()?;
                if !database.drop_collection(target) {
                    return Err(MongoError::new(ErrorKind::NamespaceNotFound, "ns not found"));
                }
                Ok(Reply::Command(doc! {
                    "ns": format!("{}.{target}", database.name()),
                    "nIndexesWas": 1,
                }))
            }
            "listcollections" => {
                let batch = database
                    .collection_names()
                    .into_iter()
                    .map(|name| {
                        Bson::Document(doc! {
                            "name": name,
                            "type": "collection",
                            "options": {},
                            "info": { "readOnly": false },
                        })
                    })
                    .collect::<Vec<_>>();
                Ok(Reply::Command(doc! {
                    "cursor": {
                        "id": 0_i64,
                        "ns": format!("{}.$cmd.listCollections", database.name()),
                        "firstBatch": batch,
                    }
                }))
            }
            "dropdatabase" => {
                self.store.drop_database(database.name());
                Ok(Reply::Command(doc! { "dropped": database.name() }))
            }
            _ => match database.collection(collection) {
                Some(target) if !collection.is_empty() => Ok(Reply::Command(target.handle_command(name, body)?)),
                _ => Err(MongoError::unsupported_operation(name)),
            },
        }
    }
}

/// Asynchronous entry point for transport layers.
///
/// Implementations always produce a reply; faults are rendered as error
/// replies.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn serve(&self, query: QueryEnvelope) -> Reply;

    async fn serve_command(&self, database: &str, command: &Document) -> Reply;
}

#[async_trait]
impl QueryHandler for Dispatcher {
    async fn serve(&self, query: QueryEnvelope) -> Reply {
        match self.handle_query_async(query).await {
            Ok(reply) => reply,
            Err(fault) => Self::settle(AsyncResult::failed(fault)),
        }
    }

    async fn serve_command(&self, database: &str, command: &Document) -> Reply {
        match self.dispatch_command(database, command).await {
            Ok(reply) => reply,
            Err(fault) => Self::settle(AsyncResult::failed(fault)),
        }
    }
}
