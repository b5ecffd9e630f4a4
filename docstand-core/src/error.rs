//! Fault taxonomy and result types for storage and command execution.
//!
//! Every fault a client can provoke is a [`MongoError`] carrying an [`ErrorKind`]
//! and a human-readable message. Faults are values: they are captured where they
//! are detected and turned into reply documents by the dispatcher, never allowed
//! to tear down a connection.

use bson::{Document, doc};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// The kind of a fault, mapped onto the numeric codes a real server reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Insert with an identity already present in the collection.
    DuplicateIdentity,
    /// Update attempted to change the identity of an existing document.
    IdentityImmutable,
    /// Filter used an operator token the matcher does not know.
    UnsupportedOperator,
    /// Query kind or command the dispatcher cannot route.
    UnsupportedOperation,
    /// Structurally invalid command envelope.
    MalformedCommand,
    /// An operand had the wrong shape or value.
    BadValue,
    /// An operand had the wrong type for the target field.
    TypeMismatch,
    /// The identity value itself is not usable (e.g. an array).
    InvalidIdField,
    /// A collection that already exists was created explicitly.
    NamespaceExists,
    /// A collection or database that does not exist was addressed.
    NamespaceNotFound,
    /// Unexpected failure inside the server (e.g. a storage backend failure).
    Internal,
}

impl ErrorKind {
    /// Numeric error code as reported in reply documents.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::DuplicateIdentity => 11000,
            ErrorKind::IdentityImmutable => 66,
            ErrorKind::UnsupportedOperator | ErrorKind::BadValue => 2,
            ErrorKind::UnsupportedOperation => 59,
            ErrorKind::MalformedCommand => 9,
            ErrorKind::TypeMismatch => 14,
            ErrorKind::InvalidIdField => 53,
            ErrorKind::NamespaceExists => 48,
            ErrorKind::NamespaceNotFound => 26,
            ErrorKind::Internal => 1,
        }
    }

    /// Symbolic code name as reported in reply documents.
    pub fn code_name(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateIdentity => "DuplicateKey",
            ErrorKind::IdentityImmutable => "ImmutableField",
            ErrorKind::UnsupportedOperator | ErrorKind::BadValue => "BadValue",
            ErrorKind::UnsupportedOperation => "CommandNotFound",
            ErrorKind::MalformedCommand => "FailedToParse",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::InvalidIdField => "InvalidIdField",
            ErrorKind::NamespaceExists => "NamespaceExists",
            ErrorKind::NamespaceNotFound => "NamespaceNotFound",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// Whether the fault is caused by the client's request rather than the server.
    pub fn is_client_fault(&self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

/// A typed, recoverable fault surfaced to the caller.
///
/// The message must not be empty: constructing a fault without one is a
/// programming error and panics instead of producing a useless reply.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[Error {}] {message}", .kind.code())]
pub struct MongoError {
    kind: ErrorKind,
    message: String,
}

/// A specialized `Result` type for storage and command operations.
pub type MongoResult<T> = Result<T, MongoError>;

impl MongoError {
    /// Creates a fault of the given kind.
    ///
    /// # Panics
    ///
    /// Panics if `message` is empty.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        assert!(!message.is_empty(), "illegal error message: faults need a message");

        Self { kind, message }
    }

    /// Duplicate identity in `namespace`; `key` is the rendered identity value.
    pub fn duplicate_identity(namespace: &str, id_field: &str, key: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::DuplicateIdentity,
            format!(
                "E11000 duplicate key error collection: {namespace} index: {id_field}_ dup key: {{ {id_field}: {key} }}"
            ),
        )
    }

    pub fn identity_immutable(id_field: &str, message: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::IdentityImmutable,
            format!("Performing an update on the path '{id_field}' would modify the immutable field '{id_field}': {message}"),
        )
    }

    pub fn unsupported_operator(token: &str) -> Self {
        Self::new(ErrorKind::UnsupportedOperator, format!("unknown operator: {token}"))
    }

    pub fn unsupported_operation(command: &str) -> Self {
        Self::new(ErrorKind::UnsupportedOperation, format!("no such command: '{command}'"))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedCommand, message)
    }

    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadValue, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The kind of this fault.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message without the code prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Renders the error reply document sent back to the client.
    pub fn to_document(&self) -> Document {
        doc! {
            "$err": self.message.as_str(),
            "errmsg": self.message.as_str(),
            "code": self.kind.code(),
            "codeName": self.kind.code_name(),
            "ok": 0,
        }
    }
}

impl From<SerdeJsonError> for MongoError {
    fn from(err: SerdeJsonError) -> Self {
        MongoError::bad_value(format!("invalid configuration: {err}"))
    }
}
