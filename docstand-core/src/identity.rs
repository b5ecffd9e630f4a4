//! Identity generation and derivation.
//!
//! Every stored document carries a unique identity in its identity field
//! (`_id` by default). When a document or an upsert selector does not supply a
//! usable identity, one is generated by the store's [`IdentityGenerator`].
//!
//! The generator is an explicit component injected into the store rather than
//! process-wide state, so tests can substitute deterministic generators.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU32, Ordering},
    },
};

use bson::{Bson, oid::ObjectId};
use chrono::{DateTime, Utc};
use rand::Rng;


/// Source of the current time for generators and modifications.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces fresh identity values.
///
/// Implementations must be safe to call from many threads at once and must not
/// hand out the same value twice within a process.
pub trait IdentityGenerator: Send + Sync + Debug {
    fn generate(&self) -> Bson;
}

/// Generates 12-byte object ids: a big-endian seconds timestamp, five random
/// bytes fixed per generator, and a three-byte counter.
///
/// Ids from one generator increase monotonically until the counter wraps, which
/// takes 2^24 ids within a single second.
#[derive(Debug)]
pub struct ObjectIdGenerator {
    clock: Arc<dyn Clock>,
    process: [u8; 5],
    counter: AtomicU32,
}

impl ObjectIdGenerator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a generator reading timestamps from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut rng = rand::thread_rng();
        let mut process = [0u8; 5];
        rng.fill(&mut process);
        let mut seed = [0u8; 4];
        rng.fill(&mut seed);

        Self {
            clock,
            process,
            counter: AtomicU32::new(u32::from_be_bytes(seed) & 0x00ff_ffff),
        }
    }

    pub fn next_object_id(&self) -> ObjectId {
        let seconds = u32::try_from(self.clock.now().timestamp().max(0)).unwrap_or(u32::MAX);
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.process);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);

        ObjectId::from_bytes(bytes)
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGenerator for ObjectIdGenerator {
    fn generate(&self) -> Bson {
        Bson::ObjectId(self.next_object_id())
    }
}

/// Generates random (version 4) UUIDs stored as BSON binary subtype 4.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdentityGenerator for UuidGenerator {
    fn generate(&self) -> Bson {
        bson::Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes()).into()
    }
}

/// Generates consecutive 64-bit integers starting at a seed.
#[derive(Debug)]
pub struct SequentialGenerator {
    next: AtomicI64,
}

impl SequentialGenerator {
    pub fn new(seed: i64) -> Self {
        Self { next: AtomicI64::new(seed) }
    }
}

impl IdentityGenerator for SequentialGenerator {
    fn generate(&self) -> Bson {
        Bson::Int64(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Decides the identity of a document about to be stored.
///
/// Given a candidate (an inserted document, or the selector of an upsert) the
/// identity is:
///
/// - the identity field's value, when it is a plain value;
/// - the first element, when the value is exactly `{ "$in": [first, ...] }`;
/// - the raw operand, when the value is `{ "$in": <not an array> }`;
/// - freshly generated otherwise: the field is absent, `$in` is empty, or any
///   other operator expression is given.
///
/// The candidate is never modified.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use bson::{doc, Bson};
/// use docstand_core::identity::{IdentityDeriver, SequentialGenerator};
///
/// let deriver = IdentityDeriver::new("_id", Arc::new(SequentialGenerator::new(1)));
///
/// assert_eq!(deriver.derive(&doc! { "_id": 7 }), Bson::Int32(7));
/// assert_eq!(deriver.derive(&doc! { "_id": { "$in": [3, 4] } }), Bson::Int32(3));
/// assert_eq!(deriver.derive(&doc! { "name": "x" }), Bson::Int64(1));
/// ```
#[derive(Debug, Clone)]
pub struct IdentityDeriver {
    id_field: String,
    generator: Arc<dyn IdentityGenerator>,
}

impl IdentityDeriver {
    pub fn new(id_field: impl Into<String>, generator: Arc<dyn IdentityGenerator>) -> Self {
        Self {
            id_field: id_field.into(),
            generator,
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn generator(&self) -> &Arc<dyn IdentityGenerator> {
        &self.generator
    }

    /// Derives the identity for `candidate`.
    pub fn derive(&self, candidate: &bson::Document) -> Bson {
        let Some(value) = candidate.get(&self.id_field) else {
            return self.generator.generate();
        };

        let Bson::Document(expression) = value else {
            return value.clone();
        };

        let is_operator_expression =
            !expression.is_empty() && expression.keys().all(|key| key.starts_with('$'));
        if !is_operator_expression {
            return value.clone();
        }

        match expression.get("$in") {
            Some(Bson::Array(items)) if expression.len() == 1 => match items.first() {
                Some(first) => first.clone(),
                None => self.generator.generate(),
            },
            Some(operand) if expression.len() == 1 => operand.clone(),
            _ => self.generator.generate(),
        }
    }
}
