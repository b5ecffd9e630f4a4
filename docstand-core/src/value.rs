//! Value semantics shared by matching, sorting and identity lookup.
//!
//! Numbers compare across their BSON representations (`Int32`, `Int64` and `Double`
//! are one type class, so `2 == 2.0`), embedded documents compare field-wise, and
//! values of different type classes are ordered by the canonical BSON type order:
//!
//! `MinKey < Null < Numbers < Strings < Documents < Arrays < Binary < ObjectId <
//! Boolean < Date < Timestamp < Regex < MaxKey`

use std::cmp::Ordering;

use bson::{Bson, Document};

/// A numeric BSON value normalized for comparison.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Number::Int(value) => value as f64,
            Number::Float(value) => value,
        }
    }

    fn compare(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                // NaN sorts below every other number and equals itself
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                }
            }
        }
    }
}

/// Returns the numeric view of a value, if it is a number.
pub(crate) fn as_number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(value) => Some(Number::Int(i64::from(*value))),
        Bson::Int64(value) => Some(Number::Int(*value)),
        Bson::Double(value) => Some(Number::Float(*value)),
        _ => None,
    }
}

/// Reads a value as a non-negative integer (counts, limits, sizes).
pub fn as_usize(value: &Bson) -> Option<usize> {
    match as_number(value)? {
        Number::Int(value) => usize::try_from(value).ok(),
        Number::Float(value) if value.fract() == 0.0 && value >= 0.0 => Some(value as usize),
        Number::Float(_) => None,
    }
}

/// Reads a value as a signed integer, truncating doubles.
pub fn as_i64(value: &Bson) -> Option<i64> {
    match as_number(value)? {
        Number::Int(value) => Some(value),
        Number::Float(value) if value.is_finite() => Some(value as i64),
        Number::Float(_) => None,
    }
}

/// Truthiness as used by command flags (`multi`, `upsert`, `$exists`, ...).
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Null | Bson::Undefined => false,
        other => match as_number(other) {
            Some(number) => number.as_f64() != 0.0,
            None => true,
        },
    }
}

/// Position of a value's type class in the canonical BSON ordering.
pub fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 15,
        _ => 12,
    }
}

/// Whether two values belong to the same type class, which ordering operators require.
pub fn comparable_types(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b) && !matches!(a, Bson::Null | Bson::Undefined)
}

fn as_text(value: &Bson) -> Option<&str> {
    match value {
        Bson::String(value) | Bson::Symbol(value) => Some(value),
        _ => None,
    }
}

/// Structural equality with numeric coercion.
///
/// Embedded documents are equal when they hold the same fields with equal values,
/// regardless of field order.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    if let (Some(a), Some(b)) = (as_number(a), as_number(b)) {
        return a.compare(b) == Ordering::Equal;
    }

    match (a, b) {
        (Bson::Null | Bson::Undefined, Bson::Null | Bson::Undefined) => true,
        (Bson::Document(a), Bson::Document(b)) => documents_equal(a, b),
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        _ => match (as_text(a), as_text(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
    }
}

/// Field-wise document equality, see [`values_equal`].
pub fn documents_equal(a: &Document, b: &Document) -> bool {
    a.len() == b.len()
        && a.iter().all(|(key, value)| {
            b.get(key)
                .map(|other| values_equal(value, other))
                .unwrap_or(false)
        })
}

/// Total ordering over BSON values, used for sorting and ordering operators.
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    if let (Some(a), Some(b)) = (as_number(a), as_number(b)) {
        return a.compare(b);
    }

    match (a, b) {
        (Bson::Document(a), Bson::Document(b)) => compare_documents(a, b),
        (Bson::Array(a), Bson::Array(b)) => {
            for (a, b) in a.iter().zip(b) {
                let ordering = compare_values(a, b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Bson::Binary(a), Bson::Binary(b)) => a
            .bytes
            .len()
            .cmp(&b.bytes.len())
            .then_with(|| a.bytes.cmp(&b.bytes)),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
        (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
        (Bson::DateTime(a), Bson::DateTime(b)) => a.timestamp_millis().cmp(&b.timestamp_millis()),
        (Bson::Timestamp(a), Bson::Timestamp(b)) => {
            (a.time, a.increment).cmp(&(b.time, b.increment))
        }
        _ => match (as_text(a), as_text(b)) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => Ordering::Equal,
        },
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((key_a, value_a), (key_b, value_b)) in a.iter().zip(b.iter()) {
        let ordering = compare_values(value_a, value_b).then_with(|| key_a.cmp(key_b));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

/// Hashable canonical form of an identity value.
///
/// Two identities produce the same key exactly when [`values_equal`] holds for
/// them, so `1`, `1i64` and `1.0` collide, as do documents that differ only in
/// field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
    ObjectId([u8; 12]),
    Bool(bool),
    DateTime(i64),
    Document(Vec<(String, IdentityKey)>),
    Array(Vec<IdentityKey>),
    Other(String),
}

impl From<&Bson> for IdentityKey {
    fn from(value: &Bson) -> Self {
        if let Some(number) = as_number(value) {
            return match number {
                Number::Int(value) => IdentityKey::Int(value),
                Number::Float(value)
                    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
                {
                    IdentityKey::Int(value as i64)
                }
                Number::Float(value) if value.is_nan() => IdentityKey::Float(f64::NAN.to_bits()),
                Number::Float(value) => IdentityKey::Float(value.to_bits()),
            };
        }

        match value {
            Bson::Null | Bson::Undefined => IdentityKey::Null,
            Bson::String(value) | Bson::Symbol(value) => IdentityKey::Text(value.clone()),
            Bson::ObjectId(value) => IdentityKey::ObjectId(value.bytes()),
            Bson::Boolean(value) => IdentityKey::Bool(*value),
            Bson::DateTime(value) => IdentityKey::DateTime(value.timestamp_millis()),
            Bson::Document(doc) => {
                let mut fields = doc
                    .iter()
                    .map(|(key, value)| (key.clone(), IdentityKey::from(value)))
                    .collect::<Vec<_>>();
                fields.sort_by(|(a, _), (b, _)| a.cmp(b));
                IdentityKey::Document(fields)
            }
            Bson::Array(items) => IdentityKey::Array(items.iter().map(IdentityKey::from).collect()),
            other => IdentityKey::Other(format!("{other:?}")),
        }
    }
}
