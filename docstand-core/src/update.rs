//! Applying modifications to stored documents.
//!
//! A modification is either a replacement document (no `$` keys) or a document
//! of update operators such as `{ "$set": { "a": 1 }, "$inc": { "n": 2 } }`.
//! Operators are looked up by token in an [`UpdateRegistry`], so new ones can be
//! registered without touching collections.
//!
//! Modifications never change a stored document's identity: any attempt is
//! rejected with an `IdentityImmutable` fault.

use std::{collections::HashMap, fmt, sync::Arc};

use bson::{Bson, DateTime, Document, Timestamp};

use crate::{
    document::{get_path, remove_path, set_path, split_path, with_identity_first},
    error::{MongoError, MongoResult},
    matcher::{FilterMatcher, is_operator_document},
    value::{Number, as_i64, as_number, compare_values, values_equal},
};


/// Context shared by every operator applied in one modification.
#[derive(Debug)]
pub struct UpdateContext<'a> {
    /// Name of the identity field.
    pub id_field: &'a str,
    /// Whether the modification builds a document being upserted.
    pub is_upsert: bool,
    /// Timestamp used by `$currentDate`.
    pub now: DateTime,
    /// Matcher used by operators with conditions (`$pull`).
    pub matcher: &'a FilterMatcher,
}

/// An update operator such as `$set` or `$inc`.
pub trait UpdateOperator: Send + Sync + fmt::Debug {
    /// The `$`-prefixed token this operator is registered under.
    fn token(&self) -> &'static str;

    /// Applies the operator to one field path of `document`.
    ///
    /// # Arguments
    ///
    /// * `document` - The working copy being modified
    /// * `path` - The dotted path the operator targets
    /// * `operand` - The value given for that path
    /// * `context` - Shared settings for this modification
    ///
    /// # Errors
    ///
    /// Returns `BadValue` or `TypeMismatch` faults for unusable operands or
    /// target values. A failing operator aborts the whole modification.
    fn apply(
        &self,
        document: &mut Document,
        path: &str,
        operand: &Bson,
        context: &UpdateContext<'_>,
    ) -> MongoResult<()>;
}

/// Registry of the update operators a collection understands.
#[derive(Debug, Clone)]
pub struct UpdateRegistry {
    operators: HashMap<&'static str, Arc<dyn UpdateOperator>>,
}

impl UpdateRegistry {
    pub fn empty() -> Self {
        Self { operators: HashMap::new() }
    }

    /// A registry holding every built-in update operator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry
            .register(Set)
            .register(SetOnInsert)
            .register(Unset)
            .register(Arithmetic::new("$inc", ArithmeticKind::Add))
            .register(Arithmetic::new("$mul", ArithmeticKind::Multiply))
            .register(Bound::new("$min", std::cmp::Ordering::Less))
            .register(Bound::new("$max", std::cmp::Ordering::Greater))
            .register(Rename)
            .register(Push)
            .register(AddToSet)
            .register(Pull)
            .register(PullAll)
            .register(Pop)
            .register(CurrentDate);
        registry
    }

    /// Registers an operator, replacing any operator with the same token.
    pub fn register<O: UpdateOperator + 'static>(&mut self, operator: O) -> &mut Self {
        self.operators.insert(operator.token(), Arc::new(operator));
        self
    }

    pub fn get(&self, token: &str) -> Option<&Arc<dyn UpdateOperator>> {
        self.operators.get(token)
    }
}

impl Default for UpdateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Whether a modification is a replacement or a set of operators.
fn is_operator_update(modification: &Document) -> MongoResult<bool> {
    let operators = modification.keys().filter(|key| key.starts_with('$')).count();
    match operators {
        0 => Ok(false),
        n if n == modification.len() => Ok(true),
        _ => Err(MongoError::bad_value(
            "illegal update: cannot mix update operators and replacement fields",
        )),
    }
}

/// Produces modified documents from a modification and a registry.
#[derive(Debug, Clone, Default)]
pub struct Updater {
    registry: Arc<UpdateRegistry>,
    matcher: FilterMatcher,
}

impl Updater {
    pub fn new(registry: Arc<UpdateRegistry>, matcher: FilterMatcher) -> Self {
        Self { registry, matcher }
    }

    /// Whether `modification` consists of update operators only.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault when operators and plain fields are mixed.
    pub fn is_operator_update(&self, modification: &Document) -> MongoResult<bool> {
        is_operator_update(modification)
    }

    /// Computes the modified version of `original`.
    ///
    /// `original` itself is left untouched, so a fault leaves no trace.
    ///
    /// # Arguments
    ///
    /// * `original` - The stored document (or, for an upsert, the document
    ///   built from the filter)
    /// * `modification` - Replacement document or update operators
    /// * `id_field` - The identity field, which may not change
    /// * `is_upsert` - Whether the result will be inserted rather than replace
    ///   a stored document
    ///
    /// # Errors
    ///
    /// - `BadValue` for unknown operators, mixed modifications and bad operands
    /// - `TypeMismatch` for arithmetic on non-numeric values
    /// - `IdentityImmutable` when the identity would change
    pub fn apply(
        &self,
        original: &Document,
        modification: &Document,
        id_field: &str,
        is_upsert: bool,
    ) -> MongoResult<Document> {
        let context = UpdateContext {
            id_field,
            is_upsert,
            now: DateTime::now(),
            matcher: &self.matcher,
        };

        let original_id = original.get(id_field);

        if !is_operator_update(modification)? {
            if let (Some(old), Some(new)) = (original_id, modification.get(id_field)) {
                if !values_equal(old, new) {
                    return Err(MongoError::identity_immutable(
                        id_field,
                        format!("the replacement changes it from {old} to {new}"),
                    ));
                }
            }
            return Ok(match original_id.or_else(|| modification.get(id_field)) {
                Some(id) => with_identity_first(id_field, id.clone(), modification.clone()),
                None => modification.clone(),
            });
        }

        let mut updated = original.clone();
        for (token, fields) in modification {
            let operator = self
                .registry
                .get(token)
                .ok_or_else(|| MongoError::bad_value(format!("Unknown modifier: {token}")))?;
            let Bson::Document(fields) = fields else {
                return Err(MongoError::bad_value(format!(
                    "Modifiers operate on fields but we found type {} instead",
                    type_name(fields)
                )));
            };

            for (path, operand) in fields {
                split_path(path)?;
                operator.apply(&mut updated, path, operand, &context)?;
            }
        }

        match (original_id, updated.get(id_field)) {
            (Some(old), Some(new)) if values_equal(old, new) => Ok(updated),
            (Some(old), new) => Err(MongoError::identity_immutable(
                id_field,
                format!(
                    "it would change from {old} to {}",
                    new.map(ToString::to_string).unwrap_or_else(|| "nothing".into())
                ),
            )),
            (None, _) => Ok(updated),
        }
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
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        _ => "other",
    }
}

fn array_at<'a>(document: &'a mut Document, path: &str, token: &str) -> MongoResult<Option<&'a mut Vec<Bson>>> {
    match get_path_mut(document, path) {
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(other) => Err(MongoError::bad_value(format!(
            "Cannot apply {token} to a non-array value: the field '{path}' is of type {}",
            type_name(other)
        ))),
        None => Ok(None),
    }
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[derive(Debug)]
struct Set;

impl UpdateOperator for Set {
    fn token(&self) -> &'static str {
        "$set"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        set_path(document, path, operand.clone())
    }
}

/// `$set`, but only while building an upserted document.
#[derive(Debug)]
struct SetOnInsert;

impl UpdateOperator for SetOnInsert {
    fn token(&self) -> &'static str {
        "$setOnInsert"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, context: &UpdateContext<'_>) -> MongoResult<()> {
        if context.is_upsert {
            set_path(document, path, operand.clone())?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Unset;

impl UpdateOperator for Unset {
    fn token(&self) -> &'static str {
        "$unset"
    }

    fn apply(&self, document: &mut Document, path: &str, _: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        remove_path(document, path);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ArithmeticKind {
    Add,
    Multiply,
}

/// `$inc` and `$mul`. Integer results stay integers, widening from 32 to
/// 64 bits on overflow; any double operand makes the result a double.
#[derive(Debug)]
struct Arithmetic {
    token: &'static str,
    kind: ArithmeticKind,
}

impl Arithmetic {
    fn new(token: &'static str, kind: ArithmeticKind) -> Self {
        Self { token, kind }
    }

    fn combine(&self, current: &Bson, operand: &Bson) -> Option<Bson> {
        let (a, b) = (as_number(current)?, as_number(operand)?);
        let both_int32 = matches!((current, operand), (Bson::Int32(_), Bson::Int32(_)));

        Some(match (a, b) {
            (Number::Int(a), Number::Int(b)) => {
                let result = match self.kind {
                    ArithmeticKind::Add => a.checked_add(b),
                    ArithmeticKind::Multiply => a.checked_mul(b),
                };
                match result {
                    Some(result) if both_int32 => i32::try_from(result)
                        .map(Bson::Int32)
                        .unwrap_or(Bson::Int64(result)),
                    Some(result) => Bson::Int64(result),
                    None => Bson::Double(self.float(a as f64, b as f64)),
                }
            }
            (a, b) => Bson::Double(self.float(a.as_f64(), b.as_f64())),
        })
    }

    fn float(&self, a: f64, b: f64) -> f64 {
        match self.kind {
            ArithmeticKind::Add => a + b,
            ArithmeticKind::Multiply => a * b,
        }
    }
}

impl UpdateOperator for Arithmetic {
    fn token(&self) -> &'static str {
        self.token
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        if as_number(operand).is_none() {
            return Err(MongoError::type_mismatch(format!(
                "Cannot {} with non-numeric argument: {{{path}: {operand}}}",
                match self.kind {
                    ArithmeticKind::Add => "increment",
                    ArithmeticKind::Multiply => "multiply",
                }
            )));
        }

        let updated = match get_path(document, path) {
            None => match self.kind {
                ArithmeticKind::Add => operand.clone(),
                ArithmeticKind::Multiply => match operand {
                    Bson::Int32(_) => Bson::Int32(0),
                    Bson::Int64(_) => Bson::Int64(0),
                    _ => Bson::Double(0.0),
                },
            },
            Some(current) => self.combine(current, operand).ok_or_else(|| {
                MongoError::type_mismatch(format!(
                    "Cannot apply {} to a value of non-numeric type. {{{path}: {current}}}",
                    self.token
                ))
            })?,
        };

        set_path(document, path, updated)
    }
}

/// `$min` and `$max`: replace the value when the operand orders before
/// (respectively after) it.
#[derive(Debug)]
struct Bound {
    token: &'static str,
    replace_when: std::cmp::Ordering,
}

impl Bound {
    fn new(token: &'static str, replace_when: std::cmp::Ordering) -> Self {
        Self { token, replace_when }
    }
}

impl UpdateOperator for Bound {
    fn token(&self) -> &'static str {
        self.token
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        let replace = match get_path(document, path) {
            None => true,
            Some(current) => compare_values(operand, current) == self.replace_when,
        };
        if replace {
            set_path(document, path, operand.clone())?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Rename;

impl UpdateOperator for Rename {
    fn token(&self) -> &'static str {
        "$rename"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        let target = operand
            .as_str()
            .ok_or_else(|| MongoError::bad_value(format!("The 'to' field for $rename must be a string: {path}: {operand}")))?;
        split_path(target)?;
        if target == path {
            return Err(MongoError::bad_value(format!(
                "The source and target field for $rename must differ: {path}: {operand}"
            )));
        }

        if let Some(value) = remove_path(document, path) {
            set_path(document, target, value)?;
        }
        Ok(())
    }
}

/// The elements to add for `$push`/`$addToSet`: the operand itself, or the
/// elements of `{ "$each": [...] }`.
fn elements_to_add(token: &str, operand: &Bson) -> MongoResult<Vec<Bson>> {
    match operand {
        Bson::Document(modifiers) if is_operator_document(modifiers) => {
            for key in modifiers.keys() {
                if key != "$each" {
                    return Err(MongoError::bad_value(format!("Unrecognized clause in {token}: {key}")));
                }
            }
            match modifiers.get("$each") {
                Some(Bson::Array(items)) => Ok(items.clone()),
                _ => Err(MongoError::bad_value(format!(
                    "The argument to $each in {token} must be an array"
                ))),
            }
        }
        other => Ok(vec![other.clone()]),
    }
}

#[derive(Debug)]
struct Push;

impl UpdateOperator for Push {
    fn token(&self) -> &'static str {
        "$push"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        let elements = elements_to_add(self.token(), operand)?;
        match array_at(document, path, self.token())? {
            Some(items) => items.extend(elements),
            None => set_path(document, path, Bson::Array(elements))?,
        }
        Ok(())
    }
}

#[derive(Debug)]
struct AddToSet;

impl UpdateOperator for AddToSet {
    fn token(&self) -> &'static str {
        "$addToSet"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        let elements = elements_to_add(self.token(), operand)?;

        let mut unique: Vec<Bson> = Vec::with_capacity(elements.len());
        for element in elements {
            if !unique.iter().any(|existing| values_equal(existing, &element)) {
                unique.push(element);
            }
        }

        match array_at(document, path, self.token())? {
            Some(items) => {
                for element in unique {
                    if !items.iter().any(|existing| values_equal(existing, &element)) {
                        items.push(element);
                    }
                }
            }
            None => set_path(document, path, Bson::Array(unique))?,
        }
        Ok(())
    }
}

/// Removes elements equal to the operand, or matching it when the operand is
/// a condition (`{ "$gte": 6 }`) or a filter over embedded documents.
#[derive(Debug)]
struct Pull;

impl UpdateOperator for Pull {
    fn token(&self) -> &'static str {
        "$pull"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, context: &UpdateContext<'_>) -> MongoResult<()> {
        let test: Box<dyn Fn(&Bson) -> bool> = match operand {
            Bson::Document(criteria) if is_operator_document(criteria) => {
                let condition = context.matcher.compile_operators(criteria)?;
                Box::new(move |element: &Bson| condition(&[element]))
            }
            Bson::Document(criteria) => {
                let predicate = context.matcher.compile(criteria)?;
                Box::new(move |element: &Bson| {
                    matches!(element, Bson::Document(doc) if predicate.matches(doc))
                })
            }
            literal => {
                let literal = literal.clone();
                Box::new(move |element: &Bson| values_equal(element, &literal))
            }
        };

        if let Some(items) = array_at(document, path, self.token())? {
            items.retain(|element| !test(element));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PullAll;

impl UpdateOperator for PullAll {
    fn token(&self) -> &'static str {
        "$pullAll"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        let Bson::Array(removed) = operand else {
            return Err(MongoError::bad_value(format!(
                "$pullAll requires an array argument but was given a {}",
                type_name(operand)
            )));
        };

        if let Some(items) = array_at(document, path, self.token())? {
            items.retain(|element| !removed.iter().any(|value| values_equal(element, value)));
        }
        Ok(())
    }
}

/// Removes the last element (`1`) or the first element (`-1`).
#[derive(Debug)]
struct Pop;

impl UpdateOperator for Pop {
    fn token(&self) -> &'static str {
        "$pop"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, _: &UpdateContext<'_>) -> MongoResult<()> {
        let from_front = match as_i64(operand) {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(MongoError::bad_value(format!("$pop expects 1 or -1, found: {operand}"))),
        };

        if let Some(items) = array_at(document, path, self.token())? {
            if from_front {
                if !items.is_empty() {
                    items.remove(0);
                }
            } else {
                items.pop();
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CurrentDate;

impl UpdateOperator for CurrentDate {
    fn token(&self) -> &'static str {
        "$currentDate"
    }

    fn apply(&self, document: &mut Document, path: &str, operand: &Bson, context: &UpdateContext<'_>) -> MongoResult<()> {
        let value = match operand {
            Bson::Boolean(true) => Bson::DateTime(context.now),
            Bson::Document(spec) => match spec.get("$type").and_then(Bson::as_str) {
                Some("date") => Bson::DateTime(context.now),
                Some("timestamp") => Bson::Timestamp(Timestamp {
                    time: u32::try_from(context.now.timestamp_millis() / 1000).unwrap_or(u32::MAX),
                    increment: 1,
                }),
                _ => return Err(MongoError::bad_value("The '$type' string field is required to be 'date' or 'timestamp'")),
            },
            _ => {
                return Err(MongoError::bad_value(format!(
                    "{path} is not valid type for $currentDate. Please use a boolean ('true') or a $type expression ({{$type: 'timestamp/date'}})."
                )));
            }
        };
        set_path(document, path, value)
    }
}
