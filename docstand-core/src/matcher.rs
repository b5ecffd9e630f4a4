//! Filter evaluation.
//!
//! A filter document is compiled once into a [`Predicate`], which can then be
//! evaluated against any number of documents without failing. All faults
//! (unknown operators, malformed operands) surface during compilation.
//!
//! Operators are looked up by token in an [`OperatorRegistry`]. Field-level
//! operators (`$gt`, `$in`, ...) implement [`FieldOperator`]; top-level
//! operators (`$and`, `$or`, ...) implement [`TopLevelOperator`]. Registering a
//! new operator extends every collection built from the same registry without
//! touching any caller.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docstand_core::matcher::FilterMatcher;
//!
//! let matcher = FilterMatcher::default();
//! let document = doc! { "name": "ada", "age": 36, "tags": ["math", "code"] };
//!
//! assert!(matcher.matches(&document, &doc! { "age": { "$gte": 30 } })?);
//! assert!(matcher.matches(&document, &doc! { "tags": "code" })?);
//! assert!(!matcher.matches(&document, &doc! { "$or": [{ "age": 1 }, { "name": "bob" }] })?);
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use bson::{Bson, Document};

use crate::{
    document::{resolve_path, split_path},
    error::{ErrorKind, MongoError, MongoResult},
    operators,
    value::values_equal,
};


/// A compiled test over the values found at one field path.
///
/// The slice holds every value reached by the path (arrays are fanned out by
/// the path walk); an empty slice means the field is missing.
pub type Condition = Box<dyn Fn(&[&Bson]) -> bool + Send + Sync>;

/// An operator applied to a single field, such as `$gt` or `$in`.
pub trait FieldOperator: Send + Sync + fmt::Debug {
    /// The `$`-prefixed token this operator is registered under.
    fn token(&self) -> &'static str;

    /// Compiles the operator's operand into a condition.
    ///
    /// # Arguments
    ///
    /// * `operand` - The value following the token in the filter
    /// * `siblings` - The whole operator document the token appears in, for
    ///   operators that read companion tokens (`$regex` with `$options`)
    /// * `matcher` - The matcher compiling the filter, for operators with
    ///   nested filters (`$not`, `$elemMatch`)
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault when the operand has the wrong shape.
    fn compile(
        &self,
        operand: &Bson,
        siblings: &Document,
        matcher: &FilterMatcher,
    ) -> MongoResult<Condition>;
}

/// An operator appearing at the top level of a filter, such as `$and`.
pub trait TopLevelOperator: Send + Sync + fmt::Debug {
    fn token(&self) -> &'static str;

    fn compile(&self, operand: &Bson, matcher: &FilterMatcher) -> MongoResult<Predicate>;
}

/// Registry of the operators a matcher understands.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    field: HashMap<&'static str, Arc<dyn FieldOperator>>,
    top_level: HashMap<&'static str, Arc<dyn TopLevelOperator>>,
}

impl OperatorRegistry {
    /// A registry with no operators at all; plain equality still works.
    pub fn empty() -> Self {
        Self {
            field: HashMap::new(),
            top_level: HashMap::new(),
        }
    }

    /// A registry holding every built-in operator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        operators::register_builtins(&mut registry);
        registry
    }

    /// Registers a field operator, replacing any operator with the same token.
    pub fn register<O: FieldOperator + 'static>(&mut self, operator: O) -> &mut Self {
        self.field.insert(operator.token(), Arc::new(operator));
        self
    }

    /// Registers a top-level operator, replacing any operator with the same token.
    pub fn register_top_level<O: TopLevelOperator + 'static>(&mut self, operator: O) -> &mut Self {
        self.top_level.insert(operator.token(), Arc::new(operator));
        self
    }

    pub fn field_operator(&self, token: &str) -> Option<&Arc<dyn FieldOperator>> {
        self.field.get(token)
    }

    pub fn top_level_operator(&self, token: &str) -> Option<&Arc<dyn TopLevelOperator>> {
        self.top_level.get(token)
    }

    /// Every registered token, sorted.
    pub fn tokens(&self) -> Vec<&'static str> {
        let mut tokens = self
            .field
            .keys()
            .chain(self.top_level.keys())
            .copied()
            .collect::<Vec<_>>();
        tokens.sort_unstable();
        tokens
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// A compiled filter.
pub enum Predicate {
    /// Matches every document.
    Always,
    /// Matches when every clause matches (an empty list matches everything).
    All(Vec<Predicate>),
    /// Matches when any clause matches.
    Any(Vec<Predicate>),
    /// Matches when no clause matches.
    Nor(Vec<Predicate>),
    /// Tests the values found at a field path.
    Field {
        path: String,
        segments: Vec<String>,
        condition: Condition,
    },
}

impl Predicate {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::All(clauses) => clauses.iter().all(|clause| clause.matches(document)),
            Predicate::Any(clauses) => clauses.iter().any(|clause| clause.matches(document)),
            Predicate::Nor(clauses) => !clauses.iter().any(|clause| clause.matches(document)),
            Predicate::Field {
                segments,
                condition,
                ..
            } => condition(&resolve_path(document, segments)),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("Always"),
            Predicate::All(clauses) => f.debug_tuple("All").field(clauses).finish(),
            Predicate::Any(clauses) => f.debug_tuple("Any").field(clauses).finish(),
            Predicate::Nor(clauses) => f.debug_tuple("Nor").field(clauses).finish(),
            Predicate::Field { path, .. } => f.debug_struct("Field").field("path", path).finish_non_exhaustive(),
        }
    }
}

/// Compiles and evaluates filter documents.
#[derive(Debug, Clone, Default)]
pub struct FilterMatcher {
    registry: Arc<OperatorRegistry>,
}

impl FilterMatcher {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Tests `document` against `filter`.
    ///
    /// An empty filter matches every document.
    ///
    /// # Errors
    ///
    /// Returns an `UnsupportedOperator` fault for unknown operator tokens and a
    /// `BadValue` fault for malformed operands.
    pub fn matches(&self, document: &Document, filter: &Document) -> MongoResult<bool> {
        Ok(self.compile(filter)?.matches(document))
    }

    /// Compiles `filter` into a reusable predicate.
    pub fn compile(&self, filter: &Document) -> MongoResult<Predicate> {
        let mut clauses = Vec::with_capacity(filter.len());

        for (key, value) in filter {
            if key.starts_with('$') {
                let operator = self
                    .registry
                    .top_level_operator(key)
                    .ok_or_else(|| {
                        MongoError::new(
                            ErrorKind::UnsupportedOperator,
                            format!("unknown top level operator: {key}"),
                        )
                    })?;
                clauses.push(operator.compile(value, self)?);
                continue;
            }

            let segments = split_path(key)?
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>();
            clauses.push(Predicate::Field {
                path: key.clone(),
                segments,
                condition: self.compile_value(value)?,
            });
        }

        Ok(match clauses.len() {
            0 => Predicate::Always,
            1 => clauses.pop().unwrap_or(Predicate::Always),
            _ => Predicate::All(clauses),
        })
    }

    /// Compiles the value a field is constrained by: either an operator
    /// document (`{ "$gt": 1, "$lt": 5 }`) or a literal to compare for equality.
    pub fn compile_value(&self, value: &Bson) -> MongoResult<Condition> {
        match value {
            Bson::Document(expression) if is_operator_document(expression) => {
                self.compile_operators(expression)
            }
            literal => literal_condition(literal),
        }
    }

    /// Compiles an operator document whose keys are all operator tokens.
    pub fn compile_operators(&self, expression: &Document) -> MongoResult<Condition> {
        let mut conditions = Vec::with_capacity(expression.len());

        for (token, operand) in expression {
            let operator = self
                .registry
                .field_operator(token)
                .ok_or_else(|| MongoError::unsupported_operator(token))?;
            conditions.push(operator.compile(operand, expression, self)?);
        }

        if conditions.len() == 1 {
            if let Some(condition) = conditions.pop() {
                return Ok(condition);
            }
        }
        Ok(Box::new(move |candidates: &[&Bson]| {
            conditions.iter().all(|condition| condition(candidates))
        }))
    }
}

/// Whether a filter value is an operator document rather than a literal.
///
/// The first key decides, so `{ "$gt": 1, "x": 2 }` is an operator document
/// whose `x` token is rejected as unknown.
pub fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .map(|key| key.starts_with('$'))
        .unwrap_or(false)
}

/// Equality semantics of a literal filter value.
///
/// A candidate matches when it equals the operand or is an array containing an
/// element equal to it. A `null` operand also matches a missing field.
pub fn matches_equality(candidates: &[&Bson], operand: &Bson) -> bool {
    let is_null = |value: &Bson| matches!(value, Bson::Null | Bson::Undefined);

    if is_null(operand) {
        return candidates.is_empty()
            || candidates.iter().any(|candidate| {
                is_null(candidate)
                    || matches!(candidate, Bson::Array(items) if items.iter().any(is_null))
            });
    }

    candidates.iter().any(|candidate| {
        values_equal(candidate, operand)
            || matches!(candidate, Bson::Array(items) if items.iter().any(|item| values_equal(item, operand)))
    })
}

/// Condition for a literal filter value.
///
/// A regex value matches strings by pattern (and stored regexes equal to it);
/// any other value uses [`matches_equality`].
///
/// # Errors
///
/// Returns a `BadValue` fault for an invalid regex pattern or flag.
pub fn literal_condition(value: &Bson) -> MongoResult<Condition> {
    match value {
        Bson::RegularExpression(regex) => {
            operators::regex_condition(regex.pattern.as_str(), regex.options.as_str(), Some(value.clone()))
        }
        literal => Ok(equality(literal.clone())),
    }
}

pub(crate) fn equality(operand: Bson) -> Condition {
    Box::new(move |candidates: &[&Bson]| matches_equality(candidates, &operand))
}
