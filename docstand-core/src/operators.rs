//! Built-in filter operators.

use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::{
    error::{MongoError, MongoResult},
    matcher::{
        Condition, FieldOperator, FilterMatcher, OperatorRegistry, Predicate, TopLevelOperator,
        equality, is_operator_document, literal_condition, matches_equality,
    },
    value::{as_i64, as_number, as_usize, comparable_types, compare_values, is_truthy},
};


pub(crate) fn register_builtins(registry: &mut OperatorRegistry) {
    registry
        .register(Equal)
        .register(NotEqual)
        .register(Comparison::new("$gt", Ordering::is_gt))
        .register(Comparison::new("$gte", Ordering::is_ge))
        .register(Comparison::new("$lt", Ordering::is_lt))
        .register(Comparison::new("$lte", Ordering::is_le))
        .register(In)
        .register(NotIn)
        .register(Exists)
        .register(Size)
        .register(All)
        .register(Mod)
        .register(Not)
        .register(ElemMatch)
        .register(RegexMatch)
        .register(RegexOptions)
        .register_top_level(Logical::new("$and", Predicate::All))
        .register_top_level(Logical::new("$or", Predicate::Any))
        .register_top_level(Logical::new("$nor", Predicate::Nor))
        .register_top_level(Comment);
}

/// The candidates themselves, followed by the elements of array candidates.
fn expand<'a>(candidates: &'a [&'a Bson]) -> impl Iterator<Item = &'a Bson> + 'a {
    candidates.iter().flat_map(|candidate| {
        let elements = match candidate {
            Bson::Array(items) => items.as_slice(),
            _ => &[],
        };
        std::iter::once(*candidate).chain(elements.iter())
    })
}

/// Pattern condition for a regex literal or a `$regex` operand.
///
/// Strings (and string elements of arrays) match when the pattern finds them;
/// `literal`, when given, also matches stored regex values equal to it.
pub(crate) fn regex_condition(pattern: &str, options: &str, literal: Option<Bson>) -> MongoResult<Condition> {
    let regex = RegexMatch::build(pattern, options)?;
    Ok(Box::new(move |candidates: &[&Bson]| {
        expand(candidates).any(|value| match value {
            Bson::String(text) => regex.is_match(text),
            other => literal.as_ref().is_some_and(|literal| other == literal),
        })
    }))
}

fn array_operand<'a>(token: &str, operand: &'a Bson) -> MongoResult<&'a Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| MongoError::bad_value(format!("{token} needs an array")))
}

#[derive(Debug)]
struct Equal;

impl FieldOperator for Equal {
    fn token(&self) -> &'static str {
        "$eq"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        Ok(equality(operand.clone()))
    }
}

#[derive(Debug)]
struct NotEqual;

impl FieldOperator for NotEqual {
    fn token(&self) -> &'static str {
        "$ne"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let operand = operand.clone();
        Ok(Box::new(move |candidates: &[&Bson]| !matches_equality(candidates, &operand)))
    }
}

/// Ordering operators; values of a different type class never match.
#[derive(Debug)]
struct Comparison {
    token: &'static str,
    accept: fn(Ordering) -> bool,
}

impl Comparison {
    fn new(token: &'static str, accept: fn(Ordering) -> bool) -> Self {
        Self { token, accept }
    }
}

impl FieldOperator for Comparison {
    fn token(&self) -> &'static str {
        self.token
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let operand = operand.clone();
        let accept = self.accept;
        Ok(Box::new(move |candidates: &[&Bson]| {
            expand(candidates)
                .any(|value| comparable_types(value, &operand) && accept(compare_values(value, &operand)))
        }))
    }
}

#[derive(Debug)]
struct In;

impl FieldOperator for In {
    fn token(&self) -> &'static str {
        "$in"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let items = array_operand(self.token(), operand)?
            .iter()
            .map(literal_condition)
            .collect::<MongoResult<Vec<_>>>()?;
        Ok(Box::new(move |candidates: &[&Bson]| {
            items.iter().any(|item| item(candidates))
        }))
    }
}

#[derive(Debug)]
struct NotIn;

impl FieldOperator for NotIn {
    fn token(&self) -> &'static str {
        "$nin"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let items = array_operand(self.token(), operand)?
            .iter()
            .map(literal_condition)
            .collect::<MongoResult<Vec<_>>>()?;
        Ok(Box::new(move |candidates: &[&Bson]| {
            !items.iter().any(|item| item(candidates))
        }))
    }
}

#[derive(Debug)]
struct Exists;

impl FieldOperator for Exists {
    fn token(&self) -> &'static str {
        "$exists"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let wanted = is_truthy(operand);
        Ok(Box::new(move |candidates: &[&Bson]| candidates.is_empty() != wanted))
    }
}

#[derive(Debug)]
struct Size;

impl FieldOperator for Size {
    fn token(&self) -> &'static str {
        "$size"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let size = as_usize(operand).ok_or_else(|| MongoError::bad_value("$size needs a number"))?;
        Ok(Box::new(move |candidates: &[&Bson]| {
            candidates
                .iter()
                .any(|candidate| matches!(candidate, Bson::Array(items) if items.len() == size))
        }))
    }
}

#[derive(Debug)]
struct All;

impl FieldOperator for All {
    fn token(&self) -> &'static str {
        "$all"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let items = array_operand(self.token(), operand)?.clone();
        Ok(Box::new(move |candidates: &[&Bson]| {
            !items.is_empty() && items.iter().all(|item| matches_equality(candidates, item))
        }))
    }
}

#[derive(Debug)]
struct Mod;

impl FieldOperator for Mod {
    fn token(&self) -> &'static str {
        "$mod"
    }

    fn compile(&self, operand: &Bson, _: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let malformed = || MongoError::bad_value("malformed mod, needs to be an array of [divisor, remainder]");
        let (divisor, remainder) = match operand.as_array().map(Vec::as_slice) {
            Some([divisor, remainder]) => (
                as_i64(divisor).ok_or_else(malformed)?,
                as_i64(remainder).ok_or_else(malformed)?,
            ),
            _ => return Err(malformed()),
        };
        if divisor == 0 {
            return Err(MongoError::bad_value("divisor cannot be 0"));
        }

        Ok(Box::new(move |candidates: &[&Bson]| {
            expand(candidates).any(|value| {
                as_number(value).is_some()
                    && as_i64(value).and_then(|n| n.checked_rem(divisor)) == Some(remainder)
            })
        }))
    }
}

#[derive(Debug)]
struct Not;

impl FieldOperator for Not {
    fn token(&self) -> &'static str {
        "$not"
    }

    fn compile(&self, operand: &Bson, _: &Document, matcher: &FilterMatcher) -> MongoResult<Condition> {
        let inner = match operand {
            Bson::Document(expression) if is_operator_document(expression) => {
                matcher.compile_operators(expression)?
            }
            Bson::RegularExpression(_) => literal_condition(operand)?,
            _ => return Err(MongoError::bad_value("$not needs a regex or a document")),
        };
        Ok(Box::new(move |candidates: &[&Bson]| !inner(candidates)))
    }
}

#[derive(Debug)]
struct ElemMatch;

impl FieldOperator for ElemMatch {
    fn token(&self) -> &'static str {
        "$elemMatch"
    }

    fn compile(&self, operand: &Bson, _: &Document, matcher: &FilterMatcher) -> MongoResult<Condition> {
        let Bson::Document(criteria) = operand else {
            return Err(MongoError::bad_value("$elemMatch needs an Object"));
        };

        let test: Box<dyn Fn(&Bson) -> bool + Send + Sync> =
            if is_operator_document(criteria) && matcher.registry().top_level_operator(first_key(criteria)).is_none() {
                let condition = matcher.compile_operators(criteria)?;
                Box::new(move |element: &Bson| condition(&[element]))
            } else {
                let predicate = matcher.compile(criteria)?;
                Box::new(move |element: &Bson| matches!(element, Bson::Document(doc) if predicate.matches(doc)))
            };

        Ok(Box::new(move |candidates: &[&Bson]| {
            candidates.iter().any(|candidate| {
                matches!(candidate, Bson::Array(items) if items.iter().any(|element| test(element)))
            })
        }))
    }
}

fn first_key(document: &Document) -> &str {
    document.keys().next().map(String::as_str).unwrap_or_default()
}

#[derive(Debug)]
struct RegexMatch;

impl RegexMatch {
    fn build(pattern: &str, options: &str) -> MongoResult<Regex> {
        let mut builder = RegexBuilder::new(pattern);
        for flag in options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                // unicode classes are the regex crate's default
                'u' => &mut builder,
                other => {
                    return Err(MongoError::bad_value(format!("invalid flag in regex options: {other}")));
                }
            };
        }
        builder
            .build()
            .map_err(|err| MongoError::bad_value(format!("Regular expression is invalid: {err}")))
    }
}

impl FieldOperator for RegexMatch {
    fn token(&self) -> &'static str {
        "$regex"
    }

    fn compile(&self, operand: &Bson, siblings: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        let (pattern, embedded) = match operand {
            Bson::String(pattern) => (pattern.as_str(), ""),
            Bson::RegularExpression(regex) => (regex.pattern.as_str(), regex.options.as_str()),
            _ => return Err(MongoError::bad_value("$regex has to be a string")),
        };
        let options = match siblings.get("$options") {
            None => embedded,
            Some(Bson::String(options)) if embedded.is_empty() => options.as_str(),
            Some(Bson::String(_)) => {
                return Err(MongoError::bad_value("options set in both $regex and $options"));
            }
            Some(_) => return Err(MongoError::bad_value("$options has to be a string")),
        };

        regex_condition(pattern, options, None)
    }
}

/// `$options` only modifies a sibling `$regex`.
#[derive(Debug)]
struct RegexOptions;

impl FieldOperator for RegexOptions {
    fn token(&self) -> &'static str {
        "$options"
    }

    fn compile(&self, _: &Bson, siblings: &Document, _: &FilterMatcher) -> MongoResult<Condition> {
        if !siblings.contains_key("$regex") {
            return Err(MongoError::bad_value("$options needs a $regex"));
        }
        Ok(Box::new(|_: &[&Bson]| true))
    }
}

/// `$and`, `$or` and `$nor` over a non-empty list of filters.
#[derive(Debug)]
struct Logical {
    token: &'static str,
    combine: fn(Vec<Predicate>) -> Predicate,
}

impl Logical {
    fn new(token: &'static str, combine: fn(Vec<Predicate>) -> Predicate) -> Self {
        Self { token, combine }
    }
}

impl TopLevelOperator for Logical {
    fn token(&self) -> &'static str {
        self.token
    }

    fn compile(&self, operand: &Bson, matcher: &FilterMatcher) -> MongoResult<Predicate> {
        let malformed = || MongoError::bad_value(format!("{} must be a nonempty array", self.token));

        let clauses = operand.as_array().ok_or_else(malformed)?;
        if clauses.is_empty() {
            return Err(malformed());
        }

        let predicates = clauses
            .iter()
            .map(|clause| match clause {
                Bson::Document(filter) => matcher.compile(filter),
                _ => Err(MongoError::bad_value(format!(
                    "{} argument's entries must be objects",
                    self.token
                ))),
            })
            .collect::<MongoResult<Vec<_>>>()?;

        Ok((self.combine)(predicates))
    }
}

#[derive(Debug)]
struct Comment;

impl TopLevelOperator for Comment {
    fn token(&self) -> &'static str {
        "$comment"
    }

    fn compile(&self, operand: &Bson, _: &FilterMatcher) -> MongoResult<Predicate> {
        debug!(comment = %operand, "query comment");
        Ok(Predicate::Always)
    }
}
