//! Declarative job queries in the MongoDB query dialect.
//!
//! `{ "data.status": "stuck", "options.retries": { "$gte": 3 } }` compiles into a
//! tree of [`Matcher`]s once; evaluating it against a job never re-parses the query.

use std::cmp::Ordering;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::{CombeeError, Result};
use crate::predicate::{Predicate, QueryCompiler};
use crate::types::{FieldValue, JobRecord};

/// The default [`QueryCompiler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchCompiler;

impl QueryCompiler for MatchCompiler {
    fn compile(&self, query: &Document) -> Result<Predicate<JobRecord>> {
        let matcher = Arc::new(Matcher::parse(query)?);
        Ok(Predicate::new(move |job: &JobRecord| matcher.matches(job)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Nor(Vec<Matcher>),
    Field { path: String, condition: Condition },
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    All(Vec<Condition>),
    Eq(Bson),
    Ne(Bson),
    Cmp(Ordering, bool, Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
    Not(Box<Condition>),
}

impl Matcher {
    fn parse(query: &Document) -> Result<Self> {
        query
            .iter()
            .map(|(key, value)| match key.as_str() {
                "$and" => Ok(Matcher::And(Self::parse_clauses(key, value)?)),
                "$or" => Ok(Matcher::Or(Self::parse_clauses(key, value)?)),
                "$nor" => Ok(Matcher::Nor(Self::parse_clauses(key, value)?)),
                op if op.starts_with('$') => {
                    Err(invalid(format!("unknown top-level operator {op}")))
                }
                path => Ok(Matcher::Field {
                    path: path.to_string(),
                    condition: Condition::parse(value)?,
                }),
            })
            .collect::<Result<Vec<_>>>()
            .map(Matcher::And)
    }

    fn parse_clauses(op: &str, value: &Bson) -> Result<Vec<Matcher>> {
        let clauses = match value {
            Bson::Array(clauses) if !clauses.is_empty() => clauses,
            _ => return Err(invalid(format!("{op} expects a non-empty array"))),
        };
        clauses
            .iter()
            .map(|clause| match clause {
                Bson::Document(clause) => Self::parse(clause),
                _ => Err(invalid(format!("{op} clauses must be documents"))),
            })
            .collect()
    }

    fn matches(&self, job: &JobRecord) -> bool {
        match self {
            Matcher::And(all) => all.iter().all(|m| m.matches(job)),
            Matcher::Or(any) => any.iter().any(|m| m.matches(job)),
            Matcher::Nor(none) => !none.iter().any(|m| m.matches(job)),
            Matcher::Field { path, condition } => condition.matches(&job.field(path)),
        }
    }
}

impl Condition {
    fn parse(value: &Bson) -> Result<Self> {
        match value {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => ops
                .iter()
                .map(|(op, operand)| Self::parse_operator(op, operand))
                .collect::<Result<Vec<_>>>()
                .map(Condition::All),
            other => Ok(Condition::Eq(other.clone())),
        }
    }

    fn parse_operator(op: &str, operand: &Bson) -> Result<Self> {
        Ok(match op {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Cmp(Ordering::Greater, false, operand.clone()),
            "$gte" => Condition::Cmp(Ordering::Greater, true, operand.clone()),
            "$lt" => Condition::Cmp(Ordering::Less, false, operand.clone()),
            "$lte" => Condition::Cmp(Ordering::Less, true, operand.clone()),
            "$in" | "$nin" => {
                let Bson::Array(values) = operand else {
                    return Err(invalid(format!("{op} expects an array")));
                };
                if op == "$in" {
                    Condition::In(values.clone())
                } else {
                    Condition::Nin(values.clone())
                }
            }
            "$exists" => match operand {
                Bson::Boolean(exists) => Condition::Exists(*exists),
                Bson::Int32(n) => Condition::Exists(*n != 0),
                Bson::Int64(n) => Condition::Exists(*n != 0),
                _ => return Err(invalid("$exists expects a boolean".to_string())),
            },
            "$not" => match operand {
                Bson::Document(_) => Condition::Not(Box::new(Self::parse(operand)?)),
                _ => return Err(invalid("$not expects an operator document".to_string())),
            },
            _ => return Err(invalid(format!("unknown operator {op}"))),
        })
    }

    fn matches(&self, field: &FieldValue) -> bool {
        match self {
            Condition::All(conditions) => conditions.iter().all(|c| c.matches(field)),
            Condition::Eq(expected) => equals(field, expected),
            Condition::Ne(expected) => !equals(field, expected),
            Condition::Cmp(ordering, inclusive, bound) => any_value(field, |value| {
                compare(value, bound).is_some_and(|o| o == *ordering || (*inclusive && o.is_eq()))
            }),
            Condition::In(values) => values.iter().any(|v| equals(field, v)),
            Condition::Nin(values) => !values.iter().any(|v| equals(field, v)),
            Condition::Exists(exists) => matches!(field, FieldValue::Present(_)) == *exists,
            Condition::Not(condition) => !condition.matches(field),
        }
    }
}

fn invalid(message: String) -> CombeeError {
    CombeeError::InvalidFilter(message)
}

/// Equality with array fields matching when any element matches, and `null`
/// matching a missing field.
fn equals(field: &FieldValue, expected: &Bson) -> bool {
    match field {
        FieldValue::Missing => matches!(expected, Bson::Null),
        FieldValue::Present(value) => {
            let any_item = |items: &[Bson]| items.iter().any(|item| same(item, expected));
            same(value, expected) || matches!(value, Bson::Array(items) if any_item(items))
        }
    }
}

fn any_value(field: &FieldValue, test: impl Fn(&Bson) -> bool) -> bool {
    match field {
        FieldValue::Missing => false,
        FieldValue::Present(Bson::Array(items)) => items.iter().any(&test),
        FieldValue::Present(value) => test(value),
    }
}

fn same(a: &Bson, b: &Bson) -> bool {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

pub(crate) fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Ordering between values of comparable types; `None` when they are not.
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            Some((x.time, x.increment).cmp(&(y.time, y.increment)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::types::Category;

    fn job() -> JobRecord {
        JobRecord {
            id: "j1".to_string(),
            data: Bson::Document(doc! {
                "status": "stuck",
                "attempts": 3,
                "tags": ["urgent", "billing"],
                "customer": { "tier": "gold", "region": null },
                "items": [{ "sku": "a", "qty": 1 }, { "sku": "b", "qty": 4 }],
            }),
            options: doc! { "retries": 2_i64, "priority": 0_i64 },
            status: Category::Waiting,
        }
    }

    fn check(query: Document) -> bool {
        Matcher::parse(&query).unwrap().matches(&job())
    }

    #[test]
    fn implicit_equality() {
        assert!(check(doc! { "data.status": "stuck" }));
        assert!(!check(doc! { "data.status": "done" }));
        assert!(check(doc! { "id": "j1", "status": "waiting" }));
        assert!(check(doc! {}));
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert!(check(doc! { "options.retries": 2 }));
        assert!(check(doc! { "data.attempts": { "$gte": 3_i64, "$lt": 3.5 } }));
        assert!(!check(doc! { "data.attempts": { "$gt": 3 } }));
        assert!(check(doc! { "data.attempts": { "$lte": 3 } }));
    }

    #[test]
    fn set_membership() {
        assert!(check(doc! { "data.status": { "$in": ["stuck", "late"] } }));
        assert!(check(doc! { "data.status": { "$nin": ["done"] } }));
        assert!(check(doc! { "data.tags": "urgent" }));
        assert!(check(doc! { "data.tags": { "$in": ["billing"] } }));
        assert!(!check(doc! { "data.tags": { "$nin": ["billing"] } }));
    }

    #[test]
    fn nested_documents_and_existence() {
        assert!(check(doc! { "data.customer.tier": "gold" }));
        assert!(check(doc! { "data.customer": { "tier": "gold", "region": null } }));
        assert!(check(doc! { "data.customer.region": { "$exists": true } }));
        assert!(check(doc! { "data.customer.zone": { "$exists": false } }));
        assert!(check(doc! { "data.customer.zone": null }));
        assert!(check(doc! { "data.customer.zone": { "$ne": "x" } }));
    }

    #[test]
    fn paths_through_arrays_match_any_element() {
        assert!(check(doc! { "data.items.sku": "b" }));
        assert!(!check(doc! { "data.items.sku": "c" }));
        assert!(check(doc! { "data.items.qty": { "$gt": 3 } }));
        assert!(!check(doc! { "data.items.qty": { "$gt": 4 } }));
        assert!(check(doc! { "data.items.sku": { "$in": ["z", "a"] } }));
        assert!(check(doc! { "data.items.1.sku": "b" }));
        assert!(check(doc! { "data.items.color": { "$exists": false } }));
    }

    #[test]
    fn logical_operators() {
        assert!(check(doc! { "$or": [{ "data.status": "done" }, { "data.attempts": 3 }] }));
        assert!(!check(doc! { "$and": [{ "data.status": "stuck" }, { "data.attempts": 4 }] }));
        assert!(check(doc! { "$nor": [{ "data.status": "done" }] }));
        assert!(check(doc! { "data.attempts": { "$not": { "$gt": 5 } } }));
    }

    #[test]
    fn malformed_queries_are_rejected() {
        for query in [
            doc! { "$where": "true" },
            doc! { "data.status": { "$regex": "st" } },
            doc! { "data.status": { "$in": "stuck" } },
            doc! { "$or": [] },
            doc! { "$and": [1] },
            doc! { "data.x": { "$not": 3 } },
            doc! { "data.x": { "$exists": "yes" } },
        ] {
            assert!(
                matches!(MatchCompiler.compile(&query), Err(CombeeError::InvalidFilter(_))),
                "{query} should be rejected"
            );
        }
    }
}
