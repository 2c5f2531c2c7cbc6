//! Selector evaluation against JSON documents.
//!
//! Values are compared using CouchDB collation: `null` sorts before booleans,
//! booleans before numbers, numbers before strings, strings before arrays and
//! arrays before objects. Arrays compare element-wise, objects key by key in
//! order.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use couchlayer_core::{
    error::{DriverError, DriverResult},
    find::{Expr, FieldOp, FieldPath, QueryVisitor, SortDirection, SortField},
};

/// Comparable view of a JSON value under CouchDB collation.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    /// Integers and floats normalized to f64
    Number(f64),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(Vec<(&'a str, Comparable<'a>)>),
}

impl<'a> From<&'a Value> for Comparable<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null => Comparable::Null,
            Value::Bool(value) => Comparable::Bool(*value),
            Value::Number(value) => Comparable::Number(value.as_f64().unwrap_or(f64::NAN)),
            Value::String(value) => Comparable::String(value),
            Value::Array(array) => Comparable::Array(
                array
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Value::Object(map) => Comparable::Map(
                map
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<Vec<_>>()
            ),
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Bool(_) => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Map(_) => 5,
        }
    }
}

impl Ord for Comparable<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Array(a), Comparable::Array(b)) => a.cmp(b),
            (Comparable::Map(a), Comparable::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Comparable<'_> {}

/// Collates two JSON values.
pub(crate) fn collate(a: &Value, b: &Value) -> Ordering {
    Comparable::from(a).cmp(&Comparable::from(b))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn contains(values: &[Value], needle: &Value) -> bool {
    values.iter().any(|value| collate(value, needle) == Ordering::Equal)
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Value,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DriverResult<bool> {
        self.visit_expr(expr)
    }

    fn compare(field: &Value, op: FieldOp, value: &Value) -> bool {
        match op {
            FieldOp::Eq => collate(field, value) == Ordering::Equal,
            FieldOp::Ne => collate(field, value) != Ordering::Equal,
            FieldOp::Gt => collate(field, value) == Ordering::Greater,
            FieldOp::Gte => collate(field, value) != Ordering::Less,
            FieldOp::Lt => collate(field, value) == Ordering::Less,
            FieldOp::Lte => collate(field, value) != Ordering::Greater,
            FieldOp::In => {
                let candidates = value.as_array().map(Vec::as_slice).unwrap_or_default();
                match field {
                    Value::Array(items) => items.iter().any(|item| contains(candidates, item)),
                    _ => contains(candidates, field),
                }
            }
            FieldOp::Nin => !Self::compare(field, FieldOp::In, value),
            FieldOp::Type => value.as_str() == Some(type_name(field)),
            FieldOp::Size => match (field, value.as_u64()) {
                (Value::Array(items), Some(size)) => items.len() as u64 == size,
                _ => false,
            },
            FieldOp::All => match (field, value.as_array()) {
                (Value::Array(items), Some(required)) => required.iter().all(|needle| contains(items, needle)),
                _ => false,
            },
            FieldOp::Mod => {
                let args = value.as_array().map(Vec::as_slice).unwrap_or_default();
                match (field.as_i64(), args) {
                    (Some(n), [divisor, remainder]) => match (divisor.as_i64(), remainder.as_i64()) {
                        (Some(divisor), Some(remainder)) if divisor != 0 => n % divisor == remainder,
                        _ => false,
                    },
                    _ => false,
                }
            }
            FieldOp::Exists => true,
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DriverError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_or(exprs)?)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_field(&mut self, path: &FieldPath, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        Ok(match (path.resolve(self.document), op) {
            (field, FieldOp::Exists) => field.is_some() == value.as_bool().unwrap_or(true),
            // A missing field only satisfies `$exists: false`.
            (None, _) => false,
            (Some(field), op) => Self::compare(field, op, value),
        })
    }

    fn visit_elem_match(&mut self, path: &FieldPath, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match path.resolve(self.document) {
            Some(Value::Array(items)) => {
                for item in items {
                    if DocumentEvaluator::new(item).evaluate(expr)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn visit_all_match(&mut self, path: &FieldPath, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match path.resolve(self.document) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    if !DocumentEvaluator::new(item).evaluate(expr)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Orders two documents by a sort specification. Documents missing a sort
/// field sort before those that have it.
pub(crate) fn compare_documents(a: &Value, b: &Value, sort: &[(FieldPath, SortDirection)]) -> Ordering {
    for (path, direction) in sort {
        let ordering = match (path.resolve(a), path.resolve(b)) {
            (Some(a), Some(b)) => collate(a, b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        };
        let ordering = match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Resolves sort fields to paths once per query.
pub(crate) fn sort_keys(sort: &[SortField]) -> Vec<(FieldPath, SortDirection)> {
    sort.iter().map(|field| (field.path(), field.direction)).collect()
}

/// Keeps only the given fields of a document, preserving their nesting.
pub(crate) fn project(document: &Value, fields: &[FieldPath]) -> Value {
    let mut projected = Map::new();

    for path in fields {
        if let Some(value) = path.resolve(document) {
            insert_path(&mut projected, path.segments(), value.clone());
        }
    }

    Value::Object(projected)
}

fn insert_path(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let entry = target
                .entry(first.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                insert_path(map, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matches(document: Value, selector: Value) -> bool {
        let expr = Expr::parse_selector(&selector).unwrap();
        DocumentEvaluator::new(&document).evaluate(&expr).unwrap()
    }

    #[test]
    fn collation_orders_types() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!("a"),
            json!("b"),
            json!([1]),
            json!([1, 2]),
            json!({ "a": 1 }),
        ];

        for pair in ordered.windows(2) {
            assert_eq!(collate(&pair[0], &pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(collate(&json!(1), &json!(1.0)), Ordering::Equal);
    }

    #[test]
    fn comparisons_and_combinators() {
        let doc = json!({ "name": "cow", "age": 4, "tags": ["farm", "milk"], "owner": { "name": "bob" } });

        assert!(matches(doc.clone(), json!({ "name": "cow" })));
        assert!(matches(doc.clone(), json!({ "age": { "$gt": 3, "$lte": 4 } })));
        assert!(matches(doc.clone(), json!({ "owner.name": "bob" })));
        assert!(matches(doc.clone(), json!({ "owner": { "name": "bob" } })));
        assert!(matches(doc.clone(), json!({ "$or": [{ "age": 1 }, { "name": "cow" }] })));
        assert!(matches(doc.clone(), json!({ "$nor": [{ "age": 1 }, { "name": "pig" }] })));
        assert!(matches(doc.clone(), json!({ "age": { "$not": { "$eq": 5 } } })));
        assert!(!matches(doc.clone(), json!({ "name": "cow", "age": 5 })));
        assert!(matches(doc, json!({})));
    }

    #[test]
    fn missing_fields_only_match_exists_false() {
        let doc = json!({ "a": 1 });

        assert!(matches(doc.clone(), json!({ "b": { "$exists": false } })));
        assert!(!matches(doc.clone(), json!({ "b": { "$ne": 1 } })));
        assert!(!matches(doc.clone(), json!({ "b": { "$nin": [1] } })));
        assert!(matches(doc, json!({ "a": { "$exists": true } })));
    }

    #[test]
    fn array_operators() {
        let doc = json!({ "tags": ["farm", "milk"], "scores": [3, 8], "n": 10 });

        assert!(matches(doc.clone(), json!({ "tags": { "$in": ["milk", "wool"] } })));
        assert!(matches(doc.clone(), json!({ "tags": { "$nin": ["wool"] } })));
        assert!(matches(doc.clone(), json!({ "tags": { "$all": ["milk", "farm"] } })));
        assert!(matches(doc.clone(), json!({ "tags": { "$size": 2 } })));
        assert!(matches(doc.clone(), json!({ "scores": { "$elemMatch": { "$gt": 5 } } })));
        assert!(!matches(doc.clone(), json!({ "scores": { "$allMatch": { "$gt": 5 } } })));
        assert!(matches(doc.clone(), json!({ "n": { "$mod": [3, 1] } })));
        assert!(matches(doc.clone(), json!({ "tags": { "$type": "array" } })));
        assert!(!matches(doc, json!({ "n": { "$type": "string" } })));
    }

    #[test]
    fn sorts_with_missing_fields_first() {
        let sort = sort_keys(&[SortField::new("age", SortDirection::Asc)]);
        let (young, old, unknown) = (json!({ "age": 1 }), json!({ "age": 9 }), json!({}));

        assert_eq!(compare_documents(&young, &old, &sort), Ordering::Less);
        assert_eq!(compare_documents(&unknown, &young, &sort), Ordering::Less);

        let sort = sort_keys(&[SortField::new("age", SortDirection::Desc)]);
        assert_eq!(compare_documents(&young, &old, &sort), Ordering::Greater);
    }

    #[test]
    fn projection_keeps_nesting() {
        let doc = json!({ "_id": "a", "x": 1, "owner": { "name": "bob", "age": 40 } });
        let fields = ["_id", "owner.name", "missing"].map(FieldPath::parse);

        assert_eq!(project(&doc, &fields), json!({ "_id": "a", "owner": { "name": "bob" } }));
    }
}
