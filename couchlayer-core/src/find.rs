//! Selector queries ("Find") and index definitions.
//!
//! This module models the Mango-style query accepted by [`Finder::find`]: a
//! required `selector`, optional `limit`/`skip`, an ordered `sort`, a `fields`
//! projection and a `use_index` hint. Selectors are parsed into an [`Expr`] tree
//! which backends evaluate through the [`QueryVisitor`] trait.
//!
//! # Selector syntax
//!
//! - Implicit equality: `{"name": "Alice"}`
//! - Dotted paths or nested objects: `{"address.city": "Oslo"}` / `{"address": {"city": "Oslo"}}`
//! - Comparison: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`
//! - Membership: `$in`, `$nin`, `$all`, `$size`, `$elemMatch`, `$allMatch`
//! - Misc: `$exists`, `$type`, `$mod`
//! - Logical: `$and`, `$or`, `$nor`, `$not`
//!
//! Several keys in one object are combined with an implicit `$and`.
//!
//! [`Finder::find`]: crate::driver::Finder::find

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{DriverError, DriverResult},
    rows::Window,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending collation order.
    #[default]
    Asc,
    /// Descending collation order.
    Desc,
}

/// One entry of a `sort` list: `"field"` or `{"field": "asc" | "desc"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSortField", into = "RawSortField")]
pub struct SortField {
    /// Dotted field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortField {
    /// Creates a sort entry.
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self { field: field.into(), direction }
    }

    /// The parsed field path.
    pub fn path(&self) -> FieldPath {
        FieldPath::parse(&self.field)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSortField {
    Name(String),
    Directed(BTreeMap<String, SortDirection>),
}

impl TryFrom<RawSortField> for SortField {
    type Error = String;

    fn try_from(raw: RawSortField) -> Result<Self, Self::Error> {
        match raw {
            RawSortField::Name(field) => Ok(SortField::new(field, SortDirection::Asc)),
            RawSortField::Directed(map) => {
                let mut entries = map.into_iter();

                match (entries.next(), entries.next()) {
                    (Some((field, direction)), None) => Ok(SortField::new(field, direction)),
                    _ => Err("Each sort entry must name exactly one field".to_string()),
                }
            }
        }
    }
}

impl From<SortField> for RawSortField {
    fn from(sort: SortField) -> Self {
        match sort.direction {
            SortDirection::Asc => RawSortField::Name(sort.field),
            SortDirection::Desc => RawSortField::Directed(BTreeMap::from([(sort.field, SortDirection::Desc)])),
        }
    }
}

/// An index hint: a design document name, optionally with an index name.
///
/// Accepts both `"ddoc"` and `["ddoc", "index"]` from the same field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIndexSpec", into = "RawIndexSpec")]
pub struct IndexSpec {
    pub design_doc: String,
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawIndexSpec {
    Name(String),
    Pair(Vec<String>),
}

impl TryFrom<RawIndexSpec> for IndexSpec {
    type Error = String;

    fn try_from(raw: RawIndexSpec) -> Result<Self, Self::Error> {
        match raw {
            RawIndexSpec::Name(design_doc) => Ok(IndexSpec { design_doc, name: None }),
            RawIndexSpec::Pair(values) if (1..=2).contains(&values.len()) => {
                let mut values = values.into_iter();

                Ok(IndexSpec {
                    design_doc: values.next().unwrap_or_default(),
                    name: values.next(),
                })
            }
            RawIndexSpec::Pair(_) => Err("invalid index specification".to_string()),
        }
    }
}

impl From<IndexSpec> for RawIndexSpec {
    fn from(spec: IndexSpec) -> Self {
        match spec.name {
            Some(name) => RawIndexSpec::Pair(vec![spec.design_doc, name]),
            None => RawIndexSpec::Name(spec.design_doc),
        }
    }
}

/// A dotted path into a document, e.g. `address.city`.
///
/// A literal dot inside a field name is written `\.`. The empty path refers to
/// the value being matched itself (used inside `$elemMatch`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// The empty path.
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    /// Parses a dotted path.
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                '.' => segments.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        segments.push(current);

        FieldPath(segments)
    }

    /// Returns this path extended by `other`.
    pub fn join(&self, other: &FieldPath) -> Self {
        FieldPath(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    /// The path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Resolves the path against `value`, descending through objects only.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| current.as_object()?.get(segment))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = self.0
            .iter()
            .map(|segment| segment.replace('.', "\\."))
            .collect::<Vec<_>>();

        f.write_str(&escaped.join("."))
    }
}

/// Field condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (collation equality).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Equal to one of the values of an array.
    In,
    /// Equal to none of the values of an array.
    Nin,
    /// Field presence (`true`) or absence (`false`).
    Exists,
    /// JSON type name: `null`, `boolean`, `number`, `string`, `array`, `object`.
    Type,
    /// Array length.
    Size,
    /// Array containing all of the values.
    All,
    /// `[divisor, remainder]` on integers.
    Mod,
}

impl FieldOp {
    fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::In,
            "$nin" => FieldOp::Nin,
            "$exists" => FieldOp::Exists,
            "$type" => FieldOp::Type,
            "$size" => FieldOp::Size,
            "$all" => FieldOp::All,
            "$mod" => FieldOp::Mod,
            _ => return None,
        })
    }
}

const TYPE_NAMES: [&str; 6] = ["null", "boolean", "number", "string", "array", "object"];

/// A parsed selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// All sub-expressions must match. An empty list matches everything.
    And(Vec<Expr>),
    /// Any sub-expression must match.
    Or(Vec<Expr>),
    /// No sub-expression may match.
    Nor(Vec<Expr>),
    /// Inverts the result of an expression.
    Not(Box<Expr>),
    /// Compares the value at `path` with `value`.
    Field {
        path: FieldPath,
        op: FieldOp,
        value: Value,
    },
    /// The array at `path` has at least one element matching `expr`.
    ElemMatch { path: FieldPath, expr: Box<Expr> },
    /// The array at `path` is non-empty and every element matches `expr`.
    AllMatch { path: FieldPath, expr: Box<Expr> },
}

impl Expr {
    /// Parses a JSON selector.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::BadRequest`] if the selector is not an object, uses an
    /// unknown operator, or gives an operator an argument of the wrong shape.
    pub fn parse_selector(selector: &Value) -> DriverResult<Expr> {
        parse_object(&FieldPath::root(), selector)
    }
}

fn bad_request(message: impl Into<String>) -> DriverError {
    DriverError::BadRequest(message.into())
}

fn parse_object(path: &FieldPath, value: &Value) -> DriverResult<Expr> {
    let map = value
        .as_object()
        .ok_or_else(|| bad_request(format!("Selector for {path} must be a JSON object")))?;

    let mut exprs = map
        .iter()
        .map(|(key, value)| {
            if key.starts_with('$') {
                parse_operator(path, key, value)
            } else {
                parse_condition(&path.join(&FieldPath::parse(key)), value)
            }
        })
        .collect::<DriverResult<Vec<_>>>()?;

    Ok(match exprs.len() {
        1 => exprs.remove(0),
        _ => Expr::And(exprs),
    })
}

fn parse_condition(path: &FieldPath, value: &Value) -> DriverResult<Expr> {
    match value {
        Value::Object(map) if !map.is_empty() => parse_object(path, value),
        _ => Ok(Expr::Field { path: path.clone(), op: FieldOp::Eq, value: value.clone() }),
    }
}

fn parse_list(path: &FieldPath, op: &str, value: &Value) -> DriverResult<Vec<Expr>> {
    value
        .as_array()
        .ok_or_else(|| bad_request(format!("{op} requires an array argument")))?
        .iter()
        .map(|item| parse_object(path, item))
        .collect()
}

fn parse_operator(path: &FieldPath, op: &str, value: &Value) -> DriverResult<Expr> {
    match op {
        "$and" => return Ok(Expr::And(parse_list(path, op, value)?)),
        "$or" => return Ok(Expr::Or(parse_list(path, op, value)?)),
        "$nor" => return Ok(Expr::Nor(parse_list(path, op, value)?)),
        "$not" => return Ok(Expr::Not(Box::new(parse_object(path, value)?))),
        "$elemMatch" => {
            return Ok(Expr::ElemMatch {
                path: path.clone(),
                expr: Box::new(parse_object(&FieldPath::root(), value)?),
            });
        }
        "$allMatch" => {
            return Ok(Expr::AllMatch {
                path: path.clone(),
                expr: Box::new(parse_object(&FieldPath::root(), value)?),
            });
        }
        _ => {}
    }

    let field_op = FieldOp::from_operator(op).ok_or_else(|| bad_request(format!("Invalid operator: {op}")))?;

    let valid = match field_op {
        FieldOp::In | FieldOp::Nin | FieldOp::All => value.is_array(),
        FieldOp::Exists => value.is_boolean(),
        FieldOp::Type => value.as_str().is_some_and(|name| TYPE_NAMES.contains(&name)),
        FieldOp::Size => value.is_u64(),
        FieldOp::Mod => match value.as_array().map(Vec::as_slice) {
            Some([divisor, remainder]) => {
                divisor.as_i64().is_some_and(|d| d != 0) && remainder.as_i64().is_some()
            }
            _ => false,
        },
        _ => true,
    };

    if !valid {
        return Err(bad_request(format!("Invalid argument for {op}: {value}")));
    }

    Ok(Expr::Field { path: path.clone(), op: field_op, value: value.clone() })
}

/// A structured Find query.
///
/// # Example
///
/// ```ignore
/// use couchlayer_core::find::{FindQuery, SortDirection};
/// use serde_json::json;
///
/// let query = FindQuery::builder()
///     .selector(json!({ "type": "user", "age": { "$gt": 18 } }))
///     .sort("age", SortDirection::Desc)
///     .skip(3)
///     .limit(4)
///     .build();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindQuery {
    /// Required matcher tree.
    #[serde(default)]
    pub selector: Option<Value>,
    /// Maximum number of rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Number of rows to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    /// Ordered sort specification.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortField>,
    /// Projection: only these fields are returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// Index hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_index: Option<IndexSpec>,
}

impl FindQuery {
    /// Creates a new query builder for fluent construction.
    pub fn builder() -> FindQueryBuilder {
        FindQueryBuilder::new()
    }

    /// Parses a raw JSON query.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::BadRequest`] if the payload has the wrong shape.
    pub fn from_json(value: Value) -> DriverResult<Self> {
        serde_json::from_value(value).map_err(|err| bad_request(format!("Invalid query: {err}")))
    }

    /// Parses the selector.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::BadRequest`] if the selector is absent or malformed.
    pub fn parse_selector(&self) -> DriverResult<Expr> {
        match &self.selector {
            Some(selector) => Expr::parse_selector(selector),
            None => Err(bad_request("Missing required key: selector")),
        }
    }

    /// The `skip`/`limit` window of this query.
    pub fn window(&self) -> Window {
        Window::new(self.skip.unwrap_or(0), self.limit)
    }

    /// The parsed projection paths, if a projection was requested.
    pub fn projection(&self) -> Option<Vec<FieldPath>> {
        self.fields
            .as_ref()
            .map(|fields| fields.iter().map(|field| FieldPath::parse(field)).collect())
    }
}

impl TryFrom<Value> for FindQuery {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        FindQuery::from_json(value)
    }
}

/// Fluent builder for [`FindQuery`].
#[derive(Debug, Clone, Default)]
pub struct FindQueryBuilder {
    query: FindQuery,
}

impl FindQueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        FindQueryBuilder { query: FindQuery::default() }
    }

    /// Sets the selector.
    pub fn selector(mut self, selector: Value) -> Self {
        self.query.selector = Some(selector);
        self
    }

    /// Sets the maximum number of rows to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of rows to skip.
    pub fn skip(mut self, skip: usize) -> Self {
        self.query.skip = Some(skip);
        self
    }

    /// Appends a sort entry.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(SortField::new(field, direction));
        self
    }

    /// Sets the projection.
    pub fn fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.query.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the index hint.
    pub fn use_index(mut self, design_doc: impl Into<String>, name: Option<String>) -> Self {
        self.query.use_index = Some(IndexSpec { design_doc: design_doc.into(), name });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> FindQuery {
        self.query
    }
}

/// A Mango index definition: `{"fields": [...], "partial_filter_selector": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub fields: Vec<SortField>,
    pub partial_filter_selector: Option<Value>,
}

impl IndexDefinition {
    /// Parses an index definition, accepting either the bare definition or one
    /// wrapped in `{"index": ...}`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::BadRequest`] if `fields` is missing or empty, or if
    /// the partial filter is not a valid selector.
    pub fn parse(value: &Value) -> DriverResult<Self> {
        let definition = value.get("index").unwrap_or(value);

        let fields = definition
            .get("fields")
            .cloned()
            .map(serde_json::from_value::<Vec<SortField>>)
            .transpose()
            .map_err(|err| bad_request(format!("Malformed index definition: {err}")))?
            .filter(|fields| !fields.is_empty())
            .ok_or_else(|| bad_request("Malformed index definition: fields must be a non-empty array"))?;

        let partial_filter_selector = definition.get("partial_filter_selector").cloned();

        if let Some(selector) = &partial_filter_selector {
            Expr::parse_selector(selector)?;
        }

        Ok(IndexDefinition { fields, partial_filter_selector })
    }
}

/// Visitor over a parsed selector.
///
/// Backends implement this to evaluate (or translate) an [`Expr`] tree.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DriverError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        path: &FieldPath,
        op: FieldOp,
        value: &Value,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_elem_match(&mut self, path: &FieldPath, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_all_match(&mut self, path: &FieldPath, expr: &Expr) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Field { path, op, value } => self.visit_field(path, *op, value),
            Expr::ElemMatch { path, expr } => self.visit_elem_match(path, expr),
            Expr::AllMatch { path, expr } => self.visit_all_match(path, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(path: &str, op: FieldOp, value: Value) -> Expr {
        Expr::Field { path: FieldPath::parse(path), op, value }
    }

    #[test]
    fn implicit_equality_and_implicit_and() {
        let expr = Expr::parse_selector(&json!({ "a": 1, "b": "x" })).unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![field("a", FieldOp::Eq, json!(1)), field("b", FieldOp::Eq, json!("x"))])
        );
    }

    #[test]
    fn nested_objects_become_paths() {
        let expr = Expr::parse_selector(&json!({ "address": { "city": { "$ne": "Oslo" } } })).unwrap();

        assert_eq!(expr, field("address.city", FieldOp::Ne, json!("Oslo")));
    }

    #[test]
    fn operators_scope_to_their_field() {
        let expr = Expr::parse_selector(&json!({ "n": { "$or": [{ "$lt": 2 }, { "$gt": 8 }] } })).unwrap();

        assert_eq!(
            expr,
            Expr::Or(vec![field("n", FieldOp::Lt, json!(2)), field("n", FieldOp::Gt, json!(8))])
        );
    }

    #[test]
    fn rejects_bad_operators_and_arguments() {
        for selector in [
            json!({ "a": { "$regex": "^x" } }),
            json!({ "a": { "$in": 3 } }),
            json!({ "a": { "$exists": "yes" } }),
            json!({ "a": { "$mod": [0, 1] } }),
            json!({ "a": { "$type": "date" } }),
            json!({ "$or": {} }),
            json!(["a"]),
        ] {
            assert!(
                matches!(Expr::parse_selector(&selector), Err(DriverError::BadRequest(_))),
                "{selector} should be rejected"
            );
        }
    }

    #[test]
    fn missing_selector_is_bad_request() {
        let query = FindQuery::from_json(json!({ "limit": 3 })).unwrap();

        assert!(matches!(query.parse_selector(), Err(DriverError::BadRequest(msg)) if msg.contains("selector")));
    }

    #[test]
    fn use_index_accepts_both_shapes() {
        let single = FindQuery::from_json(json!({ "selector": {}, "use_index": "foo" })).unwrap();
        let pair = FindQuery::from_json(json!({ "selector": {}, "use_index": ["foo", "bar"] })).unwrap();

        assert_eq!(single.use_index, Some(IndexSpec { design_doc: "foo".into(), name: None }));
        assert_eq!(pair.use_index, Some(IndexSpec { design_doc: "foo".into(), name: Some("bar".into()) }));

        for bad in [json!([]), json!(["a", "b", "c"]), json!(3)] {
            assert!(FindQuery::from_json(json!({ "selector": {}, "use_index": bad })).is_err());
        }
    }

    #[test]
    fn sort_accepts_names_and_directions() {
        let query = FindQuery::from_json(json!({ "selector": {}, "sort": ["a", { "b": "desc" }] })).unwrap();

        assert_eq!(
            query.sort,
            vec![SortField::new("a", SortDirection::Asc), SortField::new("b", SortDirection::Desc)]
        );
    }

    #[test]
    fn field_paths_support_escaped_dots() {
        let path = FieldPath::parse("a\\.b.c");
        let doc = json!({ "a.b": { "c": 5 } });

        assert_eq!(path.segments(), ["a.b".to_string(), "c".to_string()]);
        assert_eq!(path.resolve(&doc), Some(&json!(5)));
        assert_eq!(path.to_string(), "a\\.b.c");
    }

    #[test]
    fn index_definitions_require_fields() {
        assert!(IndexDefinition::parse(&json!({ "fields": ["a"] })).is_ok());
        assert!(IndexDefinition::parse(&json!({ "index": { "fields": [{ "a": "desc" }] } })).is_ok());
        assert!(matches!(IndexDefinition::parse(&json!({ "fields": [] })), Err(DriverError::BadRequest(_))));
        assert!(matches!(IndexDefinition::parse(&json!({})), Err(DriverError::BadRequest(_))));
    }
}
