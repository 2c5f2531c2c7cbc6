//! Typed documents.
//!
//! Drivers exchange document bodies as JSON objects. This module lets
//! applications work with their own Serde types instead, converting at the
//! boundary.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, from_value, to_value};

use crate::{
    error::{DriverError, DriverResult},
    revision::RevId,
};

/// Core trait for application types stored as documents.
///
/// # Example
///
/// ```ignore
/// use couchlayer_core::document::Document;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Animal {
///     #[serde(rename = "_id")]
///     pub id: String,
///     #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
///     pub rev: Option<String>,
///     pub name: String,
/// }
///
/// impl Document for Animal {
///     fn id(&self) -> &str { &self.id }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the document id.
    fn id(&self) -> &str;
}

/// Conversions between [`Document`] types and JSON bodies.
pub trait DocumentExt: Document {
    /// Serializes this document into a JSON object body.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::BadRequest`] if the type does not serialize to an object.
    fn to_body(&self) -> DriverResult<Value>;

    /// Deserializes a document from a JSON body.
    fn from_body(body: Value) -> DriverResult<Self>
    where
        Self: Sized;
}

impl<T: Document> DocumentExt for T {
    fn to_body(&self) -> DriverResult<Value> {
        match to_value(self)? {
            body @ Value::Object(_) => Ok(body),
            other => Err(DriverError::BadRequest(format!("Document must be a JSON object, got {other}"))),
        }
    }

    fn from_body(body: Value) -> DriverResult<Self> {
        Ok(from_value(body)?)
    }
}

/// Returns the `_rev` member of a body, if present and well formed.
pub fn body_rev(body: &Value) -> DriverResult<Option<RevId>> {
    match body.get("_rev") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(rev)) => RevId::parse(rev).map(Some),
        Some(other) => Err(DriverError::BadRequest(format!("Invalid rev format: {other}"))),
    }
}

/// Sets (or removes, for `None`) the `_rev` member of an object body.
pub fn set_body_rev(body: &mut Map<String, Value>, rev: Option<&RevId>) {
    match rev {
        Some(rev) => body.insert("_rev".to_string(), Value::String(rev.to_string())),
        None => body.remove("_rev"),
    };
}
