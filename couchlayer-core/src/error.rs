//! Error types and result types for driver operations.
//!
//! Every driver, whatever transport sits behind it, reports failures through
//! [`DriverError`]. Backends must not leak transport-specific error codes; they map
//! them onto this taxonomy instead. Use [`DriverResult<T>`] as the return type for
//! fallible operations.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a driver.
///
/// Conflicts and not-found conditions are always returned to the caller and never
/// retried internally.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A database, document, revision, attachment or index is absent.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The parent revision given for a write is stale or missing.
    #[error("Document update conflict: {0}")]
    Conflict(String),
    /// The request is malformed (missing selector, bad revision id, invalid document...).
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// A validation hook rejected the write.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// The backend does not implement the requested capability.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// The target of a create operation already exists.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    /// Reading the content stream of an attachment failed.
    /// `name` identifies the attachment whose stream failed.
    #[error("Error reading attachment {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// A continuous feed was closed by its consumer.
    #[error("Operation canceled")]
    Canceled,
    /// Serialization/deserialization error when converting document bodies.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DriverError {
    /// Returns the HTTP-style status code conventionally associated with this error.
    ///
    /// Remote drivers use this mapping in reverse to translate server responses.
    pub fn status(&self) -> u16 {
        match self {
            DriverError::NotFound(_) => 404,
            DriverError::Conflict(_) => 409,
            DriverError::BadRequest(_) => 400,
            DriverError::Forbidden(_) => 403,
            DriverError::NotImplemented(_) => 501,
            DriverError::PreconditionFailed(_) => 412,
            DriverError::Io { .. } => 500,
            DriverError::Canceled => 499,
            DriverError::Serialization(_) => 500,
        }
    }

    /// Returns `true` for [`DriverError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }

    /// Returns `true` for [`DriverError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, DriverError::Conflict(_))
    }

    /// Returns `true` for [`DriverError::NotImplemented`].
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, DriverError::NotImplemented(_))
    }
}

/// A specialized `Result` type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

impl From<SerdeJsonError> for DriverError {
    fn from(err: SerdeJsonError) -> Self {
        DriverError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_http_conventions() {
        assert_eq!(DriverError::NotFound("doc".into()).status(), 404);
        assert_eq!(DriverError::Conflict("doc".into()).status(), 409);
        assert_eq!(DriverError::NotImplemented("find".into()).status(), 501);
        assert_eq!(DriverError::Canceled.status(), 499);
    }

    #[test]
    fn io_error_names_the_attachment() {
        let err = DriverError::Io {
            name: "foo.txt".into(),
            source: std::io::Error::other("errorReader"),
        };

        assert_eq!(err.to_string(), "Error reading attachment foo.txt: errorReader");
    }
}
