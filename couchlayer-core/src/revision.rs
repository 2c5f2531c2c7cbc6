//! Revision identifiers.
//!
//! A revision is identified by a `(generation, hash)` pair serialized as
//! `"<generation>-<hash>"`. The generation grows by one from parent to child; the
//! hash distinguishes siblings created from the same parent.
//!
//! The derived ordering compares the generation first and then the hash
//! lexicographically, which is exactly the order used to pick a winning revision.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::error::{DriverError, DriverResult};

/// A revision identifier.
///
/// # Example
///
/// ```ignore
/// use couchlayer_core::revision::RevId;
///
/// let rev: RevId = "2-bbb".parse().unwrap();
/// assert_eq!(rev.generation, 2);
/// assert_eq!(rev.hash, "bbb");
/// assert!(rev > "1-zzz".parse().unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevId {
    /// Depth of the revision in its document's tree, starting at 1.
    pub generation: u64,
    /// Content-derived hash distinguishing revisions of the same generation.
    pub hash: String,
}

impl RevId {
    /// Creates a revision identifier from its parts.
    pub fn new(generation: u64, hash: impl Into<String>) -> Self {
        Self { generation, hash: hash.into() }
    }

    /// Parses a revision string, mapping failures to [`DriverError::BadRequest`].
    pub fn parse(value: &str) -> DriverResult<Self> {
        let (generation, hash) = value
            .split_once('-')
            .ok_or_else(|| DriverError::BadRequest(format!("Invalid rev format: {value}")))?;

        let generation = generation
            .parse::<u64>()
            .map_err(|_| DriverError::BadRequest(format!("Invalid rev format: {value}")))?;

        if generation == 0 || hash.is_empty() {
            return Err(DriverError::BadRequest(format!("Invalid rev format: {value}")));
        }

        Ok(Self::new(generation, hash))
    }

    /// Returns the identifier a child of this revision would carry for `hash`.
    ///
    /// # Errors
    ///
    /// [`DriverError::BadRequest`] if the generation cannot grow any further.
    pub fn child(&self, hash: impl Into<String>) -> DriverResult<Self> {
        let generation = self
            .generation
            .checked_add(1)
            .ok_or_else(|| DriverError::BadRequest(format!("Revision {self} has no room for a child")))?;

        Ok(Self::new(generation, hash))
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for RevId {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RevId::parse(s)
    }
}

impl Serialize for RevId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RevId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        RevId::parse(&value).map_err(D::Error::custom)
    }
}
