//! Driver configuration.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use couchlayer_core::{
    error::{DriverError, DriverResult},
    revision::RevId,
};

use crate::{body, tree::Edit};

/// Default number of revisions kept per branch by compaction.
pub const DEFAULT_REVS_LIMIT: usize = 1000;

/// Settings of the in-memory driver.
///
/// # Example
///
/// ```ignore
/// use couchlayer_memory::MemoryConfig;
///
/// let config: MemoryConfig = serde_json::from_str(r#"{"revs_limit": 10}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Revisions kept per branch (leaf included) when a database is compacted.
    pub revs_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { revs_limit: DEFAULT_REVS_LIMIT }
    }
}

/// A document validation hook.
///
/// Called with the candidate body of every write (`_id`, `_rev` and, for
/// deletions, `_deleted` included). Returning `Err(reason)` rejects the write with
/// [`DriverError::Forbidden`].
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Settings shared by every database of a driver.
#[derive(Clone, Default)]
pub(crate) struct Settings {
    pub config: MemoryConfig,
    pub validators: Vec<Validator>,
}

impl Settings {
    /// Runs the validators against a pending edit.
    pub fn validate(&self, doc_id: &str, rev: &RevId, edit: &Edit) -> DriverResult<()> {
        if self.validators.is_empty() {
            return Ok(());
        }

        let candidate = body::candidate(doc_id, rev, edit);

        self.validators
            .iter()
            .try_for_each(|validator| validator(&candidate))
            .map_err(DriverError::Forbidden)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("config", &self.config)
            .field("validators", &self.validators.len())
            .finish()
    }
}
