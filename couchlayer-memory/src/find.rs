//! Selector queries over a database.
//!
//! There are no indexes: every query scans the winning revision of each live
//! document in id order, filters it through the selector, sorts the matches
//! and applies the `skip`/`limit` window last.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use couchlayer_core::{
    driver::Finder,
    error::{DriverError, DriverResult},
    find::{FindQuery, IndexDefinition},
    options::GetOptions,
    rows::{ResultSet, Row},
    types::Index,
};

use crate::{
    body,
    database::MemoryDb,
    evaluator::{DocumentEvaluator, compare_documents, project, sort_keys},
};

/// Scans yield to the scheduler this often, so long queries do not starve
/// other tasks.
const YIELD_INTERVAL: usize = 512;

pub(crate) const NO_INDEX_WARNING: &str = "No matching index found, create an index to optimize query time.";

fn indexes_unsupported() -> DriverError {
    DriverError::NotImplemented("indexes are not supported by the memory driver".to_string())
}

#[async_trait]
impl Finder for MemoryDb {
    async fn find(&self, query: FindQuery) -> DriverResult<ResultSet> {
        let expr = query.parse_selector()?;
        let sort = sort_keys(&query.sort);
        let mut matches = Vec::new();

        for (position, (id, entry)) in self.state.snapshot().await.into_iter().enumerate() {
            if position > 0 && position % YIELD_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }

            let doc = {
                let tree = entry.lock().await;
                match tree.live_winner_index() {
                    Some(index) => body::render(&id, &tree, index, &GetOptions::default()),
                    None => continue,
                }
            };

            if DocumentEvaluator::new(&doc).evaluate(&expr)? {
                matches.push((id, doc));
            }
        }

        // Stable, so ties keep id order.
        if !sort.is_empty() {
            matches.sort_by(|(_, a), (_, b)| compare_documents(a, b, &sort));
        }

        let projection = query.projection();
        let warning = match &query.use_index {
            Some(index) => format!("{} was not used because it does not exist. {NO_INDEX_WARNING}", index.design_doc),
            None => NO_INDEX_WARNING.to_string(),
        };

        let result = query.window().apply(matches).map(|(id, doc)| Row {
            key: Value::String(id.clone()),
            value: Value::Null,
            doc: Some(match &projection {
                Some(fields) => project(&doc, fields),
                None => doc,
            }),
            id,
        });

        debug!(
            db = %self.name(),
            matched = result.total_rows,
            returned = result.rows.len(),
            "find scanned database",
        );

        Ok(ResultSet { warning: Some(warning), ..result })
    }

    async fn create_index(
        &self,
        ddoc: Option<&str>,
        name: Option<&str>,
        index: IndexDefinition,
    ) -> DriverResult<()> {
        debug!(db = %self.name(), ?ddoc, ?name, fields = index.fields.len(), "index creation requested");
        Err(indexes_unsupported())
    }

    async fn get_indexes(&self) -> DriverResult<Vec<Index>> {
        Err(indexes_unsupported())
    }

    async fn delete_index(&self, _ddoc: &str, _name: &str) -> DriverResult<()> {
        Err(indexes_unsupported())
    }
}
