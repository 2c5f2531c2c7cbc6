//! Bulk updates.
//!
//! Documents are applied one after another in submission order, each in its own
//! critical section. A rejected document never affects the others.

use serde_json::Value;
use tracing::{debug, warn};

use couchlayer_core::{
    error::{DriverError, DriverResult},
    options::BulkOptions,
    revision::RevId,
    types::BulkResult,
};

use crate::{
    body::IncomingDoc,
    database::{DatabaseState, generate_id},
};

pub(crate) async fn apply(state: &DatabaseState, docs: Vec<Value>, options: &BulkOptions) -> Vec<BulkResult> {
    let mut results = Vec::with_capacity(docs.len());

    for (position, doc) in docs.into_iter().enumerate() {
        let submitted_id = doc
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let (id, result) = match IncomingDoc::parse(doc) {
            Ok(incoming) => apply_one(state, incoming, options.new_edits).await,
            Err(err) => (submitted_id.unwrap_or_default(), Err(err)),
        };

        if let Err(err) = &result {
            warn!(db = %state.name, position, doc_id = %id, error = %err, "bulk update rejected document");
        }

        results.push(BulkResult { id, result });
    }

    debug!(
        db = %state.name,
        total = results.len(),
        failed = results.iter().filter(|r| r.result.is_err()).count(),
        new_edits = options.new_edits,
        "applied bulk update",
    );

    results
}

async fn apply_one(state: &DatabaseState, incoming: IncomingDoc, new_edits: bool) -> (String, DriverResult<RevId>) {
    match (incoming.id.clone(), new_edits) {
        (Some(id), true) => {
            let result = state.write(&id, incoming).await;
            (id, result)
        }
        (None, true) => {
            let id = generate_id();
            let result = state.write(&id, incoming).await;
            (id, result)
        }
        (Some(id), false) => {
            let result = state.replicate(&id, incoming).await;
            (id, result)
        }
        (None, false) => (
            String::new(),
            Err(DriverError::BadRequest("Replicated documents require an _id".to_string())),
        ),
    }
}
