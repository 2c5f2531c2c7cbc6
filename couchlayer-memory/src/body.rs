//! Reading and writing the special `_` members of document bodies.

use serde_json::{Map, Value, json};

use couchlayer_core::{
    error::{DriverError, DriverResult},
    options::GetOptions,
    revision::RevId,
};

use crate::{
    attachments,
    tree::{Edit, RevisionTree},
};

/// Members accepted on input but recomputed by the store.
const IGNORED_MEMBERS: [&str; 5] = ["_conflicts", "_deleted_conflicts", "_revs_info", "_local_seq", "_seq"];

/// A document body as submitted by a caller, with its special members split out.
#[derive(Debug, Default)]
pub(crate) struct IncomingDoc {
    pub id: Option<String>,
    pub rev: Option<RevId>,
    pub deleted: bool,
    pub revisions: Option<Vec<RevId>>,
    pub attachments: Option<Map<String, Value>>,
    pub body: Map<String, Value>,
}

impl IncomingDoc {
    /// Splits a submitted document into its special members and user content.
    ///
    /// # Errors
    ///
    /// [`DriverError::BadRequest`] if the document is not an object, if a special
    /// member has the wrong type, or if it carries an unknown `_` member.
    pub fn parse(doc: Value) -> DriverResult<Self> {
        let Value::Object(members) = doc else {
            return Err(DriverError::BadRequest("Document must be a JSON object".to_string()));
        };

        let mut incoming = IncomingDoc::default();

        for (key, value) in members {
            match key.as_str() {
                "_id" => match value {
                    Value::String(id) => incoming.id = Some(id),
                    other => return Err(DriverError::BadRequest(format!("Document id must be a string, got {other}"))),
                },
                "_rev" => match value {
                    Value::String(rev) => incoming.rev = Some(RevId::parse(&rev)?),
                    Value::Null => {}
                    other => return Err(DriverError::BadRequest(format!("Invalid rev format: {other}"))),
                },
                "_deleted" => match value {
                    Value::Bool(deleted) => incoming.deleted = deleted,
                    other => return Err(DriverError::BadRequest(format!("_deleted must be a boolean, got {other}"))),
                },
                "_attachments" => match value {
                    Value::Object(attachments) => incoming.attachments = Some(attachments),
                    Value::Null => {}
                    _ => return Err(DriverError::BadRequest("_attachments must be an object".to_string())),
                },
                "_revisions" => incoming.revisions = Some(parse_revisions(&value)?),
                key if IGNORED_MEMBERS.contains(&key) => {}
                key if key.starts_with('_') => {
                    return Err(DriverError::BadRequest(format!("Bad special document member: {key}")));
                }
                _ => {
                    incoming.body.insert(key, value);
                }
            }
        }

        Ok(incoming)
    }

    /// The revision path of a replicated document, newest first.
    ///
    /// Uses `_revisions` when present, otherwise just `_rev`.
    pub fn revision_path(&self) -> DriverResult<Vec<RevId>> {
        let rev = self
            .rev
            .as_ref()
            .ok_or_else(|| DriverError::BadRequest("Replicated documents require a _rev".to_string()))?;

        match &self.revisions {
            Some(path) if path.first() == Some(rev) => Ok(path.clone()),
            Some(_) => Err(DriverError::BadRequest("_revisions does not start with _rev".to_string())),
            None => Ok(vec![rev.clone()]),
        }
    }
}

/// Parses `{"start": N, "ids": [...]}` into revision ids, newest first.
fn parse_revisions(value: &Value) -> DriverResult<Vec<RevId>> {
    let invalid = || DriverError::BadRequest("_revisions must be {\"start\": N, \"ids\": [...]}".to_string());

    let start = value.get("start").and_then(Value::as_u64).ok_or_else(invalid)?;
    let ids = value.get("ids").and_then(Value::as_array).ok_or_else(invalid)?;

    if ids.is_empty() || (ids.len() as u64) > start {
        return Err(invalid());
    }

    ids.iter()
        .enumerate()
        .map(|(position, id)| {
            let hash = id.as_str().filter(|hash| !hash.is_empty()).ok_or_else(invalid)?;
            Ok(RevId::new(start - position as u64, hash))
        })
        .collect()
}

/// Checks that a caller-chosen document id is acceptable.
///
/// Ids starting with `_` are reserved, except for design and local documents.
pub(crate) fn validate_doc_id(doc_id: &str) -> DriverResult<()> {
    if doc_id.is_empty() {
        return Err(DriverError::BadRequest("Document id must not be empty".to_string()));
    }

    let reserved = doc_id.starts_with('_')
        && !doc_id.starts_with("_design/")
        && !doc_id.starts_with("_local/");

    if reserved {
        return Err(DriverError::BadRequest(format!(
            "Only reserved document ids may start with underscore: {doc_id}"
        )));
    }

    Ok(())
}

/// Renders a revision as a document body, injecting the special members
/// requested by `options`.
pub(crate) fn render(doc_id: &str, tree: &RevisionTree, index: usize, options: &GetOptions) -> Value {
    let node = tree.node(index);
    let mut doc = node.body.as_deref().cloned().unwrap_or_default();

    doc.insert("_id".to_string(), Value::String(doc_id.to_string()));
    doc.insert("_rev".to_string(), Value::String(node.rev.to_string()));

    if node.deleted {
        doc.insert("_deleted".to_string(), Value::Bool(true));
    }

    if !node.attachments.is_empty() {
        doc.insert("_attachments".to_string(), attachments::render(&node.attachments, options.attachments));
    }

    if options.revs {
        let ids = tree
            .ancestry(index)
            .into_iter()
            .map(|rev| Value::String(rev.hash))
            .collect::<Vec<_>>();
        doc.insert("_revisions".to_string(), json!({ "start": node.rev.generation, "ids": ids }));
    }

    if options.conflicts {
        let conflicts = tree.conflicts();
        if !conflicts.is_empty() {
            let conflicts = conflicts.iter().map(|rev| Value::String(rev.to_string())).collect();
            doc.insert("_conflicts".to_string(), Value::Array(conflicts));
        }
    }

    Value::Object(doc)
}

/// Candidate body handed to validators: the user content plus `_id` and
/// `_rev`, and `_deleted` for tombstones.
pub(crate) fn candidate(doc_id: &str, rev: &RevId, edit: &Edit) -> Value {
    let mut doc = edit.body.as_deref().cloned().unwrap_or_default();
    doc.insert("_id".to_string(), Value::String(doc_id.to_string()));
    doc.insert("_rev".to_string(), Value::String(rev.to_string()));
    if edit.deleted {
        doc.insert("_deleted".to_string(), Value::Bool(true));
    }
    Value::Object(doc)
}
