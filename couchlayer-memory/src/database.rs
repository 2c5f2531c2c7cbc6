//! Databases of the in-memory driver.
//!
//! A database is a map from document id to revision tree plus a change log.
//! Each tree sits behind its own mutex, so writers to different documents
//! proceed in parallel while writers to the same document are serialized. A
//! commit holds the document's mutex, then the change log's mutex, while it
//! inserts the new revision and appends the log entry. Nothing awaits between
//! those two steps, which keeps the log order identical to the order in which
//! revisions became visible.
//!
//! A tree that never received a revision is removed again when its first
//! write fails, so rejected writes leave nothing behind. Lock order is tree
//! before map.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use mea::{
    mutex::{Mutex, OwnedMutexGuard},
    rwlock::RwLock,
};
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use couchlayer_core::{
    attachment::{Attachment, AttachmentMeta},
    changes::Changes,
    driver::{AttachmentMetaer, Copier, Db, DbFlusher, Finder, Rever},
    error::{DriverError, DriverResult},
    options::{AllDocsOptions, BulkOptions, ChangesOptions, CopyOptions, GetOptions},
    revision::RevId,
    rows::{ResultSet, Row, Window},
    types::{BulkResult, DbStats, Security},
};

use crate::{
    attachments::{self, StoredAttachment},
    body::{self, IncomingDoc, validate_doc_id},
    bulk,
    changes::{ChangeLog, MemoryChanges},
    config::Settings,
    tree::{AttachmentMap, Body, Edit, RevNode, RevisionTree},
};

pub(crate) type DocEntry = Arc<Mutex<RevisionTree>>;
type TreeGuard = OwnedMutexGuard<RevisionTree>;

pub(crate) fn missing(doc_id: &str) -> DriverError {
    DriverError::NotFound(format!("{doc_id}: missing"))
}

pub(crate) fn deleted(doc_id: &str) -> DriverError {
    DriverError::NotFound(format!("{doc_id}: deleted"))
}

/// Generates an id for a document submitted without one.
pub(crate) fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Resolves the revision a read refers to.
///
/// An explicit revision must exist with readable content (tombstones included).
/// Without one, the winning revision is used and a deleted document is
/// reported as not found.
pub(crate) fn resolve(tree: &RevisionTree, doc_id: &str, rev: Option<&RevId>) -> DriverResult<usize> {
    match rev {
        Some(rev) => tree
            .index_of(rev)
            .filter(|index| tree.node(*index).is_available())
            .ok_or_else(|| missing(doc_id)),
        None => match tree.winner_index() {
            None => Err(missing(doc_id)),
            Some(index) if tree.node(index).deleted => Err(deleted(doc_id)),
            Some(index) => Ok(index),
        },
    }
}

/// Builds the edit for a replicated revision; stubs resolve against the
/// revision's parent when the tree already holds it.
fn replicated_edit(tree: &RevisionTree, path: &[RevId], incoming: IncomingDoc) -> DriverResult<Edit> {
    if incoming.deleted {
        return Ok(Edit::tombstone(None));
    }

    let inherited = path
        .get(1)
        .and_then(|parent| tree.get(parent))
        .map(|node| node.attachments.clone())
        .unwrap_or_default();
    let attachments = match &incoming.attachments {
        Some(raw) => attachments::resolve(raw, &inherited)?,
        None => AttachmentMap::new(),
    };

    Ok(Edit::live(None, Arc::new(incoming.body), Arc::new(attachments)))
}

/// Shared state of one database.
#[derive(Debug)]
pub(crate) struct DatabaseState {
    pub name: String,
    docs: RwLock<BTreeMap<String, DocEntry>>,
    pub log: ChangeLog,
    security: RwLock<Security>,
    pub settings: Arc<Settings>,
    pub destroyed: watch::Sender<bool>,
}

impl DatabaseState {
    pub fn new(name: impl Into<String>, settings: Arc<Settings>) -> Self {
        let (destroyed, _) = watch::channel(false);

        Self {
            name: name.into(),
            docs: RwLock::new(BTreeMap::new()),
            log: ChangeLog::new(),
            security: RwLock::new(Security::default()),
            settings,
            destroyed,
        }
    }

    /// Fails open feeds and marks the state as gone.
    pub fn mark_destroyed(&self) {
        self.destroyed.send_replace(true);
    }

    /// The entry of a document, created empty if it has never been written.
    async fn entry(&self, doc_id: &str) -> DocEntry {
        if let Some(entry) = self.docs.read().await.get(doc_id) {
            return entry.clone();
        }

        self.docs
            .write()
            .await
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RevisionTree::default())))
            .clone()
    }

    async fn existing(&self, doc_id: &str) -> DriverResult<DocEntry> {
        self.docs
            .read()
            .await
            .get(doc_id)
            .cloned()
            .ok_or_else(|| missing(doc_id))
    }

    /// All entries in id order. Trees are locked one at a time afterwards, so
    /// readers see a per-document snapshot.
    pub async fn snapshot(&self) -> Vec<(String, DocEntry)> {
        self.docs
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// The current winning body of a document, tombstones included.
    pub async fn current_doc(&self, doc_id: &str) -> Option<Value> {
        let entry = self.existing(doc_id).await.ok()?;
        let tree = entry.lock().await;
        let index = tree.winner_index()?;

        Some(body::render(doc_id, &tree, index, &GetOptions::default()))
    }

    /// Locks the tree of a document, creating an empty one if it has never been
    /// written. A guard on an empty tree that was discarded meanwhile is
    /// dropped and the lookup retried.
    async fn lock_entry(&self, doc_id: &str) -> (DocEntry, TreeGuard) {
        loop {
            let entry = self.entry(doc_id).await;
            let tree = entry.clone().lock_owned().await;

            if !tree.is_empty() || self.is_current(doc_id, &entry).await {
                return (entry, tree);
            }
        }
    }

    async fn is_current(&self, doc_id: &str, entry: &DocEntry) -> bool {
        self.docs
            .read()
            .await
            .get(doc_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Removes the entry of a document whose first write failed. Must be called
    /// with the tree locked.
    async fn discard_if_empty(&self, doc_id: &str, entry: &DocEntry, tree: &RevisionTree) {
        if !tree.is_empty() {
            return;
        }

        let mut docs = self.docs.write().await;
        if docs.get(doc_id).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            docs.remove(doc_id);
            debug!(db = %self.name, doc_id, "discarded entry of rejected first write");
        }
    }

    /// Commits the revision produced by `edit` inside the document's critical section.
    async fn commit<F>(&self, doc_id: &str, edit: F) -> DriverResult<RevId>
    where
        F: FnOnce(&RevisionTree) -> DriverResult<Edit> + Send,
    {
        let (entry, mut tree) = self.lock_entry(doc_id).await;

        let prepared = edit(&*tree).and_then(|edit| {
            let rev = edit.revision(&tree)?;
            self.settings.validate(doc_id, &rev, &edit)?;
            Ok((edit, rev))
        });
        let (edit, rev) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.discard_if_empty(doc_id, &entry, &tree).await;
                return Err(err);
            }
        };
        let deleted = edit.deleted;

        let mut entries = self.log.entries.lock().await;
        tree.insert(edit, rev.clone())?;
        let seq = ChangeLog::append(&mut entries, doc_id, &rev, deleted);
        drop(entries);
        drop(tree);

        self.log.publish(seq);
        debug!(db = %self.name, doc_id, rev = %rev, seq, deleted, "committed revision");

        Ok(rev)
    }

    /// Writes a document under optimistic concurrency.
    pub async fn write(&self, doc_id: &str, incoming: IncomingDoc) -> DriverResult<RevId> {
        validate_doc_id(doc_id)?;

        if incoming.id.as_deref().is_some_and(|id| id != doc_id) {
            return Err(DriverError::BadRequest(format!("Document id does not match {doc_id}")));
        }

        self.commit(doc_id, move |tree| {
            let parent = tree.check_parent(doc_id, incoming.rev.as_ref())?;

            if incoming.deleted {
                return Ok(Edit::tombstone(parent));
            }

            let inherited = parent
                .map(|index| tree.node(index).attachments.clone())
                .unwrap_or_default();
            let attachments = match &incoming.attachments {
                Some(raw) => attachments::resolve(raw, &inherited)?,
                None => AttachmentMap::new(),
            };

            Ok(Edit::live(parent, Arc::new(incoming.body), Arc::new(attachments)))
        })
        .await
    }

    /// Grafts a replicated revision with its history, bypassing the conflict
    /// check. A revision already in the tree is accepted without a new change
    /// entry.
    pub async fn replicate(&self, doc_id: &str, incoming: IncomingDoc) -> DriverResult<RevId> {
        validate_doc_id(doc_id)?;

        let path = incoming.revision_path()?;
        if path
            .windows(2)
            .any(|pair| pair[1].generation.checked_add(1) != Some(pair[0].generation))
        {
            return Err(DriverError::BadRequest("Revision history must have consecutive generations".to_string()));
        }
        let Some(rev) = path.first().cloned() else {
            return Err(DriverError::BadRequest("Replicated documents require a _rev".to_string()));
        };

        let (entry, mut tree) = self.lock_entry(doc_id).await;

        if tree.index_of(&rev).is_some() {
            debug!(db = %self.name, doc_id, rev = %rev, "replicated revision already present");
            return Ok(rev);
        }

        let prepared = replicated_edit(&tree, &path, incoming).and_then(|edit| {
            self.settings.validate(doc_id, &rev, &edit)?;
            Ok(edit)
        });
        let edit = match prepared {
            Ok(edit) => edit,
            Err(err) => {
                self.discard_if_empty(doc_id, &entry, &tree).await;
                return Err(err);
            }
        };
        let deleted = edit.deleted;

        let mut entries = self.log.entries.lock().await;
        if tree.graft(&path, edit).is_none() {
            return Ok(rev);
        }
        let seq = ChangeLog::append(&mut entries, doc_id, &rev, deleted);
        drop(entries);
        drop(tree);

        self.log.publish(seq);
        debug!(db = %self.name, doc_id, rev = %rev, seq, "grafted replicated revision");

        Ok(rev)
    }

    async fn find_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        filename: &str,
    ) -> DriverResult<Arc<StoredAttachment>> {
        let entry = self.existing(doc_id).await?;
        let tree = entry.lock().await;
        let index = resolve(&tree, doc_id, rev)?;

        tree.node(index)
            .attachments
            .get(filename)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(format!("{doc_id}/{filename}: missing attachment")))
    }
}

fn encoded_len(node: &RevNode) -> DriverResult<u64> {
    Ok(match &node.body {
        Some(body) => serde_json::to_vec(body.as_ref())?.len() as u64,
        None => 0,
    })
}

/// A database handle of the in-memory driver.
///
/// Handles are cheap to clone; all clones share the same state. A handle
/// obtained before the database was destroyed keeps working on the detached
/// state, but its change feeds fail with [`DriverError::NotFound`].
///
/// # Example
///
/// ```ignore
/// use couchlayer_core::{driver::{Client, Db}, options::GetOptions};
/// use serde_json::json;
///
/// client.create_db("animals").await?;
/// let db = client.db("animals").await?;
///
/// let rev = db.put("cow", json!({ "sound": "moo" })).await?;
/// let doc = db.get("cow", GetOptions::default()).await?;
/// assert_eq!(doc["_rev"], rev.to_string());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDb {
    pub(crate) state: Arc<DatabaseState>,
}

impl MemoryDb {
    pub(crate) fn new(state: Arc<DatabaseState>) -> Self {
        Self { state }
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.state.name
    }
}

#[async_trait]
impl Db for MemoryDb {
    async fn all_docs(&self, options: AllDocsOptions) -> DriverResult<ResultSet> {
        let mut rows = Vec::new();

        for (id, entry) in self.state.snapshot().await {
            let tree = entry.lock().await;
            let Some(index) = tree.live_winner_index() else {
                continue;
            };

            let doc = options
                .include_docs
                .then(|| body::render(&id, &tree, index, &GetOptions::default()));

            rows.push(Row {
                key: Value::String(id.clone()),
                value: json!({ "rev": tree.node(index).rev.to_string() }),
                doc,
                id,
            });
        }

        let total_rows = rows.len();
        if options.descending {
            rows.reverse();
        }

        let precedes_start = |id: &str| match (options.start_key.as_deref(), options.descending) {
            (Some(start), false) => id < start,
            (Some(start), true) => id > start,
            (None, _) => false,
        };
        let past_end = |id: &str| match (options.end_key.as_deref(), options.descending, options.inclusive_end) {
            (Some(end), false, true) => id > end,
            (Some(end), false, false) => id >= end,
            (Some(end), true, true) => id < end,
            (Some(end), true, false) => id <= end,
            (None, _, _) => false,
        };

        let before = rows.iter().take_while(|row| precedes_start(&row.id)).count();
        let range = rows
            .into_iter()
            .skip(before)
            .take_while(|row| !past_end(&row.id))
            .collect::<Vec<_>>();

        let window = Window::new(options.skip, options.limit).apply(range);

        Ok(ResultSet::builder(window.rows)
            .with_offset(before + window.offset)
            .with_total_rows(total_rows)
            .build())
    }

    async fn get(&self, doc_id: &str, options: GetOptions) -> DriverResult<Value> {
        let entry = self.state.existing(doc_id).await?;
        let tree = entry.lock().await;
        let index = resolve(&tree, doc_id, options.rev.as_ref())?;

        Ok(body::render(doc_id, &tree, index, &options))
    }

    async fn create_doc(&self, doc: Value) -> DriverResult<(String, RevId)> {
        let incoming = IncomingDoc::parse(doc)?;
        let doc_id = incoming.id.clone().unwrap_or_else(generate_id);
        let rev = self.state.write(&doc_id, incoming).await?;

        Ok((doc_id, rev))
    }

    async fn put(&self, doc_id: &str, doc: Value) -> DriverResult<RevId> {
        self.state.write(doc_id, IncomingDoc::parse(doc)?).await
    }

    async fn delete(&self, doc_id: &str, rev: &RevId) -> DriverResult<RevId> {
        self.state
            .commit(doc_id, |tree| {
                resolve(tree, doc_id, None)?;
                let parent = tree.check_parent(doc_id, Some(rev))?;
                Ok(Edit::tombstone(parent))
            })
            .await
    }

    async fn stats(&self) -> DriverResult<DbStats> {
        let mut stats = DbStats {
            name: self.state.name.clone(),
            compact_running: false,
            doc_count: 0,
            deleted_count: 0,
            update_seq: self.state.log.last_seq().await,
            disk_size: 0,
            active_size: 0,
        };
        let mut stored = HashSet::new();

        for (_, entry) in self.state.snapshot().await {
            let tree = entry.lock().await;
            let Some(winner) = tree.winner() else {
                continue;
            };

            if winner.deleted {
                stats.deleted_count += 1;
            } else {
                stats.doc_count += 1;
                stats.active_size += encoded_len(winner)?
                    + winner.attachments.values().map(|a| a.length()).sum::<u64>();
            }

            for node in tree.nodes() {
                stats.disk_size += encoded_len(node)?;
                for attachment in node.attachments.values() {
                    if stored.insert(Arc::as_ptr(&attachment.data).cast::<u8>() as usize) {
                        stats.disk_size += attachment.length();
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn compact(&self) -> DriverResult<()> {
        let revs_limit = self.state.settings.config.revs_limit;
        let mut pruned = 0;

        for (_, entry) in self.state.snapshot().await {
            pruned += entry.lock().await.compact(revs_limit);
        }

        info!(db = %self.state.name, revs_limit, pruned, "compacted database");
        Ok(())
    }

    async fn compact_view(&self, ddoc: &str) -> DriverResult<()> {
        let doc_id = format!("_design/{ddoc}");
        let entry = self.state.existing(&doc_id).await?;
        resolve(&*entry.lock().await, &doc_id, None)?;

        debug!(db = %self.state.name, ddoc, "view compaction requested, nothing to compact");
        Ok(())
    }

    async fn view_cleanup(&self) -> DriverResult<()> {
        debug!(db = %self.state.name, "view cleanup requested, nothing to clean up");
        Ok(())
    }

    async fn security(&self) -> DriverResult<Security> {
        Ok(self.state.security.read().await.clone())
    }

    async fn set_security(&self, security: Security) -> DriverResult<()> {
        *self.state.security.write().await = security;
        info!(db = %self.state.name, "updated security document");
        Ok(())
    }

    async fn changes(&self, options: ChangesOptions) -> DriverResult<Box<dyn Changes>> {
        Ok(Box::new(MemoryChanges::open(self.state.clone(), options).await))
    }

    async fn bulk_docs(&self, docs: Vec<Value>, options: BulkOptions) -> DriverResult<Vec<BulkResult>> {
        Ok(bulk::apply(&self.state, docs, &options).await)
    }

    async fn put_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        attachment: Attachment,
    ) -> DriverResult<RevId> {
        validate_doc_id(doc_id)?;
        if attachment.filename.is_empty() {
            return Err(DriverError::BadRequest("Attachment name must not be empty".to_string()));
        }

        let filename = attachment.filename.clone();
        let content_type = attachment.content_type.clone();

        // Content is read before any lock is taken.
        let (data, digest) = tokio::task::spawn_blocking(move || attachment.into_content())
            .await
            .map_err(|err| DriverError::Io { name: filename.clone(), source: std::io::Error::other(err) })??;
        let stored = Arc::new(StoredAttachment::new(content_type, data, digest));

        self.state
            .commit(doc_id, move |tree| {
                let parent = tree.check_parent(doc_id, rev)?;
                let (body, mut attachments) = match parent.map(|index| tree.node(index)) {
                    Some(node) if !node.deleted => (node.body.clone().unwrap_or_default(), (*node.attachments).clone()),
                    _ => (Body::default(), AttachmentMap::new()),
                };
                attachments.insert(filename, stored);

                Ok(Edit::live(parent, body, Arc::new(attachments)))
            })
            .await
    }

    async fn get_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        filename: &str,
    ) -> DriverResult<Attachment> {
        Ok(self
            .state
            .find_attachment(doc_id, rev, filename)
            .await?
            .to_attachment(filename))
    }

    async fn delete_attachment(&self, doc_id: &str, rev: &RevId, filename: &str) -> DriverResult<RevId> {
        self.state
            .commit(doc_id, |tree| {
                resolve(tree, doc_id, None)?;
                let parent = tree.check_parent(doc_id, Some(rev))?;
                let node = parent.map(|index| tree.node(index)).ok_or_else(|| missing(doc_id))?;

                let mut attachments = (*node.attachments).clone();
                if attachments.remove(filename).is_none() {
                    return Err(DriverError::NotFound(format!("{doc_id}/{filename}: missing attachment")));
                }

                Ok(Edit::live(parent, node.body.clone().unwrap_or_default(), Arc::new(attachments)))
            })
            .await
    }

    async fn query(&self, ddoc: &str, view: &str, _options: Value) -> DriverResult<ResultSet> {
        Err(DriverError::NotImplemented(format!(
            "view {ddoc}/{view}: views are not supported by the memory driver"
        )))
    }

    fn as_finder(&self) -> Option<&dyn Finder> {
        Some(self)
    }

    fn as_attachment_metaer(&self) -> Option<&dyn AttachmentMetaer> {
        Some(self)
    }

    fn as_rever(&self) -> Option<&dyn Rever> {
        Some(self)
    }

    fn as_flusher(&self) -> Option<&dyn DbFlusher> {
        Some(self)
    }

    fn as_copier(&self) -> Option<&dyn Copier> {
        Some(self)
    }
}

#[async_trait]
impl AttachmentMetaer for MemoryDb {
    async fn get_attachment_meta(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        filename: &str,
    ) -> DriverResult<AttachmentMeta> {
        Ok(self.state.find_attachment(doc_id, rev, filename).await?.meta())
    }
}

#[async_trait]
impl Rever for MemoryDb {
    async fn rev(&self, doc_id: &str) -> DriverResult<RevId> {
        let entry = self.state.existing(doc_id).await?;
        let tree = entry.lock().await;
        let index = resolve(&tree, doc_id, None)?;

        Ok(tree.node(index).rev.clone())
    }
}

#[async_trait]
impl DbFlusher for MemoryDb {
    async fn flush(&self) -> DriverResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Copier for MemoryDb {
    async fn copy(&self, target_id: &str, source_id: &str, options: CopyOptions) -> DriverResult<RevId> {
        validate_doc_id(target_id)?;

        // The source is released before the target is locked.
        let (body, attachments) = {
            let entry = self.state.existing(source_id).await?;
            let tree = entry.lock().await;
            let index = resolve(&tree, source_id, options.source_rev.as_ref())?;
            let node = tree.node(index);

            if node.deleted {
                return Err(deleted(source_id));
            }

            (node.body.clone().unwrap_or_default(), node.attachments.clone())
        };

        let target_rev = options.target_rev;

        self.state
            .commit(target_id, move |tree| {
                let parent = tree.check_parent(target_id, target_rev.as_ref())?;
                Ok(Edit::live(parent, body, attachments))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, Validator};
    use couchlayer_core::attachment::Md5Sum;

    fn db() -> MemoryDb {
        MemoryDb::new(Arc::new(DatabaseState::new("test", Arc::new(Settings::default()))))
    }

    #[tokio::test]
    async fn put_get_update_cycle() {
        let db = db();

        let first = db.put("a", json!({ "x": 1 })).await.unwrap();
        let doc = db.get("a", GetOptions::default()).await.unwrap();
        assert_eq!(doc, json!({ "_id": "a", "_rev": first.to_string(), "x": 1 }));

        let second = db.put("a", json!({ "_rev": first.to_string(), "x": 2 })).await.unwrap();
        assert_eq!(second.generation, 2);

        let stale = db.put("a", json!({ "_rev": first.to_string(), "x": 3 })).await;
        assert!(matches!(stale, Err(DriverError::Conflict(_))));

        let old = db.get("a", GetOptions::rev(first.clone())).await.unwrap();
        assert_eq!(old["x"], 1);
    }

    #[tokio::test]
    async fn delete_then_recreate() {
        let db = db();
        let first = db.put("a", json!({ "x": 1 })).await.unwrap();

        let tombstone = db.delete("a", &first).await.unwrap();
        assert!(tombstone.generation > first.generation);
        assert!(db.get("a", GetOptions::default()).await.unwrap_err().is_not_found());
        assert!(db.delete("a", &tombstone).await.unwrap_err().is_not_found());

        let gone = db.get("a", GetOptions::rev(tombstone.clone())).await.unwrap();
        assert_eq!(gone["_deleted"], true);

        let recreated = db.put("a", json!({ "x": 2 })).await.unwrap();
        assert_eq!(recreated.generation, tombstone.generation + 1);
    }

    #[tokio::test]
    async fn missing_documents_and_bad_ids() {
        let db = db();

        assert!(db.get("nope", GetOptions::default()).await.unwrap_err().is_not_found());
        assert!(matches!(db.put("_secret", json!({})).await, Err(DriverError::BadRequest(_))));
        assert!(matches!(
            db.put("a", json!({ "_id": "b" })).await,
            Err(DriverError::BadRequest(_))
        ));

        // A rejected first write leaves no document behind.
        assert!(db.put("c", json!({ "_rev": "1-abc" })).await.unwrap_err().is_conflict());
        assert!(db.all_docs(AllDocsOptions::default()).await.unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn revs_and_conflicts_are_injected() {
        let db = db();
        let first = db.put("a", json!({ "x": 1 })).await.unwrap();
        db.put("a", json!({ "_rev": first.to_string(), "x": 2 })).await.unwrap();

        let replicated = json!({
            "_id": "a",
            "_rev": "2-zzzz",
            "_revisions": { "start": 2, "ids": ["zzzz", first.hash] },
            "x": 9,
        });
        let results = db.bulk_docs(vec![replicated], BulkOptions { new_edits: false }).await.unwrap();
        assert!(results[0].result.is_ok());

        let options = GetOptions { revs: true, conflicts: true, ..GetOptions::default() };
        let doc = db.get("a", options).await.unwrap();

        assert_eq!(doc["_rev"], "2-zzzz");
        assert_eq!(doc["_revisions"], json!({ "start": 2, "ids": ["zzzz", first.hash] }));
        assert_eq!(doc["_conflicts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attachments_round_trip_through_revisions() {
        let db = db();
        let attachment = Attachment::from_bytes("hello.txt", "text/plain", b"hello".to_vec());

        let rev = db.put_attachment("a", None, attachment).await.unwrap();
        let doc = db.get("a", GetOptions::default()).await.unwrap();
        assert_eq!(doc["_attachments"]["hello.txt"]["stub"], true);
        assert_eq!(doc["_attachments"]["hello.txt"]["length"], 5);

        let fetched = db.get_attachment("a", None, "hello.txt").await.unwrap();
        assert_eq!(&*fetched.bytes().unwrap(), b"hello");

        let meta = db.get_attachment_meta("a", Some(&rev), "hello.txt").await.unwrap();
        assert_eq!(meta.digest, Md5Sum::compute(b"hello"));

        // Updating the body with a stub keeps the attachment.
        let body = json!({
            "_rev": rev.to_string(),
            "y": 1,
            "_attachments": { "hello.txt": { "stub": true } },
        });
        let rev = db.put("a", body).await.unwrap();
        assert!(db.get_attachment("a", None, "hello.txt").await.is_ok());

        let rev = db.delete_attachment("a", &rev, "hello.txt").await.unwrap();
        assert!(db.get_attachment("a", None, "hello.txt").await.unwrap_err().is_not_found());
        assert!(db.delete_attachment("a", &rev, "hello.txt").await.unwrap_err().is_not_found());
        assert_eq!(db.get("a", GetOptions::default()).await.unwrap()["y"], 1);
    }

    #[tokio::test]
    async fn all_docs_ranges() {
        let db = db();
        for id in ["a", "b", "c", "d", "e"] {
            db.put(id, json!({})).await.unwrap();
        }

        let ids = |set: &ResultSet| set.rows.iter().map(|row| row.id.clone()).collect::<Vec<_>>();

        let options = AllDocsOptions { start_key: Some("b".into()), end_key: Some("d".into()), ..Default::default() };
        let set = db.all_docs(options).await.unwrap();
        assert_eq!(ids(&set), ["b", "c", "d"]);
        assert_eq!(set.offset, 1);
        assert_eq!(set.total_rows, 5);

        let options = AllDocsOptions { end_key: Some("d".into()), inclusive_end: false, ..Default::default() };
        assert_eq!(ids(&db.all_docs(options).await.unwrap()), ["a", "b", "c"]);

        let options = AllDocsOptions { descending: true, start_key: Some("d".into()), limit: Some(2), ..Default::default() };
        assert_eq!(ids(&db.all_docs(options).await.unwrap()), ["d", "c"]);

        let options = AllDocsOptions { include_docs: true, skip: 4, ..Default::default() };
        let set = db.all_docs(options).await.unwrap();
        assert_eq!(set.rows[0].doc.as_ref().unwrap()["_id"], "e");
        assert_eq!(set.offset, 4);
    }

    #[tokio::test]
    async fn stats_count_live_and_deleted() {
        let db = db();
        let rev = db.put("a", json!({ "x": 1 })).await.unwrap();
        db.put("b", json!({ "x": 1 })).await.unwrap();
        db.delete("a", &rev).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.doc_count, 1);
        assert_eq!(stats.deleted_count, 1);
        assert_eq!(stats.update_seq, 3);
        assert!(stats.disk_size >= stats.active_size);
    }

    #[tokio::test]
    async fn compaction_prunes_history() {
        let settings = Settings { config: MemoryConfig { revs_limit: 1 }, validators: Vec::new() };
        let db = MemoryDb::new(Arc::new(DatabaseState::new("test", Arc::new(settings))));

        let first = db.put("a", json!({ "x": 1 })).await.unwrap();
        let second = db.put("a", json!({ "_rev": first.to_string(), "x": 2 })).await.unwrap();
        db.compact().await.unwrap();

        assert!(db.get("a", GetOptions::rev(first)).await.unwrap_err().is_not_found());
        assert_eq!(db.get("a", GetOptions::default()).await.unwrap()["_rev"], second.to_string());
    }

    #[tokio::test]
    async fn validators_reject_writes() {
        let validator: Validator = Arc::new(|doc: &Value| match doc.get("name") {
            Some(_) => Ok(()),
            None => Err("name is required".to_string()),
        });
        let settings = Settings { config: MemoryConfig::default(), validators: vec![validator] };
        let db = MemoryDb::new(Arc::new(DatabaseState::new("test", Arc::new(settings))));

        assert!(matches!(db.put("a", json!({})).await, Err(DriverError::Forbidden(_))));
        assert!(db.put("a", json!({ "name": "cow" })).await.is_ok());
        assert_eq!(db.state.log.last_seq().await, 1);
    }

    #[tokio::test]
    async fn rejected_first_writes_leave_no_entry() {
        let db = db();

        for n in 0..100 {
            let stale = db.put(&format!("ghost{n}"), json!({ "_rev": "1-abc" })).await;
            assert!(stale.unwrap_err().is_conflict());
        }
        let stub = json!({ "_attachments": { "a.txt": { "stub": true } } });
        assert!(matches!(db.put("stub", stub).await, Err(DriverError::BadRequest(_))));
        assert!(db.delete("never", &RevId::new(1, "abc")).await.unwrap_err().is_not_found());

        assert!(db.state.snapshot().await.is_empty());
        assert_eq!(db.stats().await.unwrap().doc_count, 0);
    }

    #[tokio::test]
    async fn forbidden_design_doc_is_missing_not_deleted() {
        let validator: Validator = Arc::new(|_: &Value| Err("read only".to_string()));
        let settings = Settings { config: MemoryConfig::default(), validators: vec![validator] };
        let db = MemoryDb::new(Arc::new(DatabaseState::new("test", Arc::new(settings))));

        assert!(matches!(db.put("_design/x", json!({})).await, Err(DriverError::Forbidden(_))));

        let err = db.compact_view("x").await.unwrap_err();
        assert!(matches!(&err, DriverError::NotFound(reason) if reason.ends_with("missing")));
        assert!(db.state.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn failed_first_write_does_not_lose_a_concurrent_one() {
        let db = Arc::new(db());

        let tasks = (0..50)
            .map(|n| {
                let db = db.clone();
                tokio::spawn(async move {
                    let body = match n % 2 {
                        0 => json!({ "_rev": "1-abc" }),
                        _ => json!({ "n": n }),
                    };
                    db.put("contested", body).await
                })
            })
            .collect::<Vec<_>>();

        let mut committed = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                committed += 1;
            }
        }

        assert_eq!(committed, 1);
        assert_eq!(db.state.snapshot().await.len(), 1);
        assert!(db.get("contested", GetOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn copy_and_rev() {
        let db = db();
        let source = db.put("a", json!({ "x": 1 })).await.unwrap();

        let copied = db.copy("b", "a", CopyOptions::default()).await.unwrap();
        assert_eq!(db.rev("b").await.unwrap(), copied);
        assert_eq!(db.rev("a").await.unwrap(), source);
        assert_eq!(db.get("b", GetOptions::default()).await.unwrap()["x"], 1);

        assert!(db.copy("b", "a", CopyOptions::default()).await.unwrap_err().is_conflict());
        let options = CopyOptions { target_rev: Some(copied), ..Default::default() };
        assert!(db.copy("b", "a", options).await.is_ok());
    }

    #[tokio::test]
    async fn views_and_design_docs() {
        let db = db();

        assert!(db.compact_view("app").await.unwrap_err().is_not_found());
        db.put("_design/app", json!({ "views": {} })).await.unwrap();
        assert!(db.compact_view("app").await.is_ok());
        assert!(db.query("app", "by_name", json!({})).await.unwrap_err().is_not_implemented());
    }
}
