//! Per-document revision trees.
//!
//! Each document owns an arena of immutable [`RevNode`]s. Parent links are arena
//! indices, so the tree has no ownership cycles and compaction is a reachability
//! sweep followed by an index remap. Parents are always inserted before their
//! children, which keeps arena order topological.
//!
//! The winning revision is the non-deleted leaf with the greatest generation,
//! ties broken by the lexicographically greatest hash. When every leaf is
//! deleted, the greatest deleted leaf wins by the same order and the document
//! counts as deleted. The winner is always recomputed from the leaf set, never
//! cached.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use md5::{Digest, Md5};
use serde_json::{Map, Value};

use couchlayer_core::{
    error::{DriverError, DriverResult},
    revision::RevId,
};

use crate::attachments::StoredAttachment;

pub(crate) type Body = Arc<Map<String, Value>>;
pub(crate) type AttachmentMap = BTreeMap<String, Arc<StoredAttachment>>;

/// A single revision of a document.
#[derive(Debug, Clone)]
pub(crate) struct RevNode {
    pub rev: RevId,
    pub parent: Option<usize>,
    pub deleted: bool,
    /// `None` for tombstones, for ancestors pruned by compaction, and for
    /// ancestors only known by id from a replicated revision history.
    pub body: Option<Body>,
    pub attachments: Arc<AttachmentMap>,
}

impl RevNode {
    /// Whether the content of this revision can still be read.
    pub fn is_available(&self) -> bool {
        self.deleted || self.body.is_some()
    }
}

/// A revision about to be appended to a tree.
#[derive(Debug)]
pub(crate) struct Edit {
    pub parent: Option<usize>,
    pub deleted: bool,
    pub body: Option<Body>,
    pub attachments: Arc<AttachmentMap>,
}

impl Edit {
    /// A live revision.
    pub fn live(parent: Option<usize>, body: Body, attachments: Arc<AttachmentMap>) -> Self {
        Self { parent, deleted: false, body: Some(body), attachments }
    }

    /// A tombstone. The body and attachments are discarded.
    pub fn tombstone(parent: Option<usize>) -> Self {
        Self { parent, deleted: true, body: None, attachments: Arc::default() }
    }

    /// Computes the identifier this edit will carry once appended to `tree`.
    ///
    /// The hash is derived from the parent revision, the deletion flag, the body
    /// (serialized with sorted keys) and each attachment's name, content type and
    /// digest, so replaying the same edit on two replicas yields the same revision.
    pub fn revision(&self, tree: &RevisionTree) -> DriverResult<RevId> {
        let parent = self.parent.map(|index| &tree.node(index).rev);

        let mut hasher = Md5::new();
        if let Some(parent) = parent {
            hasher.update(parent.to_string().as_bytes());
        }
        hasher.update([self.deleted as u8]);
        if let Some(body) = &self.body {
            hasher.update(serde_json::to_vec(body.as_ref())?);
        }
        for (name, attachment) in self.attachments.iter() {
            hasher.update(name.as_bytes());
            hasher.update(attachment.content_type.as_bytes());
            hasher.update(attachment.digest.0);
        }

        let hash = hex::encode(hasher.finalize());

        match parent {
            Some(parent) => parent.child(hash),
            None => Ok(RevId::new(1, hash)),
        }
    }
}

/// The revision tree of one document.
#[derive(Debug, Default)]
pub(crate) struct RevisionTree {
    nodes: Vec<RevNode>,
    index: HashMap<RevId, usize>,
    leaves: BTreeSet<usize>,
}

impl RevisionTree {
    /// A tree with no revisions, i.e. a document that was never written.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &RevNode {
        &self.nodes[index]
    }

    pub fn get(&self, rev: &RevId) -> Option<&RevNode> {
        self.index.get(rev).map(|index| &self.nodes[*index])
    }

    pub fn index_of(&self, rev: &RevId) -> Option<usize> {
        self.index.get(rev).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RevNode> {
        self.nodes.iter()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &RevNode> {
        self.leaves.iter().map(|index| &self.nodes[*index])
    }

    /// Index of the winning leaf. O(leaves).
    pub fn winner_index(&self) -> Option<usize> {
        self.leaves
            .iter()
            .copied()
            .max_by(|a, b| {
                let (a, b) = (&self.nodes[*a], &self.nodes[*b]);
                (!a.deleted, &a.rev).cmp(&(!b.deleted, &b.rev))
            })
    }

    pub fn winner(&self) -> Option<&RevNode> {
        self.winner_index().map(|index| &self.nodes[index])
    }

    /// The winner, unless the document is absent or deleted.
    pub fn live_winner(&self) -> Option<&RevNode> {
        self.winner().filter(|node| !node.deleted)
    }

    pub fn live_winner_index(&self) -> Option<usize> {
        self.winner_index().filter(|index| !self.nodes[*index].deleted)
    }

    /// Whether the document exists but every leaf is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.winner().is_some_and(|node| node.deleted)
    }

    /// Non-deleted leaves other than the winner, greatest first.
    pub fn conflicts(&self) -> Vec<RevId> {
        let winner = self.winner_index();

        let mut conflicts = self.leaves
            .iter()
            .filter(|index| Some(**index) != winner)
            .map(|index| &self.nodes[*index])
            .filter(|node| !node.deleted)
            .map(|node| node.rev.clone())
            .collect::<Vec<_>>();

        conflicts.sort_by(|a, b| b.cmp(a));
        conflicts
    }

    /// Revision ids from `index` back to its root, newest first.
    pub fn ancestry(&self, index: usize) -> Vec<RevId> {
        let mut revs = Vec::new();
        let mut current = Some(index);

        while let Some(index) = current {
            revs.push(self.nodes[index].rev.clone());
            current = self.nodes[index].parent;
        }

        revs
    }

    /// Resolves the parent for a new edit under optimistic concurrency.
    ///
    /// The parent must name the current winning revision. An empty parent is
    /// accepted only when the document does not exist yet, or when it is deleted,
    /// in which case the edit extends the winning tombstone.
    pub fn check_parent(&self, doc_id: &str, parent: Option<&RevId>) -> DriverResult<Option<usize>> {
        let winner = self.winner_index();

        match (winner, parent) {
            (None, None) => Ok(None),
            (Some(index), None) if self.nodes[index].deleted => Ok(Some(index)),
            (Some(index), Some(rev)) if self.nodes[index].rev == *rev => Ok(Some(index)),
            (None, Some(rev)) => Err(DriverError::Conflict(format!("{doc_id}: revision {rev} does not exist"))),
            (Some(_), None) => Err(DriverError::Conflict(format!("{doc_id}: document exists, a revision is required"))),
            (Some(index), Some(rev)) => Err(DriverError::Conflict(format!(
                "{doc_id}: revision {rev} is not the current revision {}",
                self.nodes[index].rev,
            ))),
        }
    }

    /// Appends a revision and returns its index.
    ///
    /// # Errors
    ///
    /// [`DriverError::Conflict`] if `rev` is already in the tree.
    pub fn insert(&mut self, edit: Edit, rev: RevId) -> DriverResult<usize> {
        if self.index.contains_key(&rev) {
            return Err(DriverError::Conflict(format!("revision {rev} already exists")));
        }

        Ok(self.push(RevNode {
            rev,
            parent: edit.parent,
            deleted: edit.deleted,
            body: edit.body,
            attachments: edit.attachments,
        }))
    }

    fn push(&mut self, node: RevNode) -> usize {
        let index = self.nodes.len();

        if let Some(parent) = node.parent {
            self.leaves.remove(&parent);
        }

        self.index.insert(node.rev.clone(), index);
        self.nodes.push(node);
        self.leaves.insert(index);

        index
    }

    /// Grafts a replicated revision given with its history (`path`, newest first).
    ///
    /// Ancestors missing from the tree are inserted as bodiless stubs, attached
    /// below the newest ancestor the tree already knows (or as a new root). The
    /// edit's own `parent` is ignored. Returns `None` if the revision is already
    /// present.
    pub fn graft(&mut self, path: &[RevId], edit: Edit) -> Option<usize> {
        let (leaf, history) = path.split_first()?;

        if self.index.contains_key(leaf) {
            return None;
        }

        let anchor = history.iter().position(|rev| self.index.contains_key(rev));
        let (mut parent, missing) = match anchor {
            Some(position) => (Some(self.index[&history[position]]), &history[..position]),
            None => (None, history),
        };

        for rev in missing.iter().rev() {
            parent = Some(self.push(RevNode {
                rev: rev.clone(),
                parent,
                deleted: false,
                body: None,
                attachments: Arc::default(),
            }));
        }

        Some(self.push(RevNode {
            rev: leaf.clone(),
            parent,
            deleted: edit.deleted,
            body: edit.body,
            attachments: edit.attachments,
        }))
    }

    /// Prunes history and returns the number of nodes removed.
    ///
    /// Every leaf is kept together with up to `revs_limit - 1` ancestors; older
    /// ancestors are dropped and the oldest kept one becomes a root. Non-leaf
    /// nodes lose their bodies and attachments.
    pub fn compact(&mut self, revs_limit: usize) -> usize {
        let revs_limit = revs_limit.max(1);
        let mut keep = HashSet::new();

        for leaf in &self.leaves {
            let mut current = Some(*leaf);
            let mut depth = 0;

            while let Some(index) = current {
                if depth == revs_limit {
                    break;
                }
                keep.insert(index);
                current = self.nodes[index].parent;
                depth += 1;
            }
        }

        let before = self.nodes.len();
        let mut remap = HashMap::with_capacity(keep.len());
        let mut compacted = RevisionTree::default();

        for (old_index, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if !keep.contains(&old_index) {
                continue;
            }

            let is_leaf = self.leaves.contains(&old_index);
            let parent = node.parent.and_then(|parent| remap.get(&parent).copied());

            let new_index = compacted.push(RevNode {
                parent,
                body: if is_leaf { node.body } else { None },
                attachments: if is_leaf { node.attachments } else { Arc::default() },
                ..node
            });
            remap.insert(old_index, new_index);
        }

        *self = compacted;
        before - self.nodes.len()
    }
}
