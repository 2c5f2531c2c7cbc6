//! The per-database change log and its feeds.
//!
//! Every committed revision appends one entry. Sequences start at 1 and
//! increase by one per entry, so the entry with sequence `n` sits at index
//! `n - 1`. The log is never truncated.

use std::sync::Arc;

use async_trait::async_trait;
use mea::mutex::Mutex;
use tokio::sync::watch;
use tracing::debug;

use couchlayer_core::{
    changes::{Changes, CloseHandle},
    error::{DriverError, DriverResult},
    options::ChangesOptions,
    revision::RevId,
    types::Change,
};

use crate::database::DatabaseState;

/// Append-only change log.
///
/// Writers hold `entries` while inserting into a revision tree, so the order of
/// the log matches the order in which revisions became visible.
#[derive(Debug)]
pub(crate) struct ChangeLog {
    pub entries: Mutex<Vec<Change>>,
    updates: watch::Sender<u64>,
}

impl ChangeLog {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self { entries: Mutex::new(Vec::new()), updates }
    }

    /// Appends an entry and returns its sequence.
    pub fn append(entries: &mut Vec<Change>, doc_id: &str, rev: &RevId, deleted: bool) -> u64 {
        let seq = entries.len() as u64 + 1;
        entries.push(Change {
            seq,
            id: doc_id.to_string(),
            rev: rev.clone(),
            deleted,
            doc: None,
        });
        seq
    }

    /// Wakes feeds waiting for entries up to `seq`.
    pub fn publish(&self, seq: u64) {
        self.updates.send_replace(seq);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub async fn last_seq(&self) -> u64 {
        self.entries.lock().await.len() as u64
    }

    /// The first entry after `cursor`, unless it lies beyond `until`.
    pub async fn entry_after(&self, cursor: u64, until: Option<u64>) -> Option<Change> {
        let entries = self.entries.lock().await;
        let index = usize::try_from(cursor).ok()?;

        entries
            .get(index)
            .filter(|change| until.is_none_or(|until| change.seq <= until))
            .cloned()
    }
}

/// A change feed over one database.
///
/// A non-continuous feed reports the entries that existed when it was opened
/// and then ends. A continuous feed keeps waiting for new commits until it is
/// closed or the database is destroyed.
#[derive(Debug)]
pub struct MemoryChanges {
    state: Arc<DatabaseState>,
    cursor: u64,
    until: Option<u64>,
    include_docs: bool,
    remaining: Option<usize>,
    updates: watch::Receiver<u64>,
    close: CloseHandle,
    closed: watch::Receiver<bool>,
    destroyed: watch::Receiver<bool>,
}

impl MemoryChanges {
    pub(crate) async fn open(state: Arc<DatabaseState>, options: ChangesOptions) -> Self {
        let updates = state.log.subscribe();
        let destroyed = state.destroyed.subscribe();
        let until = if options.continuous {
            None
        } else {
            Some(state.log.last_seq().await)
        };
        let close = CloseHandle::new();
        let closed = close.subscribe();

        debug!(db = %state.name, since = options.since, continuous = options.continuous, "opened change feed");

        Self {
            state,
            cursor: options.since,
            until,
            include_docs: options.include_docs,
            remaining: options.limit,
            updates,
            close,
            closed,
            destroyed,
        }
    }
}

#[async_trait]
impl Changes for MemoryChanges {
    async fn next(&mut self) -> DriverResult<Option<Change>> {
        loop {
            if self.close.is_closed() {
                return Err(DriverError::Canceled);
            }
            if self.remaining == Some(0) {
                return Ok(None);
            }
            if *self.destroyed.borrow() {
                return Err(DriverError::NotFound(format!("database {} was destroyed", self.state.name)));
            }

            // Mark the current sequence as seen before reading, so a commit that
            // lands after the read still wakes the wait below.
            self.updates.borrow_and_update();

            if let Some(mut change) = self.state.log.entry_after(self.cursor, self.until).await {
                self.cursor = change.seq;
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                if self.include_docs {
                    change.doc = self.state.current_doc(&change.id).await;
                }
                return Ok(Some(change));
            }

            if self.until.is_some() {
                return Ok(None);
            }

            tokio::select! {
                changed = self.updates.changed() => {
                    if changed.is_err() {
                        return Err(DriverError::Canceled);
                    }
                }
                _ = self.closed.changed() => {}
                _ = self.destroyed.changed() => {}
            }
        }
    }

    fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }
}
