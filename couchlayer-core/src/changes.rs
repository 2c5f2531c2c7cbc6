//! Change feeds.
//!
//! A [`Changes`] feed yields [`Change`] entries in update-sequence order. A
//! non-continuous feed ends with `Ok(None)`. A continuous feed waits for new
//! commits until it is closed through its [`CloseHandle`], after which `next`
//! reports [`DriverError::Canceled`], so consumers can tell cancellation apart from
//! the end of the data.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use futures::{Stream, stream};
use tokio::sync::watch;

use crate::{
    error::{DriverError, DriverResult},
    types::Change,
};

/// A feed of changes.
#[async_trait]
pub trait Changes: Send + Debug {
    /// Returns the next change.
    ///
    /// `Ok(None)` marks the end of a non-continuous feed. A closed feed returns
    /// [`DriverError::Canceled`].
    async fn next(&mut self) -> DriverResult<Option<Change>>;

    /// Returns a handle that closes this feed from any task.
    fn close_handle(&self) -> CloseHandle;

    /// Closes the feed, releasing a consumer blocked in [`Changes::next`].
    fn close(&self) {
        self.close_handle().close();
    }
}

/// Cloneable handle that closes a feed.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Creates a fresh, open handle.
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed: Arc::new(closed) }
    }

    /// Closes the feed. Closing twice is a no-op.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether the feed has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Subscribes to the close signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a feed into a [`Stream`].
///
/// The stream ends after `Ok(None)` and after yielding the first error, which
/// includes [`DriverError::Canceled`] once the feed is closed.
pub fn into_stream(feed: Box<dyn Changes>) -> impl Stream<Item = DriverResult<Change>> + Send {
    stream::unfold(Some(feed), |state| async move {
        let mut feed = state?;

        match feed.next().await {
            Ok(Some(change)) => Some((Ok(change), Some(feed))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevId;
    use futures::StreamExt;

    #[derive(Debug)]
    struct VecFeed {
        changes: Vec<Change>,
        close: CloseHandle,
    }

    #[async_trait]
    impl Changes for VecFeed {
        async fn next(&mut self) -> DriverResult<Option<Change>> {
            if self.close.is_closed() {
                return Err(DriverError::Canceled);
            }

            if self.changes.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.changes.remove(0)))
            }
        }

        fn close_handle(&self) -> CloseHandle {
            self.close.clone()
        }
    }

    fn change(seq: u64) -> Change {
        Change { seq, id: format!("doc{seq}"), rev: RevId::new(1, "a"), deleted: false, doc: None }
    }

    #[tokio::test]
    async fn stream_ends_at_end_of_data() {
        let feed = VecFeed { changes: vec![change(1), change(2)], close: CloseHandle::new() };

        let seqs = into_stream(Box::new(feed))
            .map(|change| change.unwrap().seq)
            .collect::<Vec<_>>()
            .await;

        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn closed_feed_reports_cancellation() {
        let feed = VecFeed { changes: vec![change(1)], close: CloseHandle::new() };
        feed.close();

        let items = into_stream(Box::new(feed)).collect::<Vec<_>>().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DriverError::Canceled)));
    }
}
