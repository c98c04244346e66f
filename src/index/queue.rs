use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::index::update::NodePropertyUpdate;

/// Multi-producer FIFO of pending node-property updates.
///
/// NOTE: unbounded queue expected here. There is deliberately no
/// backpressure, so committers never block behind a slow populator; memory
/// exhaustion is fatal to the host process.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    inner: Mutex<VecDeque<NodePropertyUpdate>>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one update. Never blocks, never fails; the update is visible
    /// to the draining consumer as soon as this returns.
    pub fn enqueue(&self, update: NodePropertyUpdate) {
        self.inner.lock().push_back(update);
    }

    pub fn extend<I: IntoIterator<Item = NodePropertyUpdate>>(&self, updates: I) {
        let mut inner = self.inner.lock();
        inner.extend(updates);
    }

    /// Removes the longest prefix of updates matching `pred`, in FIFO order,
    /// stopping at the first non-match without consuming it.
    pub fn drain_while<P>(&self, mut pred: P) -> Vec<NodePropertyUpdate>
    where
        P: FnMut(&NodePropertyUpdate) -> bool,
    {
        let mut inner = self.inner.lock();
        let mut drained = Vec::new();
        while let Some(front) = inner.front() {
            if !pred(front) {
                break;
            }
            if let Some(update) = inner.pop_front() {
                drained.push(update);
            }
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
