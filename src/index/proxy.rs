//! The flippable index proxy.
//!
//! One slot holds the current delegate for an index; update delivery runs
//! under the read side of the slot lock and flips run under the write side
//! (the flip barrier). While a flip is in progress committers wait at the
//! barrier, so no update can be lost between the terminal queue drain and
//! the installation of the online delegate.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{KernelError, Result};
use crate::index::queue::UpdateQueue;
use crate::index::state::{next_state, IndexEvent, IndexState, IndexStateKind, Transition};
use crate::index::update::NodePropertyUpdate;
use crate::index::writer::IndexWriter;
use crate::model::{IndexableValue, NodeId};
use crate::schema::cache::SchemaStateCache;
use crate::schema::descriptor::IndexDescriptor;
use crate::schema::rules::SchemaStore;

/// Human-readable record of why a population failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPopulationFailure {
    message: String,
}

impl IndexPopulationFailure {
    pub fn from_error(error: &KernelError) -> Self {
        Self {
            message: error.to_string(),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Placeholder installed by the preemptive failure flip, before the job
    /// has recorded the actual cause.
    pub fn unknown() -> Self {
        Self {
            message: "population failed before a cause was recorded".to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_error(&self, descriptor: IndexDescriptor) -> KernelError {
        KernelError::IndexPopulationFailed {
            descriptor,
            cause: self.message.clone(),
        }
    }
}

enum Delegate {
    Populating { queue: Arc<UpdateQueue> },
    Online { writer: Mutex<Box<dyn IndexWriter>> },
    Failed { failure: IndexPopulationFailure },
    Closed,
}

impl Delegate {
    fn state_kind(&self) -> IndexStateKind {
        match self {
            Delegate::Populating { .. } => IndexStateKind::Populating,
            Delegate::Online { .. } => IndexStateKind::Online,
            Delegate::Failed { .. } => IndexStateKind::Failed,
            // A closed proxy behaves like a dropped online index.
            Delegate::Closed => IndexStateKind::Online,
        }
    }
}

/// Collaborators a successful flip must touch under the barrier.
pub struct FlipContext {
    pub rules: Arc<SchemaStore>,
    pub cache: Arc<SchemaStateCache>,
}

/// Returned when a flip to online does not complete.
///
/// `writer` is handed back to the caller for teardown; `None` means the
/// writer was already closed successfully before the failing step.
pub struct FlipFailure {
    pub cause: KernelError,
    pub writer: Option<Box<dyn IndexWriter>>,
}

pub struct FlippableProxy {
    descriptor: IndexDescriptor,
    slot: RwLock<Delegate>,
}

impl FlippableProxy {
    pub fn new_populating(descriptor: IndexDescriptor, queue: Arc<UpdateQueue>) -> Self {
        Self {
            descriptor,
            slot: RwLock::new(Delegate::Populating { queue }),
        }
    }

    pub fn new_failed(descriptor: IndexDescriptor, failure: IndexPopulationFailure) -> Self {
        Self {
            descriptor,
            slot: RwLock::new(Delegate::Failed { failure }),
        }
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        self.descriptor
    }

    pub fn state(&self) -> IndexState {
        match &*self.slot.read() {
            Delegate::Populating { .. } => IndexState::Populating,
            Delegate::Online { .. } | Delegate::Closed => IndexState::Online,
            Delegate::Failed { failure } => IndexState::Failed {
                message: failure.message().to_string(),
            },
        }
    }

    /// Delivers committed updates to whatever delegate is current.
    ///
    /// Populating: append to the shared queue. Online: apply to the writer.
    /// Failed or closed: reject with the stored cause.
    pub fn apply_updates<I>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = NodePropertyUpdate>,
    {
        let slot = self.slot.read();
        match &*slot {
            Delegate::Populating { queue } => {
                queue.extend(updates);
                Ok(())
            }
            Delegate::Online { writer } => writer.lock().apply(updates.into_iter().collect()),
            Delegate::Failed { failure } => Err(failure.to_error(self.descriptor)),
            Delegate::Closed => Err(KernelError::IndexProxyAlreadyClosed(self.descriptor)),
        }
    }

    pub fn lookup(&self, value: &IndexableValue) -> Result<Vec<NodeId>> {
        let slot = self.slot.read();
        match &*slot {
            Delegate::Populating { .. } => Err(KernelError::InvalidArgument(format!(
                "index {} is still populating",
                self.descriptor
            ))),
            Delegate::Online { writer } => Ok(writer.lock().lookup(value)),
            Delegate::Failed { failure } => Err(failure.to_error(self.descriptor)),
            Delegate::Closed => Err(KernelError::IndexProxyAlreadyClosed(self.descriptor)),
        }
    }

    /// Atomically completes a population: drains the residual queue into the
    /// writer, closes it as successful, durably marks the rule online and
    /// clears derived schema state, then installs the online delegate.
    ///
    /// On failure the slot is preemptively flipped to a generic failed
    /// delegate before returning, so no update can reach the dead populating
    /// delegate while the caller works out the cause; the caller then
    /// re-flips with the refined failure via [`FlippableProxy::flip_to_failed`].
    pub fn flip_to_online(
        &self,
        mut writer: Box<dyn IndexWriter>,
        queue: &UpdateQueue,
        context: &FlipContext,
    ) -> std::result::Result<(), FlipFailure> {
        let mut slot = self.slot.write();
        if let Err(cause) = next_state(self.descriptor, slot.state_kind(), IndexEvent::FlipOk) {
            // Terminal delegate already installed; leave it untouched.
            return Err(FlipFailure {
                cause,
                writer: Some(writer),
            });
        }

        let residual = queue.drain_while(|_| true);
        if !residual.is_empty() {
            if let Err(cause) = writer.apply(residual) {
                *slot = Delegate::Failed {
                    failure: IndexPopulationFailure::unknown(),
                };
                return Err(FlipFailure {
                    cause,
                    writer: Some(writer),
                });
            }
        }
        if let Err(cause) = writer.close(true) {
            *slot = Delegate::Failed {
                failure: IndexPopulationFailure::unknown(),
            };
            return Err(FlipFailure {
                cause,
                writer: Some(writer),
            });
        }
        if let Err(cause) = context.rules.set_online(self.descriptor) {
            *slot = Delegate::Failed {
                failure: IndexPopulationFailure::unknown(),
            };
            // The writer is already closed; teardown must not close it again.
            return Err(FlipFailure {
                cause,
                writer: None,
            });
        }
        context.cache.clear();
        *slot = Delegate::Online {
            writer: Mutex::new(writer),
        };
        Ok(())
    }

    /// Unconditionally installs a failed delegate under the barrier.
    ///
    /// Accepts `Failed -> Failed`, refining the preemptive placeholder with
    /// the actual cause.
    pub fn flip_to_failed(&self, failure: IndexPopulationFailure) -> Result<()> {
        let mut slot = self.slot.write();
        match next_state(self.descriptor, slot.state_kind(), IndexEvent::FlipFail)? {
            Transition::To(IndexStateKind::Failed) => {
                *slot = Delegate::Failed { failure };
                Ok(())
            }
            other => Err(KernelError::InvalidArgument(format!(
                "unexpected failure transition {other:?} for {}",
                self.descriptor
            ))),
        }
    }

    /// Drops the index: the delegate is replaced by a closed marker and any
    /// later caller gets [`KernelError::IndexProxyAlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        let mut slot = self.slot.write();
        if matches!(&*slot, Delegate::Closed) {
            return Err(KernelError::IndexProxyAlreadyClosed(self.descriptor));
        }
        match next_state(self.descriptor, slot.state_kind(), IndexEvent::Drop)? {
            Transition::Removed => {
                *slot = Delegate::Closed;
                Ok(())
            }
            other => Err(KernelError::InvalidArgument(format!(
                "unexpected drop transition {other:?} for {}",
                self.descriptor
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::writer::HashIndexWriter;
    use crate::model::PropertyValue;
    use crate::schema::rules::RuleKind;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path, descriptor: IndexDescriptor) -> FlipContext {
        let rules = Arc::new(SchemaStore::open(dir.join("schema_rules.json")).expect("open rules"));
        rules
            .add_index_rule(descriptor, RuleKind::Regular)
            .expect("add rule");
        FlipContext {
            rules,
            cache: Arc::new(SchemaStateCache::new()),
        }
    }

    #[test]
    fn flip_drains_residual_queue_before_going_online() {
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        let dir = tempdir().expect("tempdir");
        let context = context(dir.path(), descriptor);
        let queue = Arc::new(UpdateQueue::new());
        let proxy = FlippableProxy::new_populating(descriptor, Arc::clone(&queue));

        proxy
            .apply_updates([NodePropertyUpdate::added(NodeId(3), PropertyValue::Int(42))])
            .expect("enqueue while populating");
        assert_eq!(queue.len(), 1);

        let mut writer = Box::new(HashIndexWriter::new(descriptor, false));
        writer.create().expect("create writer");
        proxy
            .flip_to_online(writer, &queue, &context)
            .unwrap_or_else(|f| panic!("flip failed: {}", f.cause));

        assert_eq!(proxy.state(), IndexState::Online);
        assert_eq!(
            proxy.lookup(&IndexableValue::Int(42)).expect("lookup"),
            vec![NodeId(3)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn second_flip_hits_closed_proxy_error() {
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        let dir = tempdir().expect("tempdir");
        let context = context(dir.path(), descriptor);
        let queue = Arc::new(UpdateQueue::new());
        let proxy = FlippableProxy::new_populating(descriptor, Arc::clone(&queue));

        let mut writer = Box::new(HashIndexWriter::new(descriptor, false));
        writer.create().expect("create writer");
        proxy
            .flip_to_online(writer, &queue, &context)
            .unwrap_or_else(|f| panic!("flip failed: {}", f.cause));

        let mut writer = Box::new(HashIndexWriter::new(descriptor, false));
        writer.create().expect("create writer");
        let failure = proxy
            .flip_to_online(writer, &queue, &context)
            .err()
            .expect("second flip rejected");
        assert!(matches!(
            failure.cause,
            KernelError::IndexProxyAlreadyClosed(_)
        ));
    }

    #[test]
    fn failure_refinement_replaces_placeholder() {
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        let queue = Arc::new(UpdateQueue::new());
        let proxy = FlippableProxy::new_populating(descriptor, queue);

        proxy
            .flip_to_failed(IndexPopulationFailure::unknown())
            .expect("preemptive flip");
        let refined = IndexPopulationFailure::from_error(&KernelError::IndexEntryConflict {
            value: IndexableValue::Int(1),
            existing: NodeId(1),
            added: NodeId(2),
        });
        proxy
            .flip_to_failed(refined.clone())
            .expect("refining flip");
        assert_eq!(
            proxy.state(),
            IndexState::Failed {
                message: refined.message().to_string()
            }
        );
    }

    #[test]
    fn updates_against_failed_index_carry_the_cause() {
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        let failure = IndexPopulationFailure::from_error(&KernelError::InvalidArgument(
            "scan exploded".into(),
        ));
        let proxy = FlippableProxy::new_failed(descriptor, failure);
        let err = proxy
            .apply_updates([NodePropertyUpdate::added(NodeId(1), PropertyValue::Int(1))])
            .expect_err("update rejected");
        match err {
            KernelError::IndexPopulationFailed { cause, .. } => {
                assert!(cause.contains("scan exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
