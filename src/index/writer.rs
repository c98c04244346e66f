use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::error::{KernelError, Result};
use crate::index::update::{NodePropertyUpdate, UpdateKind};
use crate::model::{IndexableValue, NodeId, PropertyValue};
use crate::schema::descriptor::IndexDescriptor;

/// Sink a population job feeds while building an index.
///
/// Contract: `create` exactly once before any `add`/`apply`; `add` carries
/// the initial store scan in ascending node order; `apply` carries live
/// updates once the scan frontier has passed a node; `close` exactly once.
/// `close(true)` makes the index queryable and the writer keeps serving
/// `apply` and `lookup` for the online index; `close(false)` discards
/// partial state and the writer accepts nothing further. On a uniqueness
/// violation `add`/`apply` fail with [`KernelError::IndexEntryConflict`]
/// naming the value and both nodes.
pub trait IndexWriter: Send {
    fn create(&mut self) -> Result<()>;

    fn add(&mut self, node: NodeId, value: &PropertyValue) -> Result<()>;

    fn apply(&mut self, batch: Vec<NodePropertyUpdate>) -> Result<()>;

    /// Records a human-readable failure so a restart observes the cause.
    fn mark_failed(&mut self, reason: &str) -> Result<()>;

    fn close(&mut self, success: bool) -> Result<()>;

    fn lookup(&self, value: &IndexableValue) -> Vec<NodeId>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WriterPhase {
    New,
    Populating,
    /// Sealed as successful; serves live updates and lookups.
    Online,
    /// Sealed as discarded; rejects everything.
    Discarded,
}

/// In-memory postings writer.
///
/// The index payload lives in memory only; durable state (online/failed and
/// the failure text) is carried by the schema rule record, which the
/// population job updates alongside this writer.
pub struct HashIndexWriter {
    descriptor: IndexDescriptor,
    unique: bool,
    postings: BTreeMap<IndexableValue, BTreeSet<NodeId>>,
    phase: WriterPhase,
    failure: Option<String>,
}

impl HashIndexWriter {
    pub fn new(descriptor: IndexDescriptor, unique: bool) -> Self {
        Self {
            descriptor,
            unique,
            postings: BTreeMap::new(),
            phase: WriterPhase::New,
            failure: None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Scan adds are only legal during population.
    fn ensure_populating(&self) -> Result<()> {
        match self.phase {
            WriterPhase::Populating => Ok(()),
            WriterPhase::New => Err(KernelError::InvalidArgument(format!(
                "index writer for {} used before create()",
                self.descriptor
            ))),
            WriterPhase::Online | WriterPhase::Discarded => {
                Err(KernelError::InvalidArgument(format!(
                    "index writer for {} used after close()",
                    self.descriptor
                )))
            }
        }
    }

    /// Live updates are legal while populating and after the index went
    /// online.
    fn ensure_writable(&self) -> Result<()> {
        match self.phase {
            WriterPhase::Populating | WriterPhase::Online => Ok(()),
            WriterPhase::New => Err(KernelError::InvalidArgument(format!(
                "index writer for {} used before create()",
                self.descriptor
            ))),
            WriterPhase::Discarded => Err(KernelError::InvalidArgument(format!(
                "index writer for {} used after close()",
                self.descriptor
            ))),
        }
    }

    fn insert(&mut self, node: NodeId, value: IndexableValue) -> Result<()> {
        let nodes = self.postings.entry(value.clone()).or_default();
        if self.unique {
            if let Some(&existing) = nodes.iter().find(|&&n| n != node) {
                return Err(KernelError::IndexEntryConflict {
                    value,
                    existing,
                    added: node,
                });
            }
        }
        nodes.insert(node);
        Ok(())
    }

    fn remove(&mut self, node: NodeId, value: &IndexableValue) {
        if let Some(nodes) = self.postings.get_mut(value) {
            nodes.remove(&node);
            if nodes.is_empty() {
                self.postings.remove(value);
            }
        }
    }
}

impl IndexWriter for HashIndexWriter {
    fn create(&mut self) -> Result<()> {
        if self.phase != WriterPhase::New {
            return Err(KernelError::InvalidArgument(format!(
                "index writer for {} created twice",
                self.descriptor
            )));
        }
        self.phase = WriterPhase::Populating;
        Ok(())
    }

    fn add(&mut self, node: NodeId, value: &PropertyValue) -> Result<()> {
        self.ensure_populating()?;
        match Option::<IndexableValue>::from(value) {
            Some(value) => self.insert(node, value),
            None => {
                trace!(index = %self.descriptor, node = %node, "skipping non-indexable value");
                Ok(())
            }
        }
    }

    fn apply(&mut self, batch: Vec<NodePropertyUpdate>) -> Result<()> {
        self.ensure_writable()?;
        for update in batch {
            let before = update
                .value_before
                .as_ref()
                .and_then(|v| Option::<IndexableValue>::from(v));
            let after = update
                .value_after
                .as_ref()
                .and_then(|v| Option::<IndexableValue>::from(v));
            match update.kind {
                UpdateKind::Added => {
                    if let Some(after) = after {
                        self.insert(update.node, after)?;
                    }
                }
                UpdateKind::Changed => {
                    if let Some(before) = before {
                        self.remove(update.node, &before);
                    }
                    if let Some(after) = after {
                        self.insert(update.node, after)?;
                    }
                }
                UpdateKind::Removed => {
                    if let Some(before) = before {
                        self.remove(update.node, &before);
                    }
                }
            }
        }
        Ok(())
    }

    fn mark_failed(&mut self, reason: &str) -> Result<()> {
        self.failure = Some(reason.to_string());
        Ok(())
    }

    fn close(&mut self, success: bool) -> Result<()> {
        match self.phase {
            WriterPhase::New | WriterPhase::Populating => {
                if success {
                    self.phase = WriterPhase::Online;
                } else {
                    self.phase = WriterPhase::Discarded;
                    self.postings.clear();
                }
                Ok(())
            }
            WriterPhase::Online | WriterPhase::Discarded => {
                Err(KernelError::InvalidArgument(format!(
                    "index writer for {} closed twice",
                    self.descriptor
                )))
            }
        }
    }

    fn lookup(&self, value: &IndexableValue) -> Vec<NodeId> {
        self.postings
            .get(value)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(unique: bool) -> HashIndexWriter {
        let mut writer = HashIndexWriter::new(IndexDescriptor::new(5u64, 8u64), unique);
        writer.create().expect("create");
        writer
    }

    #[test]
    fn add_before_create_is_rejected() {
        let mut writer = HashIndexWriter::new(IndexDescriptor::new(5u64, 8u64), false);
        let err = writer
            .add(NodeId(1), &PropertyValue::Int(1))
            .expect_err("add before create");
        assert!(matches!(err, KernelError::InvalidArgument(_)));
    }

    #[test]
    fn unique_writer_reports_conflicting_nodes() {
        let mut writer = writer(true);
        writer
            .add(NodeId(1), &PropertyValue::String("dup".into()))
            .expect("first add");
        let err = writer
            .add(NodeId(2), &PropertyValue::String("dup".into()))
            .expect_err("conflicting add");
        match err {
            KernelError::IndexEntryConflict {
                value,
                existing,
                added,
            } => {
                assert_eq!(value, IndexableValue::String("dup".into()));
                assert_eq!(existing, NodeId(1));
                assert_eq!(added, NodeId(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn re_adding_the_same_node_is_not_a_conflict() {
        let mut writer = writer(true);
        writer
            .add(NodeId(1), &PropertyValue::Int(7))
            .expect("first add");
        writer
            .add(NodeId(1), &PropertyValue::Int(7))
            .expect("idempotent re-add");
        assert_eq!(writer.lookup(&IndexableValue::Int(7)), vec![NodeId(1)]);
    }

    #[test]
    fn apply_respects_update_kinds() {
        let mut writer = writer(false);
        writer
            .apply(vec![
                NodePropertyUpdate::added(NodeId(1), PropertyValue::Int(1)),
                NodePropertyUpdate::changed(NodeId(1), PropertyValue::Int(1), PropertyValue::Int(2)),
                NodePropertyUpdate::added(NodeId(2), PropertyValue::Int(2)),
                NodePropertyUpdate::removed(NodeId(2), PropertyValue::Int(2)),
            ])
            .expect("apply");
        assert!(writer.lookup(&IndexableValue::Int(1)).is_empty());
        assert_eq!(writer.lookup(&IndexableValue::Int(2)), vec![NodeId(1)]);
    }

    #[test]
    fn online_writer_keeps_serving_applies_and_lookups() {
        let mut writer = writer(false);
        writer
            .add(NodeId(1), &PropertyValue::Int(42))
            .expect("scan add");
        writer.close(true).expect("close online");

        writer
            .apply(vec![NodePropertyUpdate::added(
                NodeId(2),
                PropertyValue::Int(43),
            )])
            .expect("live apply after close(true)");
        assert_eq!(writer.lookup(&IndexableValue::Int(42)), vec![NodeId(1)]);
        assert_eq!(writer.lookup(&IndexableValue::Int(43)), vec![NodeId(2)]);

        // Scan adds belong to population and stay rejected.
        let err = writer
            .add(NodeId(3), &PropertyValue::Int(44))
            .expect_err("scan add after close");
        assert!(matches!(err, KernelError::InvalidArgument(_)));
    }

    #[test]
    fn discarded_writer_rejects_everything_and_forgets_its_postings() {
        let mut writer = writer(false);
        writer
            .add(NodeId(1), &PropertyValue::Int(1))
            .expect("scan add");
        writer.close(false).expect("close discarded");

        assert!(writer.lookup(&IndexableValue::Int(1)).is_empty());
        let err = writer
            .apply(vec![NodePropertyUpdate::added(NodeId(2), PropertyValue::Int(2))])
            .expect_err("apply after discard");
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        let err = writer.close(false).expect_err("second close");
        assert!(matches!(err, KernelError::InvalidArgument(_)));
    }

    #[test]
    fn floats_are_skipped_not_errored() {
        let mut writer = writer(false);
        writer
            .add(NodeId(1), &PropertyValue::Float(1.5))
            .expect("float add");
        assert!(writer.postings.is_empty());
    }
}
