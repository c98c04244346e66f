use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{KernelError, Result};
use crate::index::scan::{ScanStopToken, ScanVisitor, StoreScan, StoreView};
use crate::index::update::NodePropertyUpdate;
use crate::model::{LabelId, NodeId, PropertyKeyId, PropertyValue};
use crate::schema::descriptor::IndexDescriptor;

#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
    pub labels: Vec<LabelId>,
    pub properties: BTreeMap<PropertyKeyId, PropertyValue>,
}

impl NodeRecord {
    fn matches_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }
}

#[derive(Debug)]
struct StoreInner {
    nodes: RwLock<BTreeMap<NodeId, NodeRecord>>,
    next_id: AtomicU64,
}

/// In-memory node storage; cheap clone-able handle over shared state.
///
/// Nodes live in an ordered map so population scans walk them in ascending
/// id order, the order index writers require during the initial scan.
#[derive(Debug, Clone)]
pub struct NodeStore {
    inner: Arc<StoreInner>,
    scan_batch_size: usize,
}

impl NodeStore {
    pub fn new(scan_batch_size: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                nodes: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
            scan_batch_size: scan_batch_size.max(1),
        }
    }

    pub fn create_node(
        &self,
        labels: Vec<LabelId>,
        properties: Vec<(PropertyKeyId, PropertyValue)>,
    ) -> NodeId {
        let id = NodeId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = NodeRecord {
            labels,
            properties: properties.into_iter().collect(),
        };
        self.inner.nodes.write().insert(id, record);
        id
    }

    /// Sets a property and returns the previous value, if any.
    pub fn set_property(
        &self,
        node: NodeId,
        key: PropertyKeyId,
        value: PropertyValue,
    ) -> Result<Option<PropertyValue>> {
        let mut nodes = self.inner.nodes.write();
        let record = nodes
            .get_mut(&node)
            .ok_or_else(|| KernelError::InvalidArgument(format!("no node {node}")))?;
        Ok(record.properties.insert(key, value))
    }

    pub fn remove_property(
        &self,
        node: NodeId,
        key: PropertyKeyId,
    ) -> Result<Option<PropertyValue>> {
        let mut nodes = self.inner.nodes.write();
        let record = nodes
            .get_mut(&node)
            .ok_or_else(|| KernelError::InvalidArgument(format!("no node {node}")))?;
        Ok(record.properties.remove(&key))
    }

    pub fn node(&self, node: NodeId) -> Option<NodeRecord> {
        self.inner.nodes.read().get(&node).cloned()
    }

    fn matching_batch_after(
        &self,
        descriptor: IndexDescriptor,
        after: Option<NodeId>,
        limit: usize,
    ) -> Vec<(NodeId, PropertyValue)> {
        let nodes = self.inner.nodes.read();
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        nodes
            .range((lower, Bound::Unbounded))
            .filter(|(_, record)| record.matches_label(descriptor.label))
            .filter_map(|(id, record)| {
                record
                    .properties
                    .get(&descriptor.property_key)
                    .map(|value| (*id, value.clone()))
            })
            .take(limit)
            .collect()
    }
}

impl StoreView for NodeStore {
    fn visit_nodes_matching(
        &self,
        descriptor: IndexDescriptor,
        stop: Arc<ScanStopToken>,
    ) -> Box<dyn StoreScan> {
        Box::new(NodeStoreScan {
            store: self.clone(),
            descriptor,
            stop,
        })
    }
}

/// Forward scan over the node store, batched so the store lock is held only
/// briefly while concurrent writers keep committing.
struct NodeStoreScan {
    store: NodeStore,
    descriptor: IndexDescriptor,
    stop: Arc<ScanStopToken>,
}

impl StoreScan for NodeStoreScan {
    fn run(&mut self, visitor: &mut dyn ScanVisitor) -> Result<()> {
        let mut last_seen: Option<NodeId> = None;
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            let batch = self.store.matching_batch_after(
                self.descriptor,
                last_seen,
                self.store.scan_batch_size,
            );
            if batch.is_empty() {
                return Ok(());
            }
            for (node, value) in batch {
                if self.stop.is_stopped() {
                    return Ok(());
                }
                last_seen = Some(node);
                visitor.visit(NodePropertyUpdate::added(node, value))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collecting(Vec<NodeId>);

    impl ScanVisitor for Collecting {
        fn visit(&mut self, update: NodePropertyUpdate) -> Result<()> {
            self.0.push(update.node);
            Ok(())
        }
    }

    #[test]
    fn scan_visits_matching_nodes_ascending() {
        let store = NodeStore::new(2);
        let label = LabelId(5);
        let key = PropertyKeyId(8);
        for i in 0..10i64 {
            let labels = if i % 2 == 0 { vec![label] } else { vec![LabelId(6)] };
            store.create_node(labels, vec![(key, PropertyValue::Int(i))]);
        }
        // A labelled node without the property does not match.
        store.create_node(vec![label], vec![]);

        let mut scan = store.visit_nodes_matching(
            IndexDescriptor::new(5u64, 8u64),
            Arc::new(ScanStopToken::new()),
        );
        let mut visitor = Collecting(Vec::new());
        scan.run(&mut visitor).expect("scan");

        let ids: Vec<u64> = visitor.0.iter().map(|n| n.0).collect();
        assert_eq!(ids, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn stopped_scan_returns_promptly() {
        let store = NodeStore::new(1);
        for i in 0..100i64 {
            store.create_node(
                vec![LabelId(5)],
                vec![(PropertyKeyId(8), PropertyValue::Int(i))],
            );
        }
        let stop = Arc::new(ScanStopToken::new());
        stop.stop();
        let mut scan = store.visit_nodes_matching(IndexDescriptor::new(5u64, 8u64), stop);
        let mut visitor = Collecting(Vec::new());
        scan.run(&mut visitor).expect("scan");
        assert!(visitor.0.is_empty());
    }
}
