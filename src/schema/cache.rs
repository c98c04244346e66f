use std::sync::Arc;

use dashmap::DashMap;

use crate::model::LabelId;
use crate::schema::descriptor::IndexDescriptor;

/// Cache of schema-derived state, keyed by label.
///
/// Entries are built lazily from the rule store and thrown away wholesale on
/// any schema change, including the flip of a freshly populated index (state
/// derived from the index's absence must be rebuilt once it is online).
#[derive(Debug, Default)]
pub struct SchemaStateCache {
    descriptors_by_label: DashMap<LabelId, Arc<Vec<IndexDescriptor>>>,
}

impl SchemaStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptors_for_label(
        &self,
        label: LabelId,
        build: impl FnOnce() -> Vec<IndexDescriptor>,
    ) -> Arc<Vec<IndexDescriptor>> {
        self.descriptors_by_label
            .entry(label)
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    pub fn clear(&self) {
        self.descriptors_by_label.clear();
    }

    pub fn len(&self) -> usize {
        self.descriptors_by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors_by_label.is_empty()
    }
}
