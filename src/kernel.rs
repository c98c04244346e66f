use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{KernelError, Result};
use crate::index::population::Completion;
use crate::index::recovery::RecoveryCoordinator;
use crate::index::service::IndexingService;
use crate::index::state::IndexState;
use crate::index::update::NodePropertyUpdate;
use crate::model::{IndexableValue, LabelId, NodeId, PropertyKeyId, PropertyValue};
use crate::schema::cache::SchemaStateCache;
use crate::schema::descriptor::IndexDescriptor;
use crate::schema::handle::IndexHandle;
use crate::schema::rules::{RuleKind, RuleState, SchemaStore};
use crate::schema::statement::{SchemaTransaction, Transactor};
use crate::store::NodeStore;

const SCHEMA_RULE_FILE: &str = "schema_rules.json";

/// The assembled kernel: node store, persisted schema rules and the live
/// index registry.
///
/// `open` runs orphan recovery and restores index proxies before returning,
/// so no transaction ever observes a half-recovered schema.
pub struct GraphKernel {
    path: PathBuf,
    store: NodeStore,
    schema: Arc<SchemaStore>,
    cache: Arc<SchemaStateCache>,
    indexing: Arc<IndexingService>,
}

impl GraphKernel {
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let schema = Arc::new(SchemaStore::open(path.join(SCHEMA_RULE_FILE))?);

        let recovered = RecoveryCoordinator::new(Arc::clone(&schema)).run()?;
        if !recovered.is_empty() {
            info!(
                orphans = recovered.len(),
                "recovery dropped orphaned constraint indexes"
            );
        }

        let store = NodeStore::new(config.scan_batch_size);
        let cache = Arc::new(SchemaStateCache::new());
        let indexing = Arc::new(IndexingService::new(
            config,
            Arc::new(store.clone()),
            Arc::clone(&schema),
            Arc::clone(&cache),
        ));
        let kernel = Self {
            path,
            store,
            schema,
            cache,
            indexing,
        };
        kernel.restore_indexes()?;
        Ok(kernel)
    }

    /// Rebuilds proxies for every persisted rule. Populating and online
    /// rules re-populate (index payloads are memory-only); failed rules get
    /// a failed proxy carrying the persisted cause.
    fn restore_indexes(&self) -> Result<()> {
        let mut repopulating = Vec::new();
        for rule in self.schema.index_rules() {
            match rule.state {
                RuleState::Failed => self.indexing.install_failed(&rule),
                RuleState::Populating | RuleState::Online => {
                    self.indexing.start_population(&rule)?;
                    repopulating.push(rule.descriptor);
                }
            }
        }
        for descriptor in repopulating {
            self.indexing.await_population(descriptor);
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_transaction(&self) -> SchemaTransaction<'_> {
        SchemaTransaction::new(self)
    }

    pub fn transactor(&self) -> Transactor<'_> {
        Transactor::new(self)
    }

    /// Every index definition, constraint-backing ones included.
    pub fn indexes(&self) -> Vec<IndexHandle<'_>> {
        self.schema
            .index_rules()
            .into_iter()
            .map(|rule| {
                IndexHandle::new(self, rule.descriptor, rule.kind.is_constraint_backing())
            })
            .collect()
    }

    pub fn index_state(&self, descriptor: IndexDescriptor) -> Result<IndexState> {
        let rule = self
            .schema
            .index_rule(descriptor)
            .ok_or(KernelError::NoSuchIndex(descriptor))?;
        if let RuleKind::ConstraintBacking { owner } = rule.kind {
            let owned = match owner {
                Some(_) => true,
                None => self.schema.constraint_for(descriptor).is_some(),
            };
            if !owned {
                return Ok(IndexState::AwaitingConstraintOwner);
            }
        }
        if let Some(state) = self.indexing.index_state(descriptor) {
            return Ok(state);
        }
        Ok(match rule.state {
            RuleState::Populating => IndexState::Populating,
            RuleState::Online => IndexState::Online,
            RuleState::Failed => IndexState::Failed {
                message: rule.failure_message.unwrap_or_default(),
            },
        })
    }

    /// Blocks until the population of `descriptor` finishes, if one runs.
    pub fn await_index_population(&self, descriptor: IndexDescriptor) {
        self.indexing.await_population(descriptor);
    }

    pub fn cancel_index_population(&self, descriptor: IndexDescriptor) -> Option<Completion> {
        self.indexing.cancel_population(descriptor)
    }

    pub fn index_lookup(
        &self,
        descriptor: IndexDescriptor,
        value: &IndexableValue,
    ) -> Result<Vec<NodeId>> {
        self.indexing.lookup(descriptor, value)
    }

    pub fn create_node(
        &self,
        labels: Vec<LabelId>,
        properties: Vec<(PropertyKeyId, PropertyValue)>,
    ) -> Result<NodeId> {
        let node = self
            .store
            .create_node(labels.clone(), properties.clone());
        for (key, value) in &properties {
            self.route_update(
                &labels,
                *key,
                NodePropertyUpdate::added(node, value.clone()),
            );
        }
        Ok(node)
    }

    pub fn set_node_property(
        &self,
        node: NodeId,
        key: PropertyKeyId,
        value: PropertyValue,
    ) -> Result<()> {
        let labels = self
            .store
            .node(node)
            .ok_or_else(|| KernelError::InvalidArgument(format!("no node {node}")))?
            .labels;
        let previous = self.store.set_property(node, key, value.clone())?;
        let update = match previous {
            Some(before) => NodePropertyUpdate::changed(node, before, value),
            None => NodePropertyUpdate::added(node, value),
        };
        self.route_update(&labels, key, update);
        Ok(())
    }

    pub fn remove_node_property(&self, node: NodeId, key: PropertyKeyId) -> Result<()> {
        let labels = self
            .store
            .node(node)
            .ok_or_else(|| KernelError::InvalidArgument(format!("no node {node}")))?
            .labels;
        if let Some(before) = self.store.remove_property(node, key)? {
            self.route_update(&labels, key, NodePropertyUpdate::removed(node, before));
        }
        Ok(())
    }

    /// Fans one committed update out to every index matching the node's
    /// labels and the property key. The per-label descriptor list is cached
    /// and rebuilt after any schema change or index flip.
    fn route_update(&self, labels: &[LabelId], key: PropertyKeyId, update: NodePropertyUpdate) {
        for &label in labels {
            let descriptors = self.cache.descriptors_for_label(label, || {
                self.schema
                    .index_rules()
                    .into_iter()
                    .filter(|rule| rule.descriptor.label == label)
                    .map(|rule| rule.descriptor)
                    .collect()
            });
            for descriptor in descriptors.iter() {
                if descriptor.property_key == key {
                    self.indexing.apply_update(*descriptor, update.clone());
                }
            }
        }
    }

    pub(crate) fn drop_index_committed(&self, descriptor: IndexDescriptor) -> Result<()> {
        self.schema.remove_index_rule(descriptor)?;
        self.indexing.drop_index(descriptor);
        self.cache.clear();
        Ok(())
    }

    /// Removes a committed constraint and tears down its backing index.
    pub(crate) fn drop_constraint_committed(&self, descriptor: IndexDescriptor) -> Result<()> {
        self.schema.remove_constraint(descriptor)?;
        self.indexing.drop_index(descriptor);
        self.cache.clear();
        Ok(())
    }

    pub(crate) fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    pub(crate) fn indexing(&self) -> &IndexingService {
        &self.indexing
    }

    pub(crate) fn cache(&self) -> &SchemaStateCache {
        &self.cache
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }
}

impl Drop for GraphKernel {
    fn drop(&mut self) {
        self.indexing.shutdown();
    }
}
