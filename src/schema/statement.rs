use tracing::{debug, info};

use crate::error::{KernelError, Result};
use crate::kernel::GraphKernel;
use crate::model::{LabelId, PropertyKeyId};
use crate::schema::descriptor::{IndexDescriptor, UniquenessConstraint};
use crate::schema::rules::RuleKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy)]
struct PendingIndex {
    descriptor: IndexDescriptor,
    constraint_backing: bool,
}

/// Statement surface for schema mutations, with transactional semantics:
/// pending creates and drops are merged into every read, become durable on
/// `commit` and vanish on `rollback`.
pub struct SchemaTransaction<'k> {
    kernel: &'k GraphKernel,
    state: TxState,
    created_indexes: Vec<PendingIndex>,
    created_constraints: Vec<IndexDescriptor>,
    dropped_indexes: Vec<IndexDescriptor>,
    dropped_constraints: Vec<IndexDescriptor>,
}

impl<'k> SchemaTransaction<'k> {
    pub(crate) fn new(kernel: &'k GraphKernel) -> Self {
        Self {
            kernel,
            state: TxState::Active,
            created_indexes: Vec::new(),
            created_constraints: Vec::new(),
            dropped_indexes: Vec::new(),
            dropped_constraints: Vec::new(),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(KernelError::InvalidArgument(format!(
                "schema transaction is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn constraint_exists(&self, descriptor: IndexDescriptor) -> bool {
        if self.created_constraints.contains(&descriptor) {
            return true;
        }
        if self.dropped_constraints.contains(&descriptor) {
            return false;
        }
        self.kernel.schema().constraint_for(descriptor).is_some()
    }

    /// Any index rule on the descriptor, regular or constraint-backing,
    /// committed (and not dropped in this transaction) or pending. A backing
    /// index goes away with its constraint, so a pending constraint drop
    /// hides it too.
    fn index_exists(&self, descriptor: IndexDescriptor) -> bool {
        if self.created_indexes.iter().any(|p| p.descriptor == descriptor)
            || self.created_constraints.contains(&descriptor)
        {
            return true;
        }
        if self.dropped_indexes.contains(&descriptor) {
            return false;
        }
        match self.kernel.schema().index_rule(descriptor) {
            Some(rule) => {
                !(rule.kind.is_constraint_backing()
                    && self.dropped_constraints.contains(&descriptor))
            }
            None => false,
        }
    }

    pub fn index_create(
        &mut self,
        label: impl Into<LabelId>,
        property_key: impl Into<PropertyKeyId>,
    ) -> Result<IndexDescriptor> {
        self.ensure_active()?;
        let descriptor = IndexDescriptor::new(label, property_key);
        if self.constraint_exists(descriptor) {
            return Err(KernelError::AlreadyConstrained {
                index: descriptor,
                constraint: UniquenessConstraint::new(descriptor.label, descriptor.property_key),
            });
        }
        if self.index_exists(descriptor) {
            return Err(KernelError::AlreadyIndexed(descriptor));
        }
        self.created_indexes.push(PendingIndex {
            descriptor,
            constraint_backing: false,
        });
        Ok(descriptor)
    }

    pub fn index_drop(&mut self, descriptor: IndexDescriptor) -> Result<()> {
        self.ensure_active()?;
        if let Some(position) = self
            .created_indexes
            .iter()
            .position(|p| p.descriptor == descriptor && !p.constraint_backing)
        {
            self.created_indexes.remove(position);
            return Ok(());
        }
        let committed_regular = self
            .kernel
            .schema()
            .index_rule(descriptor)
            .is_some_and(|rule| rule.kind == RuleKind::Regular);
        if !committed_regular || self.dropped_indexes.contains(&descriptor) {
            return Err(KernelError::NoSuchIndex(descriptor));
        }
        self.dropped_indexes.push(descriptor);
        Ok(())
    }

    pub fn uniqueness_constraint_create(
        &mut self,
        label: impl Into<LabelId>,
        property_key: impl Into<PropertyKeyId>,
    ) -> Result<UniquenessConstraint> {
        self.ensure_active()?;
        let descriptor = IndexDescriptor::new(label, property_key);
        if self.constraint_exists(descriptor) {
            return Err(KernelError::AlreadyConstrained {
                index: descriptor,
                constraint: UniquenessConstraint::new(descriptor.label, descriptor.property_key),
            });
        }
        if self.index_exists(descriptor) {
            return Err(KernelError::AlreadyIndexed(descriptor));
        }
        self.created_constraints.push(descriptor);
        Ok(UniquenessConstraint::new(
            descriptor.label,
            descriptor.property_key,
        ))
    }

    /// Drops a uniqueness constraint together with the index backing it.
    pub fn constraint_drop(
        &mut self,
        label: impl Into<LabelId>,
        property_key: impl Into<PropertyKeyId>,
    ) -> Result<()> {
        self.ensure_active()?;
        let descriptor = IndexDescriptor::new(label, property_key);
        if let Some(position) = self
            .created_constraints
            .iter()
            .position(|d| *d == descriptor)
        {
            self.created_constraints.remove(position);
            return Ok(());
        }
        let committed = self.kernel.schema().constraint_for(descriptor).is_some();
        if !committed || self.dropped_constraints.contains(&descriptor) {
            return Err(KernelError::InvalidArgument(format!(
                "no uniqueness constraint on {descriptor}"
            )));
        }
        self.dropped_constraints.push(descriptor);
        Ok(())
    }

    /// Creates only the constraint-backing index, without its owning
    /// constraint. This is the first half of constraint creation; a crash
    /// before the owning constraint commits leaves the rule for startup
    /// recovery to drop.
    pub fn create_constraint_backing_index(
        &mut self,
        label: impl Into<LabelId>,
        property_key: impl Into<PropertyKeyId>,
    ) -> Result<IndexDescriptor> {
        self.ensure_active()?;
        let descriptor = IndexDescriptor::new(label, property_key);
        if self.constraint_exists(descriptor) {
            return Err(KernelError::AlreadyConstrained {
                index: descriptor,
                constraint: UniquenessConstraint::new(descriptor.label, descriptor.property_key),
            });
        }
        if self.index_exists(descriptor) {
            return Err(KernelError::AlreadyIndexed(descriptor));
        }
        self.created_indexes.push(PendingIndex {
            descriptor,
            constraint_backing: true,
        });
        Ok(descriptor)
    }

    pub fn indexes_for_label(&self, label: impl Into<LabelId>) -> Vec<IndexDescriptor> {
        let label = label.into();
        self.regular_indexes()
            .into_iter()
            .filter(|d| d.label == label)
            .collect()
    }

    pub fn index_for_label_and_property_key(
        &self,
        label: impl Into<LabelId>,
        property_key: impl Into<PropertyKeyId>,
    ) -> Option<IndexDescriptor> {
        let descriptor = IndexDescriptor::new(label, property_key);
        self.regular_indexes().into_iter().find(|d| *d == descriptor)
    }

    pub fn indexes_all(&self) -> Vec<IndexDescriptor> {
        self.regular_indexes()
    }

    pub fn unique_indexes_all(&self) -> Vec<IndexDescriptor> {
        self.unique_indexes()
    }

    pub fn unique_indexes_for_label(&self, label: impl Into<LabelId>) -> Vec<IndexDescriptor> {
        let label = label.into();
        self.unique_indexes()
            .into_iter()
            .filter(|d| d.label == label)
            .collect()
    }

    fn regular_indexes(&self) -> Vec<IndexDescriptor> {
        let mut descriptors: Vec<IndexDescriptor> = self
            .kernel
            .schema()
            .index_rules()
            .into_iter()
            .filter(|rule| rule.kind == RuleKind::Regular)
            .map(|rule| rule.descriptor)
            .filter(|d| !self.dropped_indexes.contains(d))
            .collect();
        descriptors.extend(
            self.created_indexes
                .iter()
                .filter(|p| !p.constraint_backing)
                .map(|p| p.descriptor),
        );
        descriptors.sort();
        descriptors.dedup();
        descriptors
    }

    fn unique_indexes(&self) -> Vec<IndexDescriptor> {
        let mut descriptors: Vec<IndexDescriptor> = self
            .kernel
            .schema()
            .index_rules()
            .into_iter()
            .filter(|rule| rule.kind.is_constraint_backing())
            .map(|rule| rule.descriptor)
            .filter(|d| !self.dropped_constraints.contains(d))
            .collect();
        descriptors.extend(self.created_constraints.iter().copied());
        descriptors.extend(
            self.created_indexes
                .iter()
                .filter(|p| p.constraint_backing)
                .map(|p| p.descriptor),
        );
        descriptors.sort();
        descriptors.dedup();
        descriptors
    }

    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        let drops = std::mem::take(&mut self.dropped_indexes);
        let constraint_drops = std::mem::take(&mut self.dropped_constraints);
        let creates = std::mem::take(&mut self.created_indexes);
        let constraints = std::mem::take(&mut self.created_constraints);

        for descriptor in drops {
            self.kernel.drop_index_committed(descriptor)?;
        }
        for descriptor in constraint_drops {
            self.kernel.drop_constraint_committed(descriptor)?;
        }
        for pending in creates {
            let kind = if pending.constraint_backing {
                RuleKind::ConstraintBacking { owner: None }
            } else {
                RuleKind::Regular
            };
            let rule = self.kernel.schema().add_index_rule(pending.descriptor, kind)?;
            self.kernel.indexing().start_population(&rule)?;
        }
        for descriptor in constraints {
            let (_, backing_rule) = self.kernel.schema().add_constraint(descriptor)?;
            self.kernel.indexing().start_population(&backing_rule)?;
        }

        self.kernel.cache().clear();
        self.state = TxState::Committed;
        info!("schema transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) {
        self.created_indexes.clear();
        self.created_constraints.clear();
        self.dropped_indexes.clear();
        self.dropped_constraints.clear();
        self.state = TxState::RolledBack;
        debug!("schema transaction rolled back");
    }
}

/// Runs a closed schema mutation as a single transaction.
pub struct Transactor<'k> {
    kernel: &'k GraphKernel,
}

impl<'k> Transactor<'k> {
    pub fn new(kernel: &'k GraphKernel) -> Self {
        Self { kernel }
    }

    pub fn execute<T>(
        &self,
        action: impl FnOnce(&mut SchemaTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.kernel.schema_transaction();
        match action(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }
}
