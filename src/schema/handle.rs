use crate::error::{KernelError, Result};
use crate::index::state::IndexState;
use crate::kernel::GraphKernel;
use crate::schema::descriptor::IndexDescriptor;

/// Outward-facing handle to one index definition.
///
/// Unlike the statement views, the handle list includes constraint-backing
/// indexes; those refuse direct drops.
pub struct IndexHandle<'k> {
    kernel: &'k GraphKernel,
    descriptor: IndexDescriptor,
    constraint_backing: bool,
}

impl<'k> IndexHandle<'k> {
    pub(crate) fn new(
        kernel: &'k GraphKernel,
        descriptor: IndexDescriptor,
        constraint_backing: bool,
    ) -> Self {
        Self {
            kernel,
            descriptor,
            constraint_backing,
        }
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        self.descriptor
    }

    pub fn is_constraint_index(&self) -> bool {
        self.constraint_backing
    }

    pub fn state(&self) -> Result<IndexState> {
        self.kernel.index_state(self.descriptor)
    }

    /// Drops the index. Constraint-backing indexes are only removable by
    /// dropping the owning uniqueness constraint.
    pub fn drop(self) -> Result<()> {
        if self.constraint_backing {
            return Err(KernelError::ConstraintIndexDropRejected);
        }
        let mut tx = self.kernel.schema_transaction();
        tx.index_drop(self.descriptor)?;
        tx.commit()
    }
}
