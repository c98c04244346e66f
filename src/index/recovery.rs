use std::sync::Arc;

use tracing::info;

use crate::error::{KernelError, Result};
use crate::index::state::{next_state, IndexEvent, IndexStateKind, Transition};
use crate::schema::descriptor::IndexDescriptor;
use crate::schema::rules::{RuleKind, SchemaStore};

/// Startup repair pass, run before any user transaction is admitted.
///
/// A crash between persisting a constraint-backing index and committing its
/// owning constraint leaves the index orphaned; such rules are dropped here
/// so they never become visible.
pub struct RecoveryCoordinator {
    rules: Arc<SchemaStore>,
}

impl RecoveryCoordinator {
    pub fn new(rules: Arc<SchemaStore>) -> Self {
        Self { rules }
    }

    /// Returns the descriptors of the orphans that were dropped.
    pub fn run(&self) -> Result<Vec<IndexDescriptor>> {
        let mut dropped = Vec::new();
        for rule in self.rules.index_rules() {
            let RuleKind::ConstraintBacking { owner } = rule.kind else {
                continue;
            };
            let owned = match owner {
                Some(owner_id) => self
                    .rules
                    .constraints()
                    .iter()
                    .any(|constraint| constraint.id == owner_id),
                None => self.rules.constraint_for(rule.descriptor).is_some(),
            };
            if owned {
                continue;
            }

            match next_state(
                rule.descriptor,
                IndexStateKind::AwaitingConstraintOwner,
                IndexEvent::RecoverOrphan,
            )? {
                Transition::Removed => {}
                other => {
                    return Err(KernelError::InvalidArgument(format!(
                        "unexpected recovery transition {other:?} for {}",
                        rule.descriptor
                    )))
                }
            }
            match self.rules.remove_index_rule(rule.descriptor) {
                Ok(_) => {
                    info!(index = %rule.descriptor, "dropped orphaned constraint index");
                    dropped.push(rule.descriptor);
                }
                // Already gone; someone else cleaned it up first.
                Err(KernelError::NoSuchIndex(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ownerless_backing_rule_is_dropped() {
        let dir = tempdir().expect("tempdir");
        let rules =
            Arc::new(SchemaStore::open(dir.path().join("schema_rules.json")).expect("open"));
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        rules
            .add_index_rule(descriptor, RuleKind::ConstraintBacking { owner: None })
            .expect("add orphan");

        let dropped = RecoveryCoordinator::new(Arc::clone(&rules))
            .run()
            .expect("recovery");
        assert_eq!(dropped, vec![descriptor]);
        assert!(rules.index_rule(descriptor).is_none());
    }

    #[test]
    fn owned_backing_rule_survives() {
        let dir = tempdir().expect("tempdir");
        let rules =
            Arc::new(SchemaStore::open(dir.path().join("schema_rules.json")).expect("open"));
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        rules.add_constraint(descriptor).expect("add constraint");

        let dropped = RecoveryCoordinator::new(Arc::clone(&rules))
            .run()
            .expect("recovery");
        assert!(dropped.is_empty());
        assert!(rules.index_rule(descriptor).is_some());
    }

    #[test]
    fn regular_rules_are_untouched() {
        let dir = tempdir().expect("tempdir");
        let rules =
            Arc::new(SchemaStore::open(dir.path().join("schema_rules.json")).expect("open"));
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        rules
            .add_index_rule(descriptor, RuleKind::Regular)
            .expect("add rule");

        let dropped = RecoveryCoordinator::new(Arc::clone(&rules))
            .run()
            .expect("recovery");
        assert!(dropped.is_empty());
        assert!(rules.index_rule(descriptor).is_some());
    }
}
