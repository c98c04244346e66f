//! Legal transitions of an index through its lifecycle.
//!
//! Kept as a pure function over `(current, event)` so the transition table is
//! testable in isolation; both the flippable proxy and startup recovery
//! consult it before mutating anything.

use crate::error::{KernelError, Result};
use crate::schema::descriptor::IndexDescriptor;

/// Externally observable state of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Populating,
    Online,
    Failed { message: String },
    /// A constraint-backing index persisted before its owning uniqueness
    /// constraint has been committed.
    AwaitingConstraintOwner,
}

impl IndexState {
    pub fn kind(&self) -> IndexStateKind {
        match self {
            IndexState::Populating => IndexStateKind::Populating,
            IndexState::Online => IndexStateKind::Online,
            IndexState::Failed { .. } => IndexStateKind::Failed,
            IndexState::AwaitingConstraintOwner => IndexStateKind::AwaitingConstraintOwner,
        }
    }
}

/// State without its payload, the unit the transition table operates on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexStateKind {
    Populating,
    Online,
    Failed,
    AwaitingConstraintOwner,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexEvent {
    ScanDone,
    FlipOk,
    FlipFail,
    Drop,
    RecoverOrphan,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    To(IndexStateKind),
    Removed,
}

/// Returns the state an index moves to when `event` hits it in `current`.
///
/// `Online` and `Failed` are terminal for population purposes: an online
/// index never re-enters population or fails in place, and a failed index
/// only accepts failure refinement (`Failed -> Failed`) or a drop.
pub fn next_state(
    descriptor: IndexDescriptor,
    current: IndexStateKind,
    event: IndexEvent,
) -> Result<Transition> {
    use IndexEvent::*;
    use IndexStateKind::*;

    match (current, event) {
        (Populating, ScanDone) => Ok(Transition::To(Populating)),
        (Populating, FlipOk) => Ok(Transition::To(Online)),
        (Populating, FlipFail) => Ok(Transition::To(Failed)),
        (Populating, Drop) => Ok(Transition::Removed),

        // A constraint-backing index populates while its owner is pending.
        (AwaitingConstraintOwner, ScanDone) => Ok(Transition::To(AwaitingConstraintOwner)),
        (AwaitingConstraintOwner, FlipOk) => Ok(Transition::To(Online)),
        (AwaitingConstraintOwner, FlipFail) => Ok(Transition::To(Failed)),
        (AwaitingConstraintOwner, Drop) => Ok(Transition::Removed),
        (AwaitingConstraintOwner, RecoverOrphan) => Ok(Transition::Removed),

        (Online, Drop) => Ok(Transition::Removed),
        (Failed, Drop) => Ok(Transition::Removed),

        // Failure refinement: the preemptive failed delegate is replaced by
        // one carrying the actual cause.
        (Failed, FlipFail) => Ok(Transition::To(Failed)),

        (Online, ScanDone | FlipOk | FlipFail) | (Failed, ScanDone | FlipOk) => {
            Err(KernelError::IndexProxyAlreadyClosed(descriptor))
        }

        (Populating | Online | Failed, RecoverOrphan) => Err(KernelError::InvalidArgument(
            format!("index {descriptor} is not an ownerless constraint index"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor::new(5u64, 8u64)
    }

    #[test]
    fn populating_flips_online_or_failed() {
        assert_eq!(
            next_state(descriptor(), IndexStateKind::Populating, IndexEvent::FlipOk).unwrap(),
            Transition::To(IndexStateKind::Online)
        );
        assert_eq!(
            next_state(descriptor(), IndexStateKind::Populating, IndexEvent::FlipFail).unwrap(),
            Transition::To(IndexStateKind::Failed)
        );
        assert_eq!(
            next_state(descriptor(), IndexStateKind::Populating, IndexEvent::ScanDone).unwrap(),
            Transition::To(IndexStateKind::Populating)
        );
    }

    #[test]
    fn online_never_leaves_except_by_drop() {
        for event in [IndexEvent::ScanDone, IndexEvent::FlipOk, IndexEvent::FlipFail] {
            let result = next_state(descriptor(), IndexStateKind::Online, event);
            assert!(matches!(
                result,
                Err(KernelError::IndexProxyAlreadyClosed(_))
            ));
        }
        assert_eq!(
            next_state(descriptor(), IndexStateKind::Online, IndexEvent::Drop).unwrap(),
            Transition::Removed
        );
    }

    #[test]
    fn failed_accepts_refinement() {
        assert_eq!(
            next_state(descriptor(), IndexStateKind::Failed, IndexEvent::FlipFail).unwrap(),
            Transition::To(IndexStateKind::Failed)
        );
        assert!(next_state(descriptor(), IndexStateKind::Failed, IndexEvent::FlipOk).is_err());
    }

    #[test]
    fn orphan_recovery_only_applies_to_ownerless_constraint_indexes() {
        assert_eq!(
            next_state(
                descriptor(),
                IndexStateKind::AwaitingConstraintOwner,
                IndexEvent::RecoverOrphan
            )
            .unwrap(),
            Transition::Removed
        );
        for state in [
            IndexStateKind::Populating,
            IndexStateKind::Online,
            IndexStateKind::Failed,
        ] {
            assert!(next_state(descriptor(), state, IndexEvent::RecoverOrphan).is_err());
        }
    }
}
