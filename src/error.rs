use std::io;

use thiserror::Error;

use crate::model::{IndexableValue, NodeId};
use crate::schema::descriptor::{IndexDescriptor, UniquenessConstraint};

pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors surfaced by the schema-index kernel.
///
/// The `AlreadyConstrained`, `AlreadyIndexed`, `NoSuchIndex` and
/// `ConstraintIndexDropRejected` messages are part of the user-facing
/// contract and must not be reworded.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("Unable to add index {index} : Already constrained {constraint}.")]
    AlreadyConstrained {
        index: IndexDescriptor,
        constraint: UniquenessConstraint,
    },

    #[error("Unable to add index {0} : Already indexed {0}.")]
    AlreadyIndexed(IndexDescriptor),

    #[error("Unable to drop index on {0}: No such INDEX ON {0}.")]
    NoSuchIndex(IndexDescriptor),

    #[error("Failed to populate index {descriptor}: {cause}")]
    IndexPopulationFailed {
        descriptor: IndexDescriptor,
        cause: String,
    },

    #[error("Both node {existing} and node {added} share the property value {value}")]
    IndexEntryConflict {
        value: IndexableValue,
        existing: NodeId,
        added: NodeId,
    },

    #[error("index proxy for {0} is already closed")]
    IndexProxyAlreadyClosed(IndexDescriptor),

    #[error(
        "Constraint indexes cannot be dropped directly, \
         instead drop the owning uniqueness constraint."
    )]
    ConstraintIndexDropRejected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
