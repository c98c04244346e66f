pub mod cache;
pub mod descriptor;
pub mod handle;
pub mod rules;
pub mod statement;

pub use cache::SchemaStateCache;
pub use descriptor::{IndexDescriptor, UniquenessConstraint};
pub use handle::IndexHandle;
pub use rules::{IndexRule, RuleKind, RuleState, SchemaStore, UniquenessConstraintRule};
pub use statement::{SchemaTransaction, Transactor, TxState};
