#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod index;
pub mod kernel;
pub mod logging;
pub mod model;
pub mod schema;
pub mod store;

pub use crate::config::Config;
pub use crate::error::{KernelError, Result};
pub use crate::index::{IndexState, NodePropertyUpdate, UpdateKind};
pub use crate::kernel::GraphKernel;
pub use crate::model::{IndexableValue, LabelId, NodeId, PropertyKeyId, PropertyValue};
pub use crate::schema::{IndexDescriptor, UniquenessConstraint};
pub use crate::store::NodeStore;
