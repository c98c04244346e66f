pub mod population;
pub mod proxy;
pub mod queue;
pub mod recovery;
pub mod scan;
pub mod service;
pub mod state;
pub mod update;
pub mod writer;

pub use population::{Completion, PopulationHandle, PopulationJob};
pub use proxy::{FlipContext, FlippableProxy, IndexPopulationFailure};
pub use queue::UpdateQueue;
pub use recovery::RecoveryCoordinator;
pub use scan::{ScanStopToken, ScanVisitor, StoreScan, StoreView};
pub use service::IndexingService;
pub use state::{next_state, IndexEvent, IndexState, IndexStateKind, Transition};
pub use update::{NodePropertyUpdate, UpdateKind};
pub use writer::{HashIndexWriter, IndexWriter};
