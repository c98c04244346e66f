use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::index::update::NodePropertyUpdate;
use crate::schema::descriptor::IndexDescriptor;

/// Receives the updates a store scan produces, in ascending node order.
/// Returning an error aborts the scan with that error.
pub trait ScanVisitor {
    fn visit(&mut self, update: NodePropertyUpdate) -> Result<()>;
}

/// Cooperative stop flag shared between a running scan and its canceller.
#[derive(Debug, Default)]
pub struct ScanStopToken {
    stopped: AtomicBool,
}

impl ScanStopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Single forward pass over all nodes currently matching a descriptor.
///
/// After the stop token fires, `run` returns promptly without guaranteeing
/// completion.
pub trait StoreScan: Send {
    fn run(&mut self, visitor: &mut dyn ScanVisitor) -> Result<()>;
}

/// Source of population scans; implemented by the node store.
pub trait StoreView: Send + Sync {
    fn visit_nodes_matching(
        &self,
        descriptor: IndexDescriptor,
        stop: Arc<ScanStopToken>,
    ) -> Box<dyn StoreScan>;
}
