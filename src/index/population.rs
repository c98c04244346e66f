//! One job of initially populating an index over existing data while the
//! store keeps accepting writes.
//!
//! The job scans the store directly, interleaving queue drains bounded by
//! the scan frontier so a node's queued updates never overtake its scan
//! entry, then flips the proxy online under the flip barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::{KernelError, Result};
use crate::index::proxy::{FlipContext, FlippableProxy, IndexPopulationFailure};
use crate::index::queue::UpdateQueue;
use crate::index::scan::{ScanStopToken, ScanVisitor, StoreView};
use crate::index::update::NodePropertyUpdate;
use crate::index::writer::IndexWriter;
use crate::model::NodeId;
use crate::schema::cache::SchemaStateCache;
use crate::schema::descriptor::IndexDescriptor;
use crate::schema::rules::SchemaStore;

/// One-shot latch released exactly once when a population job finishes,
/// however it finishes.
#[derive(Debug, Default)]
pub struct DoneLatch {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl DoneLatch {
    pub fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.condvar.notify_all();
    }

    pub fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.condvar.wait(&mut released);
        }
    }

    /// Returns `false` if the timeout elapsed before release.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut released = self.released.lock();
        while !*released {
            if self.condvar.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }
        true
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }
}

#[derive(Debug, Default)]
struct PopulationControl {
    cancelled: AtomicBool,
    scan_stop: Arc<ScanStopToken>,
    done: DoneLatch,
}

/// Completion signal returned by [`PopulationHandle::cancel`].
#[derive(Clone)]
pub struct Completion {
    control: Arc<PopulationControl>,
}

impl Completion {
    pub fn wait(&self) {
        self.control.done.wait();
    }

    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.control.done.wait_for(timeout)
    }

    pub fn is_done(&self) -> bool {
        self.control.done.is_released()
    }
}

/// Shared handle to a running (or finished) population job.
#[derive(Clone)]
pub struct PopulationHandle {
    proxy: Arc<FlippableProxy>,
    control: Arc<PopulationControl>,
}

impl PopulationHandle {
    /// A transaction happened that produced the given updates; route them to
    /// the index. While populating they land on the queue, after the flip
    /// they hit the online writer directly.
    pub fn update<I>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = NodePropertyUpdate>,
    {
        self.proxy.apply_updates(updates)
    }

    /// Stops the population cooperatively. Idempotent; cancelling a job that
    /// already flipped is a no-op whose completion is already released.
    pub fn cancel(&self) -> Completion {
        self.control.cancelled.store(true, Ordering::SeqCst);
        self.control.scan_stop.stop();
        Completion {
            control: Arc::clone(&self.control),
        }
    }

    pub fn await_completion(&self) {
        self.control.done.wait();
    }

    pub fn is_done(&self) -> bool {
        self.control.done.is_released()
    }
}

pub struct PopulationJob {
    descriptor: IndexDescriptor,
    user_description: String,
    writer: Option<Box<dyn IndexWriter>>,
    proxy: Arc<FlippableProxy>,
    store_view: Arc<dyn StoreView>,
    rules: Arc<SchemaStore>,
    cache: Arc<SchemaStateCache>,
    queue: Arc<UpdateQueue>,
    control: Arc<PopulationControl>,
    progress_log_interval: u64,
}

impl PopulationJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        descriptor: IndexDescriptor,
        writer: Box<dyn IndexWriter>,
        proxy: Arc<FlippableProxy>,
        queue: Arc<UpdateQueue>,
        store_view: Arc<dyn StoreView>,
        rules: Arc<SchemaStore>,
        cache: Arc<SchemaStateCache>,
        progress_log_interval: u64,
    ) -> Self {
        Self {
            user_description: descriptor.to_string(),
            descriptor,
            writer: Some(writer),
            proxy,
            store_view,
            rules,
            cache,
            queue,
            control: Arc::new(PopulationControl::default()),
            progress_log_interval: progress_log_interval.max(1),
        }
    }

    pub fn handle(&self) -> PopulationHandle {
        PopulationHandle {
            proxy: Arc::clone(&self.proxy),
            control: Arc::clone(&self.control),
        }
    }

    /// Name for the worker thread running this job.
    pub fn thread_name(&self) -> String {
        format!("index-populator-{}", self.user_description)
    }

    /// Runs the job to completion on the current thread. The done latch is
    /// released on every exit path, a panicking writer included.
    pub fn run(mut self) {
        let _done = DoneGuard(Arc::clone(&self.control));
        info!(index = %self.user_description, "index population started");
        match self.populate() {
            Ok(Outcome::Flipped) => {
                info!(
                    index = %self.user_description,
                    "index population completed, index is now online"
                );
            }
            Ok(Outcome::Cancelled) => {
                // We remain in the populating state; a restart re-detects the
                // rule and retries. The writer still discards partial state.
                if let Some(writer) = self.writer.as_mut() {
                    if let Err(close_error) = writer.close(false) {
                        error!(
                            index = %self.user_description,
                            cause = %close_error,
                            "unable to close cancelled index writer"
                        );
                    }
                }
                info!(index = %self.user_description, "index population cancelled");
            }
            Err(cause) => self.handle_failure(cause),
        }
    }

    fn populate(&mut self) -> Result<Outcome> {
        self.writer_mut()?.create()?;
        self.index_all_nodes()?;
        if self.control.cancelled.load(Ordering::SeqCst) {
            return Ok(Outcome::Cancelled);
        }

        let writer = self.writer.take().ok_or_else(|| {
            KernelError::InvalidArgument(format!(
                "population writer for {} already consumed",
                self.user_description
            ))
        })?;
        let context = FlipContext {
            rules: Arc::clone(&self.rules),
            cache: Arc::clone(&self.cache),
        };
        match self.proxy.flip_to_online(writer, &self.queue, &context) {
            Ok(()) => Ok(Outcome::Flipped),
            Err(failure) => {
                // The proxy has preemptively flipped to a failed delegate;
                // hand the writer back for teardown and refine the cause.
                self.writer = failure.writer;
                Err(failure.cause)
            }
        }
    }

    fn index_all_nodes(&mut self) -> Result<()> {
        let mut scan = self
            .store_view
            .visit_nodes_matching(self.descriptor, Arc::clone(&self.control.scan_stop));
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| {
                KernelError::InvalidArgument(format!(
                    "population writer for {} already consumed",
                    self.user_description
                ))
            })?
            .as_mut();
        let mut visitor = PopulatingVisitor {
            writer,
            queue: &self.queue,
            indexed: 0,
            progress_log_interval: self.progress_log_interval,
            user_description: &self.user_description,
        };
        scan.run(&mut visitor)
    }

    fn handle_failure(&mut self, cause: KernelError) {
        // Entry conflicts are expected on unique indexes and shutdown races
        // produce closed-proxy errors; neither deserves error severity.
        let quiet = matches!(
            cause,
            KernelError::IndexEntryConflict { .. } | KernelError::IndexProxyAlreadyClosed(_)
        );
        if quiet {
            debug!(index = %self.user_description, cause = %cause, "index population stopped");
        } else {
            error!(index = %self.user_description, cause = %cause, "failed to populate index");
        }

        let failure = IndexPopulationFailure::from_error(&cause);
        if let Some(writer) = self.writer.as_mut() {
            if let Err(close_error) = Self::abort_writer(writer.as_mut(), &failure) {
                error!(
                    index = %self.user_description,
                    cause = %close_error,
                    "unable to close failed index writer"
                );
            }
        }
        if let Err(persist_error) = self.rules.set_failed(self.descriptor, failure.message()) {
            error!(
                index = %self.user_description,
                cause = %persist_error,
                "unable to persist index population failure"
            );
        }
        if let Err(flip_error) = self.proxy.flip_to_failed(failure) {
            debug!(
                index = %self.user_description,
                cause = %flip_error,
                "index proxy gone during failure flip"
            );
        }
    }

    fn abort_writer(writer: &mut dyn IndexWriter, failure: &IndexPopulationFailure) -> Result<()> {
        writer.mark_failed(failure.message())?;
        writer.close(false)
    }

    fn writer_mut(&mut self) -> Result<&mut Box<dyn IndexWriter>> {
        self.writer.as_mut().ok_or_else(|| {
            KernelError::InvalidArgument(format!(
                "population writer for {} already consumed",
                self.user_description
            ))
        })
    }
}

enum Outcome {
    Flipped,
    Cancelled,
}

struct DoneGuard(Arc<PopulationControl>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.done.release();
    }
}

struct PopulatingVisitor<'a> {
    writer: &'a mut dyn IndexWriter,
    queue: &'a UpdateQueue,
    indexed: u64,
    progress_log_interval: u64,
    user_description: &'a str,
}

impl ScanVisitor for PopulatingVisitor<'_> {
    fn visit(&mut self, update: NodePropertyUpdate) -> Result<()> {
        let frontier = update.node;
        if let Some(value) = update.value_after.as_ref() {
            self.writer.add(frontier, value)?;
        }
        self.indexed += 1;
        if self.indexed % self.progress_log_interval == 0 {
            debug!(
                index = %self.user_description,
                nodes = self.indexed,
                queued = self.queue.len(),
                "index population progress"
            );
        }
        drain_queue_upto(self.writer, self.queue, frontier)
    }
}

/// Applies already-queued updates whose target node the scan has passed.
/// Updates beyond the frontier stay queued for the terminal drain at flip
/// time, preserving per-node ordering against the scan's own `add`.
fn drain_queue_upto(
    writer: &mut dyn IndexWriter,
    queue: &UpdateQueue,
    frontier: NodeId,
) -> Result<()> {
    if queue.is_empty() {
        return Ok(());
    }
    let batch = queue.drain_while(|update| update.node <= frontier);
    if !batch.is_empty() {
        writer.apply(batch)?;
    }
    Ok(())
}
