use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{KernelError, Result};
use crate::index::population::{Completion, PopulationHandle, PopulationJob};
use crate::index::proxy::{FlippableProxy, IndexPopulationFailure};
use crate::index::queue::UpdateQueue;
use crate::index::scan::StoreView;
use crate::index::state::IndexState;
use crate::index::update::NodePropertyUpdate;
use crate::index::writer::HashIndexWriter;
use crate::model::{IndexableValue, NodeId};
use crate::schema::cache::SchemaStateCache;
use crate::schema::descriptor::IndexDescriptor;
use crate::schema::rules::{IndexRule, SchemaStore};

struct IndexEntry {
    proxy: Arc<FlippableProxy>,
    population: Option<PopulationHandle>,
}

/// Registry of live index proxies and their population jobs.
///
/// Holds the invariant that per descriptor at most one population job is
/// running at any time.
pub struct IndexingService {
    config: Config,
    store_view: Arc<dyn StoreView>,
    rules: Arc<SchemaStore>,
    cache: Arc<SchemaStateCache>,
    entries: DashMap<IndexDescriptor, IndexEntry>,
}

impl IndexingService {
    pub fn new(
        config: Config,
        store_view: Arc<dyn StoreView>,
        rules: Arc<SchemaStore>,
        cache: Arc<SchemaStateCache>,
    ) -> Self {
        Self {
            config,
            store_view,
            rules,
            cache,
            entries: DashMap::new(),
        }
    }

    /// Creates the proxy for `rule` and spawns its population worker.
    ///
    /// A second call for a descriptor whose populator is still running is a
    /// no-op returning `false`.
    pub fn start_population(&self, rule: &IndexRule) -> Result<bool> {
        let descriptor = rule.descriptor;
        if let Some(entry) = self.entries.get(&descriptor) {
            let still_running = entry
                .population
                .as_ref()
                .is_some_and(|handle| !handle.is_done());
            if still_running {
                warn!(index = %descriptor, "population already running, not starting another");
                return Ok(false);
            }
            drop(entry);
            self.entries.remove(&descriptor);
        }

        let queue = Arc::new(UpdateQueue::new());
        let proxy = Arc::new(FlippableProxy::new_populating(
            descriptor,
            Arc::clone(&queue),
        ));
        let writer = Box::new(HashIndexWriter::new(
            descriptor,
            rule.kind.is_constraint_backing(),
        ));
        let job = PopulationJob::new(
            descriptor,
            writer,
            Arc::clone(&proxy),
            queue,
            Arc::clone(&self.store_view),
            Arc::clone(&self.rules),
            Arc::clone(&self.cache),
            self.config.progress_log_interval,
        );
        let handle = job.handle();
        self.entries.insert(
            descriptor,
            IndexEntry {
                proxy,
                population: Some(handle),
            },
        );
        let thread_name = job.thread_name();
        if let Err(spawn_error) = thread::Builder::new()
            .name(thread_name)
            .spawn(move || job.run())
        {
            self.entries.remove(&descriptor);
            return Err(KernelError::Io(spawn_error));
        }
        Ok(true)
    }

    /// Restores the proxy of a rule whose population failed in an earlier
    /// run, carrying the persisted failure text.
    pub fn install_failed(&self, rule: &IndexRule) {
        let failure = match rule.failure_message.clone() {
            Some(message) => IndexPopulationFailure::from_message(message),
            None => IndexPopulationFailure::unknown(),
        };
        let proxy = Arc::new(FlippableProxy::new_failed(rule.descriptor, failure));
        self.entries.insert(
            rule.descriptor,
            IndexEntry {
                proxy,
                population: None,
            },
        );
    }

    /// Routes one committed update to the index on `descriptor`, if any.
    ///
    /// Updates against failed indexes are dropped with a debug log rather
    /// than failing the committing transaction.
    pub fn apply_update(&self, descriptor: IndexDescriptor, update: NodePropertyUpdate) {
        let Some(entry) = self.entries.get(&descriptor) else {
            return;
        };
        if let Err(err) = entry.proxy.apply_updates([update]) {
            match err {
                KernelError::IndexPopulationFailed { .. }
                | KernelError::IndexProxyAlreadyClosed(_) => {
                    debug!(index = %descriptor, cause = %err, "dropping update for dead index");
                }
                other => {
                    warn!(index = %descriptor, cause = %other, "index update failed");
                }
            }
        }
    }

    pub fn index_state(&self, descriptor: IndexDescriptor) -> Option<IndexState> {
        self.entries
            .get(&descriptor)
            .map(|entry| entry.proxy.state())
    }

    pub fn lookup(&self, descriptor: IndexDescriptor, value: &IndexableValue) -> Result<Vec<NodeId>> {
        let entry = self
            .entries
            .get(&descriptor)
            .ok_or(KernelError::NoSuchIndex(descriptor))?;
        entry.proxy.lookup(value)
    }

    pub fn await_population(&self, descriptor: IndexDescriptor) {
        let handle = self
            .entries
            .get(&descriptor)
            .and_then(|entry| entry.population.clone());
        if let Some(handle) = handle {
            handle.await_completion();
        }
    }

    pub fn cancel_population(&self, descriptor: IndexDescriptor) -> Option<Completion> {
        let handle = self
            .entries
            .get(&descriptor)
            .and_then(|entry| entry.population.clone());
        handle.map(|h| h.cancel())
    }

    /// Tears the index down: cancels any running population and closes the
    /// proxy so late callers observe it as already closed.
    pub fn drop_index(&self, descriptor: IndexDescriptor) {
        if let Some((_, entry)) = self.entries.remove(&descriptor) {
            if let Some(handle) = entry.population {
                handle.cancel().wait();
            }
            if let Err(err) = entry.proxy.close() {
                debug!(index = %descriptor, cause = %err, "proxy already closed on drop");
            }
        }
    }

    /// Cancels every running population and waits out their completion.
    pub fn shutdown(&self) {
        let descriptors: Vec<IndexDescriptor> =
            self.entries.iter().map(|entry| *entry.key()).collect();
        for descriptor in descriptors {
            let handle = self
                .entries
                .get(&descriptor)
                .and_then(|entry| entry.population.clone());
            if let Some(handle) = handle {
                if !handle.is_done() {
                    let completion = handle.cancel();
                    if !completion.wait_for(Duration::from_secs(10)) {
                        warn!(index = %descriptor, "population did not stop within shutdown grace");
                    }
                }
            }
        }
        self.entries.clear();
    }
}
