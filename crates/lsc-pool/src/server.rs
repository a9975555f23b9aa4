//! Bounded worker pool servicing proxies with outstanding loads.
//!
//! The scheduling queue holds *proxies*, not individual requests. A worker
//! claims one proxy and drains its pending requests in FIFO order before
//! going back for the next; different proxies are drained concurrently by
//! different workers.
//!
//! Threads start at `init_worker_count` and grow on demand up to
//! `max_worker_count`. They are joined by [`Server::shutdown`], or when the
//! last [`Server`] clone is dropped.

use crate::config::ServerConfig;
use lsc_error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Something a worker can drain: in practice a proxy's pending queue.
pub(crate) trait LoadQueue: Send + Sync {
    /// Run the oldest pending request.
    ///
    /// Returns `false` once the queue is empty, after marking the owner idle
    /// under the same lock that guards its queue; a request queued after
    /// that point schedules the owner again.
    fn run_next(&self) -> bool;

    /// Identifier for log fields.
    fn queue_id(&self) -> u64;
}

struct SchedState {
    queue: VecDeque<Arc<dyn LoadQueue>>,
    free_workers: usize,
    live_workers: usize,
    spawned_total: usize,
    running: bool,
    handles: Vec<JoinHandle<()>>,
}

struct ServerShared {
    state: Mutex<SchedState>,
    wake: Condvar,
    config: ServerConfig,
}

impl ServerShared {
    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start one more worker. Caller holds the scheduling lock.
    fn spawn_worker(self: &Arc<Self>, state: &mut SchedState) {
        let n = state.spawned_total;
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{n}", self.config.thread_name_prefix))
            .spawn(move || worker_main(&shared, n));
        match spawned {
            Ok(handle) => {
                state.handles.push(handle);
                state.live_workers += 1;
                state.spawned_total += 1;
                debug!(
                    target: "lsc::pool",
                    worker = n,
                    live_workers = state.live_workers,
                    "worker_spawned"
                );
            }
            Err(err) => {
                warn!(
                    target: "lsc::pool",
                    worker = n,
                    live_workers = state.live_workers,
                    error = %err,
                    "worker_spawn_failed"
                );
            }
        }
    }

    fn enqueue(self: &Arc<Self>, target: Arc<dyn LoadQueue>) {
        let mut state = self.state.lock();
        if !state.running {
            debug!(target: "lsc::pool", queue = target.queue_id(), "enqueue_after_shutdown");
            return;
        }
        let id = target.queue_id();
        state.queue.push_back(target);
        if state.free_workers < state.queue.len()
            && state.live_workers < self.config.max_worker_count
        {
            self.spawn_worker(&mut state);
        }
        debug!(
            target: "lsc::pool",
            queue = id,
            queued = state.queue.len(),
            free_workers = state.free_workers,
            live_workers = state.live_workers,
            "enqueue"
        );
        drop(state);
        self.wake.notify_one();
    }

    fn shutdown(&self) {
        let handles = {
            let mut state = self.state.lock();
            if !state.running && state.handles.is_empty() {
                return;
            }
            state.running = false;
            let abandoned = state.queue.len();
            state.queue.clear();
            info!(
                target: "lsc::pool",
                live_workers = state.live_workers,
                abandoned,
                "server_shutdown"
            );
            std::mem::take(&mut state.handles)
        };
        self.wake.notify_all();
        let current = std::thread::current().id();
        for handle in handles {
            // A worker releasing the last handle cannot join itself; it
            // exits on its own once its drain loop sees the stop flag.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(target: "lsc::pool", "worker_panicked");
            }
        }
    }
}

fn worker_main(shared: &Arc<ServerShared>, worker: usize) {
    loop {
        let target = {
            let mut state = shared.state.lock();
            state.free_workers += 1;
            while state.queue.is_empty() && state.running {
                shared.wake.wait(&mut state);
            }
            state.free_workers -= 1;
            if !state.running {
                state.live_workers -= 1;
                break;
            }
            state.queue.pop_front()
        };
        let Some(target) = target else {
            continue;
        };
        debug!(target: "lsc::pool", worker, queue = target.queue_id(), "worker_claimed");
        while shared.is_running() && target.run_next() {}
    }
    debug!(target: "lsc::pool", worker, "worker_exit");
}

/// Non-owning handle through which proxies register outstanding work.
///
/// Holding one does not keep the pool running.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    shared: Arc<ServerShared>,
}

impl PoolHandle {
    /// Register `target` as having outstanding work.
    ///
    /// The caller guarantees a target is registered at most once until it
    /// reports itself drained. Grows the pool when no idle worker is left
    /// for the new entry. A no-op once the pool has shut down.
    pub(crate) fn enqueue(&self, target: Arc<dyn LoadQueue>) {
        self.shared.enqueue(target);
    }
}

/// Owner of the pool's lifetime: the last [`Server`] clone to go away
/// shuts the pool down.
struct PoolOwner {
    shared: Arc<ServerShared>,
}

impl Drop for PoolOwner {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Handle to a worker pool. Cheap to clone; all clones drive the same pool.
///
/// Dropping the last clone has the same effect as [`Server::shutdown`].
/// Proxies created from the server do not count as clones.
#[derive(Clone)]
pub struct Server {
    owner: Arc<PoolOwner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared().state.lock();
        f.debug_struct("Server")
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .field("free_workers", &state.free_workers)
            .field("live_workers", &state.live_workers)
            .field("config", &self.shared().config)
            .finish()
    }
}

impl Server {
    /// Start a pool with `config.init_worker_count` threads.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(ServerShared {
            state: Mutex::new(SchedState {
                queue: VecDeque::new(),
                free_workers: 0,
                live_workers: 0,
                spawned_total: 0,
                running: true,
                handles: Vec::new(),
            }),
            wake: Condvar::new(),
            config,
        });
        {
            let mut state = shared.state.lock();
            for _ in 0..shared.config.init_worker_count {
                shared.spawn_worker(&mut state);
            }
            info!(
                target: "lsc::pool",
                init_workers = state.live_workers,
                max_workers = shared.config.max_worker_count,
                "server_started"
            );
        }
        Ok(Self {
            owner: Arc::new(PoolOwner { shared }),
        })
    }

    fn shared(&self) -> &Arc<ServerShared> {
        &self.owner.shared
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(self.shared()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared().config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared().is_running()
    }

    /// Live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared().state.lock().live_workers
    }

    /// Workers currently idle, waiting for a proxy.
    #[must_use]
    pub fn free_worker_count(&self) -> usize {
        self.shared().state.lock().free_workers
    }

    /// Proxies waiting to be claimed by a worker.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.shared().state.lock().queue.len()
    }

    /// Stop servicing and join every worker.
    ///
    /// Reads already in flight complete; nothing further is claimed. Data
    /// already cached stays valid. Idempotent.
    pub fn shutdown(&self) {
        self.shared().shutdown();
    }
}
