//! Cache proxy: a [`LinearCache`] in front of one backing stream.
//!
//! Queries never block. Gaps found by [`CachedStream::get`] become aligned
//! load requests on the proxy's own FIFO queue, and the proxy registers
//! itself with the [`Server`] so a worker drains that queue.
//!
//! # Drain state
//!
//! | State | Meaning | Left by |
//! |-------|---------|---------|
//! | `Idle` | not registered with the server | `queue_load` (→ `Queued`) |
//! | `Queued` | waiting in the server's queue | worker claims it (→ `Draining`) |
//! | `Draining` | a worker is running requests | queue observed empty (→ `Idle`) |
//!
//! Every transition happens under the per-proxy `pending` lock, and the
//! "queue is empty, go idle" step is the same critical section as the pop.
//! A request queued after that point sees `Idle` and re-registers.

use crate::config::ProxyConfig;
use crate::server::{LoadQueue, PoolHandle, Server};
use lsc_cache::{Block, LinearCache};
use lsc_error::Result;
use lsc_stream::{BackingStream, StreamCursor};
use lsc_types::{Clock, LogicalClock, Region};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Largest single read issued against the backing stream. Regions larger
/// than this are fetched in several steps.
const LOAD_STEP: u64 = 1 << 20;

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Idle,
    Queued,
    Draining,
}

#[derive(Debug)]
struct Pending {
    requests: VecDeque<Region>,
    state: DrainState,
    updated: bool,
    last_error: Option<String>,
}

/// Counters describing a proxy's background activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub requests_queued: u64,
    /// Requests dropped because an identical one was already pending.
    pub requests_deduplicated: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub bytes_loaded: u64,
}

struct ProxyCore {
    id: u64,
    cache: LinearCache,
    stream: Mutex<StreamCursor>,
    pending: Mutex<Pending>,
    stats: Mutex<ProxyStats>,
    align: u64,
    load_delay: Option<Duration>,
    pool: PoolHandle,
}

impl ProxyCore {
    fn queue_load(self: &Arc<Self>, region: Region) -> bool {
        let schedule = {
            let mut pending = self.pending.lock();
            if pending.requests.contains(&region) {
                drop(pending);
                self.stats.lock().requests_deduplicated += 1;
                trace!(target: "lsc::pool", proxy = self.id, %region, "load_deduplicated");
                return false;
            }
            pending.requests.push_back(region);
            let schedule = pending.state == DrainState::Idle;
            if schedule {
                pending.state = DrainState::Queued;
            }
            schedule
        };
        self.stats.lock().requests_queued += 1;
        debug!(target: "lsc::pool", proxy = self.id, %region, schedule, "load_queued");
        if schedule {
            self.pool.enqueue(Arc::clone(self) as Arc<dyn LoadQueue>);
        }
        true
    }

    /// Background execution of one request. Failures stay here.
    fn execute(&self, region: Region) {
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if let Err(err) = self.load_region(region) {
            warn!(
                target: "lsc::pool",
                proxy = self.id,
                %region,
                error_kind = err.kind(),
                error = %err,
                "load_failed"
            );
            self.pending.lock().last_error = Some(err.to_string());
        }
    }

    /// Fetch `region` from the stream into the cache.
    ///
    /// A short read means the stream ends early: the frontier is truncated
    /// to the true end and the rest of the region is not retried.
    fn load_region(&self, region: Region) -> Result<u64> {
        let result = self.fetch(region);
        let mut stats = self.stats.lock();
        match &result {
            Ok(loaded) => {
                stats.requests_completed += 1;
                stats.bytes_loaded += loaded;
            }
            Err(_) => stats.requests_failed += 1,
        }
        result
    }

    fn fetch(&self, region: Region) -> Result<u64> {
        let mut stream = self.stream.lock();
        stream.seek(region.offset)?;
        let mut loaded = 0_u64;
        while loaded < region.size {
            let want = (region.size - loaded).min(LOAD_STEP);
            #[expect(clippy::cast_possible_truncation)]
            let data = stream.read(want as usize)?;
            let got = data.len() as u64;
            let at = region.offset + loaded;
            if got > 0 {
                self.cache.add_data(data, at)?;
                loaded += got;
                self.pending.lock().updated = true;
            }
            if got < want {
                if self.cache.truncate(at + got)? {
                    self.pending.lock().updated = true;
                }
                debug!(target: "lsc::pool", proxy = self.id, %region, eof = at + got, "short_read");
                break;
            }
        }
        debug!(target: "lsc::pool", proxy = self.id, %region, loaded, "load_done");
        Ok(loaded)
    }
}

impl LoadQueue for ProxyCore {
    fn run_next(&self) -> bool {
        let region = {
            let mut pending = self.pending.lock();
            let Some(region) = pending.requests.pop_front() else {
                pending.state = DrainState::Idle;
                return false;
            };
            pending.state = DrainState::Draining;
            region
        };
        self.execute(region);
        true
    }

    fn queue_id(&self) -> u64 {
        self.id
    }
}

/// `(offset, size)` of each run of adjacent uncached parts.
///
/// An uncached tail and the range past `End` come back as separate parts;
/// aligning them one by one would queue overlapping regions.
fn uncached_spans(parts: &[Block]) -> Vec<(u64, u64)> {
    let mut spans: Vec<(u64, u64)> = Vec::new();
    for part in parts.iter().filter(|part| part.is_uncached()) {
        match spans.last_mut() {
            Some((start, len)) if *start + *len == part.offset() => *len += part.size(),
            _ => spans.push((part.offset(), part.size())),
        }
    }
    spans
}

/// A lazily filled cache over one backing stream, serviced by a [`Server`].
///
/// Cheap to clone; clones share the cache and the request queue.
#[derive(Clone)]
pub struct CachedStream {
    core: Arc<ProxyCore>,
}

impl fmt::Debug for CachedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.core.pending.lock();
        f.debug_struct("CachedStream")
            .field("id", &self.core.id)
            .field("size", &self.core.cache.size())
            .field("align", &self.core.align)
            .field("pending", &pending.requests.len())
            .field("state", &pending.state)
            .finish_non_exhaustive()
    }
}

impl CachedStream {
    /// Wrap `stream`, stamping cache entries with a fresh [`LogicalClock`].
    ///
    /// The proxy does not keep `server` alive; once the last [`Server`]
    /// clone is gone, `get` keeps answering from the cache but nothing new
    /// is loaded in the background.
    pub fn new<S>(stream: S, server: &Server, config: ProxyConfig) -> Result<Self>
    where
        S: BackingStream + 'static,
    {
        Self::with_clock(stream, server, config, Arc::new(LogicalClock::new()))
    }

    /// Wrap `stream` with an explicit clock.
    ///
    /// Seekable streams are pre-seeded with `Uncached(0, size)`, the size
    /// taken from `config.assume_size` or else asked of the stream.
    /// Unseekable streams start empty and load with byte granularity.
    pub fn with_clock<S>(
        stream: S,
        server: &Server,
        config: ProxyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        S: BackingStream + 'static,
    {
        config.validate()?;
        let id = NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed);
        let mut cursor = StreamCursor::new(Box::new(stream));
        let seekable = cursor.is_seekable();
        let seed = if !seekable {
            None
        } else if let Some(size) = config.assume_size {
            Some(size)
        } else {
            match cursor.known_len() {
                Ok(len) => len,
                Err(err) => {
                    warn!(
                        target: "lsc::pool",
                        proxy = id,
                        error = %err,
                        "stream_length_unknown"
                    );
                    None
                }
            }
        };
        let cache = match seed {
            Some(size) => LinearCache::with_known_size(size, clock),
            None => LinearCache::new(clock),
        };
        let align = if seekable { config.align } else { 1 };
        debug!(target: "lsc::pool", proxy = id, seekable, seed, align, "proxy_created");
        Ok(Self {
            core: Arc::new(ProxyCore {
                id,
                cache,
                stream: Mutex::new(cursor),
                pending: Mutex::new(Pending {
                    requests: VecDeque::new(),
                    state: DrainState::Idle,
                    updated: false,
                    last_error: None,
                }),
                stats: Mutex::new(ProxyStats::default()),
                align,
                load_delay: config.load_delay(),
                pool: server.handle(),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Load granularity actually in use.
    #[must_use]
    pub fn align(&self) -> u64 {
        self.core.align
    }

    #[must_use]
    pub fn cache(&self) -> &LinearCache {
        &self.core.cache
    }

    /// Known extent of the stream.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.core.cache.size()
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.core.cache.blocks()
    }

    /// Describe `[offset, offset + size)` from the cache as it is now,
    /// queueing background loads for every uncached part. Never blocks on
    /// I/O.
    pub fn get(&self, offset: i64, size: u64) -> Result<Vec<Block>> {
        let parts = self.core.cache.get(offset, size)?;
        for (start, len) in uncached_spans(&parts) {
            let region = Region::aligned(start, len, self.core.align)?;
            self.core.queue_load(region);
        }
        Ok(parts)
    }

    /// Queue `region` for background loading.
    ///
    /// Returns `false` when an identical request is already pending.
    pub fn queue_load(&self, region: Region) -> bool {
        self.core.queue_load(region)
    }

    /// Blocking variant of [`get`](Self::get): every gap is read inline on
    /// the calling thread before the range is described again.
    ///
    /// Gaps past the end of the stream stay uncached. The first I/O error
    /// is returned.
    pub fn load(&self, offset: i64, size: u64) -> Result<Vec<Block>> {
        let parts = self.core.cache.get(offset, size)?;
        let mut covered = 0_u64;
        for (start, len) in uncached_spans(&parts) {
            let region = Region::aligned(start, len, self.core.align)?;
            if region.end() <= covered {
                continue;
            }
            let loaded = self.core.load_region(region)?;
            if loaded < region.size {
                // Stream ended; later gaps lie past it.
                break;
            }
            covered = region.end();
        }
        self.core.cache.get(offset, size)
    }

    /// Read and clear the "cache changed" flag.
    pub fn reset_updated(&self) -> bool {
        std::mem::replace(&mut self.core.pending.lock().updated, false)
    }

    /// Requests waiting for a worker.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.core.pending.lock().requests.len()
    }

    #[must_use]
    pub fn stats(&self) -> ProxyStats {
        *self.core.stats.lock()
    }

    /// Most recent background load failure, cleared by the call.
    pub fn take_last_error(&self) -> Option<String> {
        self.core.pending.lock().last_error.take()
    }
}
