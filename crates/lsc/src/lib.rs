#![forbid(unsafe_code)]
//! Lazy linear sparse cache public API facade.
//!
//! Re-exports the cache, stream adapters and worker pool through one crate.
//! Typical use:
//!
//! ```no_run
//! use lsc::{CachedStream, ProxyConfig, SeekableStream, Server, ServerConfig};
//!
//! # fn main() -> lsc::Result<()> {
//! let server = Server::new(ServerConfig::default())?;
//! let proxy = CachedStream::new(SeekableStream::open("disk.img")?, &server, ProxyConfig::default())?;
//! let _parts = proxy.get(0, 512)?; // never blocks; gaps load in the background
//! while !proxy.reset_updated() {
//!     std::thread::yield_now();
//! }
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

pub use lsc_cache::{Block, BlockKind, LinearCache};
pub use lsc_error::{LscError, Result};
pub use lsc_pool::{CacheReader, CachedStream, ProxyConfig, ProxyStats, Server, ServerConfig};
pub use lsc_stream::{
    BackingStream, Chunk, ChunkRouter, ChunkedStream, SeekableStream, SharedStream, StreamCursor,
    UnseekableStream, read_full, shared,
};
pub use lsc_types::{Clock, LogicalClock, Region, Timestamp};
