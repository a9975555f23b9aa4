#![forbid(unsafe_code)]
//! Background loading for [`lsc_cache::LinearCache`].
//!
//! A [`Server`] owns a bounded pool of worker threads. Each
//! [`CachedStream`] pairs one backing stream with one cache and queues an
//! aligned load request whenever a query runs into an uncached gap. Queries
//! themselves never block; consumers poll
//! [`CachedStream::reset_updated`] to learn that new data arrived, or use
//! [`CachedStream::load`] / [`CacheReader`] to fill gaps inline.
//!
//! ```text
//!  foreground                      server                       workers
//!  ──────────                      ──────                       ───────
//!  get(off, len) ──gap──▶ queue_load(region)
//!                          │ proxy Idle → Queued
//!                          └──▶ enqueue(proxy) ──▶ [proxy queue] ──▶ claim
//!                                                                    │
//!                                 cache.add_data / truncate ◀── read ┘
//! ```
//!
//! Request queues are unbounded: a caller touching very many distinct gaps
//! grows them without limit. Only the thread count is bounded.

mod config;
mod proxy;
mod reader;
mod server;

pub use config::{ProxyConfig, ServerConfig};
pub use proxy::{CachedStream, ProxyStats};
pub use reader::CacheReader;
pub use server::Server;
