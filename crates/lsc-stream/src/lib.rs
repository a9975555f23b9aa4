#![forbid(unsafe_code)]
//! Backing streams consumed by the cache.
//!
//! The cache only needs two things from its source: move to an offset, and
//! read up to N bytes, with a short or empty read meaning "no more data".
//! [`BackingStream`] captures exactly that. Adapters cover the common
//! sources:
//!
//! - [`SeekableStream`]: any `Read + Seek` (files, in-memory cursors).
//! - [`UnseekableStream`]: any `Read` (pipes, sockets); forward-only.
//! - [`ChunkedStream`]: a virtual stream stitched together from
//!   discontiguous regions of other streams.
//!
//! [`StreamCursor`] adds position tracking on top, enforcing the
//! forward-only restriction for unseekable sources.

mod chunked;

pub use chunked::{Chunk, ChunkRouter, ChunkedStream};

use lsc_error::{LscError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Seek/read byte source.
pub trait BackingStream: Send {
    /// Whether [`seek_to`](Self::seek_to) may move to arbitrary offsets.
    fn is_seekable(&self) -> bool;

    /// Move the read position to `offset`.
    fn seek_to(&mut self, offset: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes. `Ok(0)` signals end of data.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Total length, when the source can tell without reading it all.
    fn known_len(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// A backing stream shared between several readers (e.g. chunks of one
/// file).
pub type SharedStream = Arc<Mutex<dyn BackingStream>>;

/// Wrap a stream for sharing.
pub fn shared<S: BackingStream + 'static>(stream: S) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// Read until `buf` is full or the source reports end of data.
pub fn read_full(stream: &mut dyn BackingStream, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    fill(stream, buf, &mut filled)?;
    Ok(filled)
}

/// Like [`read_full`], but `filled` reports the bytes consumed from the
/// source even when a later read fails.
fn fill(stream: &mut dyn BackingStream, buf: &mut [u8], filled: &mut usize) -> Result<()> {
    while *filled < buf.len() {
        match stream.read_into(&mut buf[*filled..]) {
            Ok(0) => break,
            Ok(n) => *filled += n,
            Err(LscError::Io(err)) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Adapter for any `Read + Seek` source.
#[derive(Debug)]
pub struct SeekableStream<T> {
    inner: T,
}

impl<T: Read + Seek + Send> SeekableStream<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl SeekableStream<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl SeekableStream<Cursor<Vec<u8>>> {
    /// In-memory stream over `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }
}

impl<T: Read + Seek + Send> BackingStream for SeekableStream<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf)?)
    }

    fn known_len(&mut self) -> Result<Option<u64>> {
        let pos = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(Some(end))
    }
}

/// Adapter for a forward-only `Read` source.
///
/// Seeking is accepted only to the current position.
#[derive(Debug)]
pub struct UnseekableStream<T> {
    inner: T,
    pos: u64,
}

impl<T: Read + Send> UnseekableStream<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self { inner, pos: 0 }
    }
}

impl<T: Read + Send> BackingStream for UnseekableStream<T> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset != self.pos {
            return Err(LscError::UnseekablePosition {
                current: self.pos,
                requested: offset,
            });
        }
        Ok(())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// A backing stream plus the position the cache believes it is at.
///
/// For seekable sources every load seeks explicitly. For unseekable ones
/// the cursor only ever moves forward by reading, and a load that would
/// need to move elsewhere fails with [`LscError::UnseekablePosition`].
pub struct StreamCursor {
    stream: Box<dyn BackingStream>,
    pos: u64,
    seekable: bool,
}

impl fmt::Debug for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCursor")
            .field("pos", &self.pos)
            .field("seekable", &self.seekable)
            .finish_non_exhaustive()
    }
}

impl StreamCursor {
    #[must_use]
    pub fn new(stream: Box<dyn BackingStream>) -> Self {
        let seekable = stream.is_seekable();
        Self {
            stream,
            pos: 0,
            seekable,
        }
    }

    #[must_use]
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Length of the underlying source, if knowable up front. Always
    /// `None` for unseekable sources.
    pub fn known_len(&mut self) -> Result<Option<u64>> {
        if !self.seekable {
            return Ok(None);
        }
        self.stream.known_len()
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if self.seekable {
            self.stream.seek_to(offset)?;
            self.pos = offset;
            return Ok(());
        }
        if offset != self.pos {
            return Err(LscError::UnseekablePosition {
                current: self.pos,
                requested: offset,
            });
        }
        Ok(())
    }

    /// Read up to `max` bytes from the current position. A result shorter
    /// than `max` means the source ended.
    ///
    /// On error the position still advances past whatever the source
    /// consumed, so an unseekable source cannot be re-read at a stale
    /// offset.
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; max];
        let mut n = 0;
        let result = fill(&mut *self.stream, &mut buf, &mut n);
        self.pos += n as u64;
        if let Err(err) = result {
            trace!(target: "lsc::stream", pos = self.pos, lost = n, error = %err, "cursor_read_failed");
            return Err(err);
        }
        buf.truncate(n);
        trace!(target: "lsc::stream", pos = self.pos, requested = max, got = n, "cursor_read");
        Ok(buf)
    }
}
