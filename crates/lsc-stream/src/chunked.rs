//! Virtual streams composed of discontiguous backing regions.
//!
//! A [`ChunkRouter`] maps a virtual offset onto one of several
//! `(stream, local offset, size)` chunks using a prefix-sum table and binary
//! search. [`ChunkedStream`] wraps a router with a read position so the
//! composite can itself be cached or parsed like any other stream.

use crate::{BackingStream, SharedStream, read_full};
use lsc_error::{LscError, Result};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::trace;

/// One physical region contributing to a virtual stream.
#[derive(Clone)]
pub struct Chunk {
    pub source: SharedStream,
    /// Offset of the region inside `source`.
    pub offset: u64,
    pub size: u64,
}

impl Chunk {
    #[must_use]
    pub fn new(source: SharedStream, offset: u64, size: u64) -> Self {
        Self {
            source,
            offset,
            size,
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Address translation from virtual offsets to chunks.
#[derive(Debug, Clone)]
pub struct ChunkRouter {
    chunks: Vec<Chunk>,
    /// `starts[i]` is the virtual offset of chunk `i`; the final entry is
    /// the total size.
    starts: Vec<u64>,
}

impl ChunkRouter {
    pub fn new(chunks: impl IntoIterator<Item = Chunk>) -> Result<Self> {
        let chunks: Vec<Chunk> = chunks.into_iter().collect();
        let mut starts = Vec::with_capacity(chunks.len() + 1);
        let mut pos = 0_u64;
        for chunk in &chunks {
            starts.push(pos);
            pos = pos.checked_add(chunk.size).ok_or(LscError::MalformedRange {
                offset: pos,
                end: u64::MAX,
            })?;
        }
        starts.push(pos);
        Ok(Self { chunks, starts })
    }

    /// Total virtual size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.starts.last().copied().unwrap_or(0)
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Index of the chunk holding `offset`, or `None` past the end.
    /// Zero-size chunks never match.
    #[must_use]
    pub fn locate(&self, offset: u64) -> Option<usize> {
        if offset >= self.size() {
            return None;
        }
        // Last chunk starting at or before `offset`; among equal starts
        // (zero-size chunks) this picks the one that actually has bytes.
        let idx = self.starts[..self.chunks.len()].partition_point(|&s| s <= offset);
        idx.checked_sub(1)
    }

    /// Read into `buf` starting at virtual `offset`, crossing chunk
    /// boundaries as needed.
    ///
    /// Returns fewer bytes than requested when the virtual end is reached or
    /// a chunk's source underruns; only I/O failures are errors.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0_usize;
        let mut pos = offset;
        while done < buf.len() {
            let Some(idx) = self.locate(pos) else {
                break;
            };
            let chunk = &self.chunks[idx];
            let within = pos - self.starts[idx];
            let want = usize::try_from(chunk.size - within)
                .unwrap_or(usize::MAX)
                .min(buf.len() - done);
            let got = {
                let mut source = chunk.source.lock();
                source.seek_to(chunk.offset + within)?;
                read_full(&mut *source, &mut buf[done..done + want])?
            };
            trace!(
                target: "lsc::stream",
                chunk = idx,
                virtual_offset = pos,
                local_offset = chunk.offset + within,
                want,
                got,
                "chunk_read"
            );
            done += got;
            pos += got as u64;
            if got != want {
                break;
            }
        }
        Ok(done)
    }
}

/// A seekable stream over a [`ChunkRouter`].
#[derive(Debug, Clone)]
pub struct ChunkedStream {
    router: ChunkRouter,
    pos: u64,
}

impl ChunkedStream {
    pub fn new(chunks: impl IntoIterator<Item = Chunk>) -> Result<Self> {
        Ok(Self::from_router(ChunkRouter::new(chunks)?))
    }

    #[must_use]
    pub fn from_router(router: ChunkRouter) -> Self {
        Self { router, pos: 0 }
    }

    #[must_use]
    pub fn router(&self) -> &ChunkRouter {
        &self.router
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.router.size()
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl BackingStream for ChunkedStream {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.pos = offset;
        Ok(())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.router.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn known_len(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.router.size()))
    }
}

impl Read for ChunkedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl Seek for ChunkedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.router.size().checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing offset",
            ));
        };
        self.pos = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SeekableStream, shared};

    /// Virtual stream over a 4-byte-block "file" whose blocks are listed
    /// out of order, the way container formats map logical streams.
    fn scrambled() -> ChunkedStream {
        let file = shared(SeekableStream::from_bytes(b"AAAABBBBCCCCDDDD".to_vec()));
        ChunkedStream::new([
            Chunk::new(file.clone(), 8, 4),
            Chunk::new(file.clone(), 0, 4),
            Chunk::new(file, 12, 2),
        ])
        .expect("router")
    }

    #[test]
    fn locate_uses_prefix_sums() {
        let stream = scrambled();
        let router = stream.router();
        assert_eq!(router.size(), 10);
        assert_eq!(router.locate(0), Some(0));
        assert_eq!(router.locate(3), Some(0));
        assert_eq!(router.locate(4), Some(1));
        assert_eq!(router.locate(9), Some(2));
        assert_eq!(router.locate(10), None);
    }

    #[test]
    fn locate_skips_zero_size_chunks() {
        let file = shared(SeekableStream::from_bytes(vec![0_u8; 8]));
        let router = ChunkRouter::new([
            Chunk::new(file.clone(), 0, 2),
            Chunk::new(file.clone(), 2, 0),
            Chunk::new(file, 4, 2),
        ])
        .expect("router");
        assert_eq!(router.locate(1), Some(0));
        assert_eq!(router.locate(2), Some(2));
    }

    #[test]
    fn reads_cross_chunk_boundaries() {
        let mut stream = scrambled();
        let mut buf = vec![0_u8; 16];
        let n = Read::read(&mut stream, &mut buf).expect("read");
        assert_eq!(n, 10);
        assert_eq!(&buf[..n], b"CCCCAAAADD");

        Seek::seek(&mut stream, SeekFrom::Start(2)).expect("seek");
        let mut buf = [0_u8; 4];
        Read::read_exact(&mut stream, &mut buf).expect("read");
        assert_eq!(&buf, b"CCAA");
    }

    #[test]
    fn underrunning_source_yields_short_read() {
        // Second chunk claims 8 bytes but its source only has 3 past offset.
        let short = shared(SeekableStream::from_bytes(b"xyz".to_vec()));
        let full = shared(SeekableStream::from_bytes(b"0123".to_vec()));
        let router = ChunkRouter::new([
            Chunk::new(full, 0, 4),
            Chunk::new(short, 0, 8),
        ])
        .expect("router");
        let mut buf = [0_u8; 12];
        assert_eq!(router.read_at(0, &mut buf).expect("read"), 7);
        assert_eq!(&buf[..7], b"0123xyz");
    }

    #[test]
    fn seek_from_end_and_current() {
        let mut stream = scrambled();
        assert_eq!(Seek::seek(&mut stream, SeekFrom::End(-2)).expect("seek"), 8);
        assert_eq!(
            Seek::seek(&mut stream, SeekFrom::Current(-3)).expect("seek"),
            5
        );
        assert!(Seek::seek(&mut stream, SeekFrom::Current(-6)).is_err());
        assert_eq!(stream.position(), 5);
    }

    #[test]
    fn chunked_stream_is_a_backing_stream() {
        let mut stream = scrambled();
        assert_eq!(stream.known_len().expect("len"), Some(10));
        stream.seek_to(6).expect("seek");
        let mut buf = [0_u8; 8];
        assert_eq!(read_full(&mut stream, &mut buf).expect("read"), 4);
        assert_eq!(&buf[..4], b"AADD");
    }
}
