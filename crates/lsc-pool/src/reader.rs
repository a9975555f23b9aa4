//! Blocking `Read + Seek` view over a [`CachedStream`].

use crate::proxy::CachedStream;
use std::io::{self, Read, Seek, SeekFrom};

/// Sequential reader that fills gaps inline through
/// [`CachedStream::load`].
///
/// Lets parsers consume cached data through plain `std::io` traits. Reads
/// stop at the first part the stream could not supply, so a read of zero
/// bytes means end of stream.
#[derive(Debug, Clone)]
pub struct CacheReader {
    proxy: CachedStream,
    pos: u64,
}

impl CacheReader {
    #[must_use]
    pub fn new(proxy: CachedStream) -> Self {
        Self { proxy, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[must_use]
    pub fn proxy(&self) -> &CachedStream {
        &self.proxy
    }

    #[must_use]
    pub fn into_inner(self) -> CachedStream {
        self.proxy
    }
}

impl Read for CacheReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = i64::try_from(self.pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset beyond i64"))?;
        let parts = self.proxy.load(offset, buf.len() as u64)?;
        let mut copied = 0;
        for part in &parts {
            let Some(data) = part.data() else {
                break;
            };
            buf[copied..copied + data.len()].copy_from_slice(data);
            copied += data.len();
        }
        self.pos += copied as u64;
        Ok(copied)
    }
}

impl Seek for CacheReader {
    /// `SeekFrom::End` is relative to the known extent, which for streams
    /// of unknown length grows as data is loaded.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.proxy.size().checked_add_signed(delta),
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
