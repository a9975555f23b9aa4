//! Tagged block descriptions of the cached address space.

use lsc_error::{LscError, Result};
use lsc_types::Timestamp;
use std::fmt;

/// Discriminant of a [`Block`], for callers that only care about the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Uncached,
    Cached,
    End,
}

/// A contiguous sub-range of the address space.
///
/// Invariant: every non-`End` block held by a cache has a non-zero size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Known to exist but not fetched, or explicitly invalidated.
    Uncached { offset: u64, size: u64 },
    /// Bytes held in memory, stamped with the time they were fetched.
    Cached {
        offset: u64,
        data: Vec<u8>,
        timestamp: Timestamp,
    },
    /// Zero-size frontier sentinel; always the last block.
    End { offset: u64, timestamp: Timestamp },
}

impl Block {
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Uncached { .. } => BlockKind::Uncached,
            Self::Cached { .. } => BlockKind::Cached,
            Self::End { .. } => BlockKind::End,
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        match self {
            Self::Uncached { offset, .. } | Self::Cached { offset, .. } | Self::End { offset, .. } => {
                *offset
            }
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Uncached { size, .. } => *size,
            Self::Cached { data, .. } => data.len() as u64,
            Self::End { .. } => 0,
        }
    }

    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.offset() + self.size()
    }

    /// Cached payload, if any.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Cached { data, .. } => Some(data),
            Self::Uncached { .. } | Self::End { .. } => None,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Cached { timestamp, .. } | Self::End { timestamp, .. } => Some(*timestamp),
            Self::Uncached { .. } => None,
        }
    }

    #[must_use]
    pub fn is_uncached(&self) -> bool {
        matches!(self, Self::Uncached { .. })
    }

    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End { .. })
    }

    /// Whether `offset` falls inside this block. `End` spans everything at
    /// or past its offset.
    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        match self {
            Self::End { offset: start, .. } => offset >= *start,
            _ => offset >= self.offset() && offset < self.end_offset(),
        }
    }

    /// Split at `at`, keeping `[offset, at)` in `self` and returning the
    /// block that starts at `at`.
    ///
    /// Splitting `End` turns it into `Uncached` and returns a new `End` at
    /// `at` carrying the old timestamp.
    pub(crate) fn split_off(&mut self, at: u64) -> Result<Self> {
        let start = self.offset();
        let inside = at > start && (self.is_end() || at < self.end_offset());
        if !inside {
            return Err(LscError::OffsetOutsideBlock {
                offset: at,
                block_offset: start,
                block_end: self.end_offset(),
            });
        }
        let right = match self {
            Self::Uncached { size, .. } => {
                let right_size = start + *size - at;
                *size = at - start;
                Self::Uncached {
                    offset: at,
                    size: right_size,
                }
            }
            Self::Cached {
                data, timestamp, ..
            } => {
                #[expect(clippy::cast_possible_truncation)] // at - start < data.len()
                let tail = data.split_off((at - start) as usize);
                Self::Cached {
                    offset: at,
                    data: tail,
                    timestamp: *timestamp,
                }
            }
            Self::End { timestamp, .. } => {
                let right = Self::End {
                    offset: at,
                    timestamp: *timestamp,
                };
                *self = Self::Uncached {
                    offset: start,
                    size: at - start,
                };
                right
            }
        };
        Ok(right)
    }

    /// Absorb the adjacent block `right` if both are the same mergeable
    /// kind. Cached merges keep the fresher timestamp.
    pub(crate) fn absorb(&mut self, right: &mut Self) -> bool {
        match (self, right) {
            (Self::Uncached { size, .. }, Self::Uncached { size: right_size, .. }) => {
                *size += *right_size;
                true
            }
            (
                Self::Cached {
                    data, timestamp, ..
                },
                Self::Cached {
                    data: right_data,
                    timestamp: right_timestamp,
                    ..
                },
            ) => {
                data.append(right_data);
                *timestamp = (*timestamp).max(*right_timestamp);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncached { offset, size } => write!(f, "uncached({offset:#X},{size:#X})"),
            Self::Cached { offset, data, .. } => {
                let head = &data[..data.len().min(4)];
                write!(f, "cached({offset:#X},{:#X},{head:02X?})", data.len())
            }
            Self::End { offset, .. } => write!(f, "end({offset:#X})"),
        }
    }
}
