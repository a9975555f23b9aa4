#![forbid(unsafe_code)]
//! Linear sparse cache over a byte-addressable stream.
//!
//! [`LinearCache`] keeps an ordered, gapless list of [`Block`]s covering
//! `[0, frontier)` followed by a single terminal `End` block. The list is the
//! only record of what is known about the backing stream: which ranges are
//! held in memory, which are known but not fetched, and how far the known
//! extent reaches.
//!
//! # Invariants
//!
//! After every mutation:
//! - offsets strictly increase and `block[i].end_offset() == block[i + 1].offset()`;
//! - exactly one `End` block, last, with `End.offset == frontier`;
//! - no two adjacent blocks share a kind.
//!
//! Merging is checked only at the boundaries a mutation touched.
//!
//! # Concurrency
//!
//! The block list sits behind a [`parking_lot::RwLock`]. Worker threads
//! mutate it through [`LinearCache::add_data`] and friends while foreground
//! readers call [`LinearCache::get_part`]/[`LinearCache::blocks`]; every
//! public method takes the lock once, so each observes a consistent list.

mod block;

pub use block::{Block, BlockKind};

use lsc_error::{LscError, Result};
use lsc_types::{Clock, LogicalClock, Timestamp, checked_end, checked_offset};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// The block list proper. All structural edits live here.
#[derive(Debug)]
struct BlockList {
    blocks: Vec<Block>,
}

impl BlockList {
    fn empty(timestamp: Timestamp) -> Self {
        Self {
            blocks: vec![Block::End {
                offset: 0,
                timestamp,
            }],
        }
    }

    fn seeded(size: u64, timestamp: Timestamp) -> Self {
        if size == 0 {
            return Self::empty(timestamp);
        }
        Self {
            blocks: vec![
                Block::Uncached { offset: 0, size },
                Block::End {
                    offset: size,
                    timestamp,
                },
            ],
        }
    }

    fn frontier(&self) -> u64 {
        self.blocks.last().map_or(0, Block::offset)
    }

    /// Index of the block containing `offset`.
    fn locate(&self, offset: u64) -> usize {
        // blocks[0] starts at 0, so the partition point is at least 1.
        self.blocks
            .partition_point(|b| b.offset() <= offset)
            .saturating_sub(1)
    }

    /// Ensure a block boundary at `offset`; returns the index of the block
    /// starting there.
    fn split_at(&mut self, offset: u64) -> Result<usize> {
        let idx = self.locate(offset);
        if self.blocks[idx].offset() == offset {
            return Ok(idx);
        }
        let right = self.blocks[idx].split_off(offset)?;
        trace!(target: "lsc::cache", offset, index = idx, "split_block");
        self.blocks.insert(idx + 1, right);
        Ok(idx + 1)
    }

    /// Index of the `End` block, which also becomes the index of the gap
    /// opened when the frontier advances.
    fn end_index(&self) -> usize {
        self.blocks.len() - 1
    }

    /// Advance the frontier to `offset` by splitting `End`, coalescing the
    /// new gap with a trailing uncached block.
    fn extend_to(&mut self, offset: u64) -> Result<bool> {
        if offset <= self.frontier() {
            return Ok(false);
        }
        let end_idx = self.end_index();
        self.split_at(offset)?;
        self.merge_left(end_idx);
        Ok(true)
    }

    /// Merge `blocks[idx]` into `blocks[idx - 1]` when they share a kind.
    fn merge_left(&mut self, idx: usize) -> bool {
        if idx == 0 || idx >= self.blocks.len() {
            return false;
        }
        let (head, tail) = self.blocks.split_at_mut(idx);
        if head[idx - 1].absorb(&mut tail[0]) {
            self.blocks.remove(idx);
            return true;
        }
        false
    }

    /// Replace `[offset, end)` with `replacement` and merge at both edges.
    fn replace_range(&mut self, offset: u64, end: u64, replacement: Block) -> Result<()> {
        let first = self.split_at(offset)?;
        let last = self.split_at(end)?;
        if last <= first {
            return Err(LscError::MalformedRange { offset, end });
        }
        self.blocks.splice(first..last, std::iter::once(replacement));
        self.merge_left(first + 1);
        self.merge_left(first);
        Ok(())
    }

    fn add_data(&mut self, offset: u64, data: Vec<u8>, timestamp: Timestamp) -> Result<()> {
        let end = checked_end(offset, data.len() as u64)?;
        let end_idx = self.end_index();
        let gap = offset > self.frontier();
        let extends = end > self.frontier();
        self.replace_range(
            offset,
            end,
            Block::Cached {
                offset,
                data,
                timestamp,
            },
        )?;
        if gap {
            self.merge_left(end_idx);
        }
        if extends {
            if let Some(Block::End { timestamp: t, .. }) = self.blocks.last_mut() {
                *t = timestamp;
            }
        }
        Ok(())
    }

    fn del_range(&mut self, offset: u64, end: u64) -> Result<bool> {
        if end < offset {
            return Err(LscError::MalformedRange { offset, end });
        }
        let end = end.min(self.frontier());
        if offset >= end {
            return Ok(false);
        }
        self.replace_range(
            offset,
            end,
            Block::Uncached {
                offset,
                size: end - offset,
            },
        )?;
        Ok(true)
    }

    fn truncate(&mut self, offset: u64, timestamp: Timestamp) -> Result<bool> {
        if offset >= self.frontier() {
            return Ok(false);
        }
        let idx = self.split_at(offset)?;
        self.blocks.truncate(idx);
        self.blocks.push(Block::End { offset, timestamp });
        Ok(true)
    }

    /// At most `size` bytes at `offset`, trimmed to one kind.
    fn get_part(&self, offset: u64, size: u64) -> Block {
        if offset >= self.frontier() {
            return Block::Uncached { offset, size };
        }
        match &self.blocks[self.locate(offset)] {
            Block::Cached {
                offset: start,
                data,
                timestamp,
            } => {
                #[expect(clippy::cast_possible_truncation)] // offset lies inside data
                let skip = (offset - start) as usize;
                let take = usize::try_from(size).unwrap_or(usize::MAX).min(data.len() - skip);
                Block::Cached {
                    offset,
                    data: data[skip..skip + take].to_vec(),
                    timestamp: *timestamp,
                }
            }
            other => Block::Uncached {
                offset,
                size: size.min(other.end_offset() - offset),
            },
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        let Some(last) = self.blocks.last() else {
            return Err("block list is empty".to_owned());
        };
        if !last.is_end() {
            return Err(format!("last block is not End: {last}"));
        }
        let mut expected = 0_u64;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.offset() != expected {
                return Err(format!(
                    "block {i} ({block}) starts at {:#x}, expected {expected:#x}",
                    block.offset()
                ));
            }
            if block.is_end() && i + 1 != self.blocks.len() {
                return Err(format!("End block at index {i} is not last"));
            }
            if !block.is_end() && block.size() == 0 {
                return Err(format!("block {i} ({block}) is empty"));
            }
            if i > 0 && self.blocks[i - 1].kind() == block.kind() {
                return Err(format!("blocks {} and {i} share a kind", i - 1));
            }
            expected = block.end_offset();
        }
        Ok(())
    }
}

/// Thread-safe linear sparse cache.
pub struct LinearCache {
    list: RwLock<BlockList>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for LinearCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.list.read();
        f.debug_struct("LinearCache")
            .field("frontier", &list.frontier())
            .field("blocks", &list.blocks.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl fmt::Display for LinearCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.list.read();
        write!(f, "linear_cache(frontier={:#X}, blocks=[", list.frontier())?;
        for (i, block) in list.blocks.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{block}")?;
        }
        f.write_str("])")
    }
}

impl Default for LinearCache {
    fn default() -> Self {
        Self::new(Arc::new(LogicalClock::new()))
    }
}

impl LinearCache {
    /// Empty cache: a lone `End` at offset 0.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            list: RwLock::new(BlockList::empty(Timestamp::ZERO)),
            clock,
        }
    }

    /// Cache pre-seeded with `Uncached(0, size)` for a stream whose length
    /// is known up front.
    #[must_use]
    pub fn with_known_size(size: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            list: RwLock::new(BlockList::seeded(size, Timestamp::ZERO)),
            clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current frontier (known extent).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.list.read().frontier()
    }

    /// Snapshot of the whole block list, offset 0 through `End`.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.list.read().blocks.clone()
    }

    /// The block containing `offset` and its index. `End` contains every
    /// offset at or past the frontier.
    pub fn locate(&self, offset: i64) -> Result<(Block, usize)> {
        let offset = checked_offset(offset)?;
        let list = self.list.read();
        let idx = list.locate(offset);
        Ok((list.blocks[idx].clone(), idx))
    }

    /// Describe at most `size` bytes starting at `offset`.
    ///
    /// The result never crosses a kind boundary; callers advance by the
    /// returned block's size to cover larger ranges. Offsets at or past the
    /// frontier come back as `Uncached` of the full requested size.
    pub fn get_part(&self, offset: i64, size: u64) -> Result<Block> {
        let offset = checked_offset(offset)?;
        Ok(self.list.read().get_part(offset, size))
    }

    /// Describe `[offset, offset + size)` as consecutive parts, all taken
    /// from one snapshot of the list.
    pub fn get(&self, offset: i64, size: u64) -> Result<Vec<Block>> {
        let mut offset = checked_offset(offset)?;
        checked_end(offset, size)?;
        let list = self.list.read();
        let mut parts = Vec::new();
        let mut remaining = size;
        while remaining > 0 {
            let part = list.get_part(offset, remaining);
            let n = part.size();
            parts.push(part);
            offset += n;
            remaining -= n;
        }
        Ok(parts)
    }

    /// Ensure a block boundary exists at `offset`.
    ///
    /// Past the frontier this splits `End`, advancing the frontier and
    /// leaving an `Uncached` span before the new `End`; returns `true`.
    /// At or inside the frontier it changes nothing: interior boundaries
    /// are placed by the mutation that needs them and merged away again,
    /// so no two neighbours ever share a kind.
    pub fn split_at(&self, offset: u64) -> Result<bool> {
        let mut list = self.list.write();
        let grew = list.extend_to(offset)?;
        if grew {
            debug!(target: "lsc::cache", frontier = offset, "extend_frontier");
        }
        Ok(grew)
    }

    /// Record `data` at `offset`, stamped with the current logical time.
    pub fn add_data(&self, data: Vec<u8>, offset: u64) -> Result<()> {
        let timestamp = self.clock.now();
        self.add_data_with_timestamp(data, offset, timestamp)
    }

    /// Record `data` at `offset` with an explicit timestamp.
    ///
    /// Overwrites whatever the range held, merges with same-kind
    /// neighbours, and advances the frontier when the data reaches past it.
    pub fn add_data_with_timestamp(
        &self,
        data: Vec<u8>,
        offset: u64,
        timestamp: Timestamp,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len();
        let mut list = self.list.write();
        list.add_data(offset, data, timestamp)?;
        debug!(
            target: "lsc::cache",
            offset,
            len,
            timestamp = timestamp.0,
            frontier = list.frontier(),
            blocks = list.blocks.len(),
            "add_data"
        );
        Ok(())
    }

    /// Invalidate `size` bytes at `offset`. The range is clipped to the
    /// frontier; returns whether anything was invalidated.
    pub fn del_range(&self, offset: i64, size: u64) -> Result<bool> {
        let start = checked_offset(offset)?;
        self.invalidate(start, start.saturating_add(size))
    }

    /// Invalidate `[offset, end_offset)`, clipped to the frontier.
    pub fn del_range_to(&self, offset: i64, end_offset: i64) -> Result<bool> {
        let start = checked_offset(offset)?;
        let end = checked_offset(end_offset)?;
        self.invalidate(start, end)
    }

    fn invalidate(&self, offset: u64, end: u64) -> Result<bool> {
        let mut list = self.list.write();
        let changed = list.del_range(offset, end)?;
        debug!(
            target: "lsc::cache",
            offset,
            end,
            changed,
            frontier = list.frontier(),
            blocks = list.blocks.len(),
            "del_range"
        );
        Ok(changed)
    }

    /// Lower the frontier to `offset`, discarding everything past it.
    ///
    /// Used when the backing stream turns out to end earlier than the cache
    /// believed. No-op at or beyond the current frontier.
    pub fn truncate(&self, offset: u64) -> Result<bool> {
        let mut list = self.list.write();
        let old = list.frontier();
        if offset >= old {
            return Ok(false);
        }
        let changed = list.truncate(offset, self.clock.now())?;
        debug!(target: "lsc::cache", old_frontier = old, frontier = offset, "truncate");
        Ok(changed)
    }

    /// Verify the block-list invariants, describing the first violation.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.list.read().check()
    }
}
