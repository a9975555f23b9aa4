#![forbid(unsafe_code)]
//! Value types shared by the cache, stream and pool crates.

use lsc_error::{LscError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque logical timestamp attached to cached data.
///
/// Only the ordering is meaningful: a larger value is a fresher fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of logical time for stamping cache entries.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Return the next timestamp. Successive calls never go backwards.
    fn now(&self) -> Timestamp;
}

/// Monotonic counter clock.
///
/// Each call to [`Clock::now`] returns the current value and advances it by
/// one, so two calls never observe the same timestamp.
pub struct LogicalClock {
    next: AtomicU64,
}

impl fmt::Debug for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalClock")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

impl LogicalClock {
    /// Clock whose first reading is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Clock whose first reading is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// The value the next call to `now` will return, without consuming it.
    #[must_use]
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.next.load(Ordering::SeqCst))
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Validate a caller-supplied signed offset.
pub fn checked_offset(offset: i64) -> Result<u64> {
    u64::try_from(offset).map_err(|_| LscError::NegativeOffset { offset })
}

/// Compute `offset + size`, failing on overflow.
pub fn checked_end(offset: u64, size: u64) -> Result<u64> {
    offset.checked_add(size).ok_or(LscError::MalformedRange {
        offset,
        end: u64::MAX,
    })
}

#[must_use]
pub fn is_power_of_two(value: u64) -> bool {
    value.is_power_of_two()
}

/// Round `value` down to a multiple of `align` (a power of two).
#[must_use]
pub fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value & !(align - 1)
}

/// Round `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` when the rounded value does not fit in `u64`.
#[must_use]
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// A contiguous byte range, used as the unit of background I/O.
///
/// A load request is a `Region` whose bounds are aligned to the proxy's
/// I/O granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub offset: u64,
    pub size: u64,
}

impl Region {
    #[must_use]
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Exclusive end offset (saturating).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Smallest `align`-aligned region covering `[offset, offset + size)`.
    pub fn aligned(offset: u64, size: u64, align: u64) -> Result<Self> {
        if !align.is_power_of_two() {
            return Err(LscError::InvalidConfig(format!(
                "alignment {align} is not a power of two"
            )));
        }
        let end = checked_end(offset, size)?;
        let start = align_down(offset, align);
        let end = align_up(end, align).ok_or(LscError::MalformedRange { offset, end })?;
        Ok(Self {
            offset: start,
            size: end - start,
        })
    }

    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.offset, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn logical_clock_counts_up_from_start() {
        let clock = LogicalClock::new();
        assert_eq!(clock.now(), Timestamp(1));
        assert_eq!(clock.now(), Timestamp(2));
        assert_eq!(clock.peek(), Timestamp(3));
        assert_eq!(clock.now(), Timestamp(3));

        let late = LogicalClock::starting_at(100);
        assert_eq!(late.now(), Timestamp(100));
    }

    #[test]
    fn logical_clock_is_unique_across_threads() {
        let clock = std::sync::Arc::new(LogicalClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = std::sync::Arc::clone(&clock);
                std::thread::spawn(move || (0..250).map(|_| clock.now().0).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("join"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn checked_offset_rejects_negative() {
        assert_eq!(checked_offset(7).expect("positive"), 7);
        let err = checked_offset(-1).expect_err("negative");
        assert!(matches!(err, LscError::NegativeOffset { offset: -1 }));
    }

    #[test]
    fn alignment_rounding() {
        assert_eq!(align_down(0x1234, 0x1000), 0x1000);
        assert_eq!(align_up(0x1234, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
        assert_eq!(align_up(u64::MAX, 0x1000), None);
        assert_eq!(align_down(17, 1), 17);
    }

    #[test]
    fn aligned_region_covers_gap() {
        let region = Region::aligned(10, 5, 8).expect("aligned");
        assert_eq!(region, Region::new(8, 8));
        let region = Region::aligned(7, 2, 8).expect("aligned");
        assert_eq!(region, Region::new(0, 16));
        assert!(Region::aligned(0, 1, 3).is_err());
    }

    #[test]
    fn region_display_and_serde() {
        let region = Region::new(0x10, 0x20);
        assert_eq!(region.to_string(), "[0x10, 0x30)");
        let json = serde_json::to_string(&region).expect("serialize");
        let back: Region = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, region);
    }

    proptest! {
        #[test]
        fn aligned_region_is_minimal_cover(
            offset in 0_u64..1 << 40,
            size in 1_u64..1 << 20,
            shift in 0_u32..16,
        ) {
            let align = 1_u64 << shift;
            let region = Region::aligned(offset, size, align).unwrap();
            prop_assert!(region.offset <= offset);
            prop_assert!(region.end() >= offset + size);
            prop_assert_eq!(region.offset % align, 0);
            prop_assert_eq!(region.size % align, 0);
            prop_assert!(offset - region.offset < align);
            prop_assert!(region.end() - (offset + size) < align);
        }
    }
}
