//! Arena bookkeeping for cross-boundary transfers.
//!
//! Each instance reserves a contiguous window at the top of its linear memory
//! when it is created. The module's own allocator never hands out those pages
//! because it did not grow them, so the host can write call inputs there
//! without coordinating with the guest heap.
//!
//! Leases are bump-allocated and all released together once the call that
//! consumed them returns. Nothing survives from one call to the next.

use crate::error::{BlueprintError, Result};

/// Lease alignment. Keeps fixed-width fields at the start of a region aligned.
const ALIGN: u32 = 8;

/// One leased window of an instance's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRegion {
    offset: u32,
    len: u32,
}

impl ArenaRegion {
    /// Offset in the module's linear memory.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte range within linear memory.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..(self.offset + self.len) as usize
    }
}

/// Bump allocator over the reserved window.
#[derive(Debug)]
pub struct Arena {
    base: u32,
    capacity: u32,
    cursor: u32,
}

impl Arena {
    /// Create an arena over `[base, base + capacity)`.
    ///
    /// The window must lie below `i32::MAX` so offsets survive the trip
    /// through `i32` host functions.
    pub fn new(base: u64, capacity: u64) -> Result<Self> {
        let end = base.checked_add(capacity).unwrap_or(u64::MAX);
        if end > i32::MAX as u64 {
            return Err(BlueprintError::ResourceExhausted(format!(
                "arena window {}..{} exceeds the addressable range",
                base, end
            )));
        }
        Ok(Self {
            base: base as u32,
            capacity: capacity as u32,
            cursor: 0,
        })
    }

    /// Lease `len` bytes for the current call.
    pub fn lease(&mut self, len: usize) -> Result<ArenaRegion> {
        let start = self.cursor.next_multiple_of(ALIGN);
        let fits = u32::try_from(len)
            .ok()
            .and_then(|len| start.checked_add(len).map(|end| (len, end)))
            .filter(|&(_, end)| end <= self.capacity);

        match fits {
            Some((len, end)) => {
                self.cursor = end;
                Ok(ArenaRegion {
                    offset: self.base + start,
                    len,
                })
            }
            None => Err(BlueprintError::ResourceExhausted(format!(
                "arena lease of {} bytes exceeds free space ({} of {} bytes)",
                len,
                self.capacity.saturating_sub(start),
                self.capacity
            ))),
        }
    }

    /// Release every lease. Called once the call's return value is observed.
    pub fn release(&mut self) {
        self.cursor = 0;
    }

    /// First byte of the window.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Window size in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes currently leased.
    pub fn in_use(&self) -> u32 {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leases_do_not_overlap() {
        let mut arena = Arena::new(65536, 1024).unwrap();
        let a = arena.lease(13).unwrap();
        let b = arena.lease(5).unwrap();

        assert_eq!(a.offset(), 65536);
        assert_eq!(b.offset(), 65536 + 16);
        assert!(a.range().end <= b.range().start);
        assert_eq!(arena.in_use(), 21);
    }

    #[test]
    fn test_release_resets() {
        let mut arena = Arena::new(0, 64).unwrap();
        arena.lease(64).unwrap();
        assert!(arena.lease(1).is_err());

        arena.release();
        assert_eq!(arena.in_use(), 0);
        assert_eq!(arena.lease(64).unwrap().offset(), 0);
    }

    #[test]
    fn test_oversized_lease_is_resource_exhausted() {
        let mut arena = Arena::new(0, 64).unwrap();
        let err = arena.lease(65).unwrap_err();
        assert!(matches!(err, BlueprintError::ResourceExhausted(_)));
        // a failed lease does not consume space
        assert_eq!(arena.in_use(), 0);
        assert!(arena.lease(usize::MAX).is_err());
    }

    #[test]
    fn test_empty_lease() {
        let mut arena = Arena::new(128, 64).unwrap();
        let region = arena.lease(0).unwrap();
        assert!(region.is_empty());
        assert_eq!(region.offset(), 128);
    }

    #[test]
    fn test_window_must_be_addressable() {
        assert!(Arena::new(i32::MAX as u64, 1).is_err());
        assert!(Arena::new(u64::MAX, 1).is_err());
    }
}
