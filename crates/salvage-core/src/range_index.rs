//! # Range Index
//!
//! Sorted interval map from virtual address ranges to a payload.
//!
//! Mach-O cores often split one mapping into many small `LC_SEGMENT`
//! records that sit back to back both in memory and in the file. The index
//! folds such records together as they are inserted, so a read that spans
//! the record boundary finds a single entry.
//!
//! ## Ordering
//!
//! Inserts are expected in ascending base order. When they are not, the
//! index remembers it and [`RangeIndex::sort`] must be called once before
//! querying. Entries are only coalesced at insert time: neighbours that
//! become adjacent only after sorting stay separate.

use tracing::trace;

use crate::types::MemoryPermissions;

/// Payload that may absorb the payload of the entry inserted after it.
pub trait Coalesce
{
    /// Try to extend `self` so it also covers `next`.
    ///
    /// Only called when the two address ranges abut. Returns false when the
    /// payloads cannot be merged, in which case `self` must be unchanged.
    fn coalesce(&mut self, next: &Self) -> bool;
}

/// A range of bytes in the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRange
{
    pub offset: u64,
    pub size: u64,
}

impl FileRange
{
    pub const fn new(offset: u64, size: u64) -> Self
    {
        Self { offset, size }
    }

    pub const fn end(&self) -> u64
    {
        self.offset.saturating_add(self.size)
    }
}

impl Coalesce for FileRange
{
    fn coalesce(&mut self, next: &Self) -> bool
    {
        if self.offset.checked_add(self.size) != Some(next.offset) {
            return false;
        }
        let Some(size) = self.size.checked_add(next.size) else {
            return false;
        };
        self.size = size;
        true
    }
}

/// Permission entries are kept one per container record.
impl Coalesce for MemoryPermissions
{
    fn coalesce(&mut self, _next: &Self) -> bool
    {
        false
    }
}

/// One `[base, base + size)` interval and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry<T>
{
    pub base: u64,
    pub size: u64,
    pub data: T,
}

impl<T> RangeEntry<T>
{
    pub const fn new(base: u64, size: u64, data: T) -> Self
    {
        Self { base, size, data }
    }

    /// One past the last address of the entry.
    pub const fn end(&self) -> u64
    {
        self.base.saturating_add(self.size)
    }

    pub const fn contains(&self, addr: u64) -> bool
    {
        addr >= self.base && addr < self.end()
    }
}

/// Interval map over non-overlapping address ranges.
///
/// ```rust
/// use salvage_core::range_index::{FileRange, RangeEntry, RangeIndex};
///
/// let mut index = RangeIndex::new();
/// index.insert(RangeEntry::new(0x1000, 0x1000, FileRange::new(0, 0x1000)));
/// index.insert(RangeEntry::new(0x2000, 0x1000, FileRange::new(0x1000, 0x1000)));
///
/// assert_eq!(index.len(), 1);
/// assert_eq!(index.find_containing(0x2fff).map(|e| e.base), Some(0x1000));
/// assert!(index.find_containing(0x3000).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct RangeIndex<T>
{
    entries: Vec<RangeEntry<T>>,
    last_base: u64,
    sorted: bool,
}

impl<T> Default for RangeIndex<T>
{
    fn default() -> Self
    {
        Self {
            entries: Vec::new(),
            last_base: 0,
            sorted: true,
        }
    }
}

impl<T: Coalesce> RangeIndex<T>
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Append `entry`, folding it into the previous entry when both its
    /// address range and its payload continue that entry exactly.
    ///
    /// Zero-sized entries are dropped.
    pub fn insert(&mut self, entry: RangeEntry<T>)
    {
        if entry.size == 0 {
            trace!(base = format_args!("{:#x}", entry.base), "dropping empty range");
            return;
        }
        if entry.base < self.last_base {
            self.sorted = false;
        }
        self.last_base = entry.base;

        if let Some(last) = self.entries.last_mut() {
            // `end()` saturates, so abutting is checked without it.
            let abuts = last.base.checked_add(last.size) == Some(entry.base);
            let merged_size = last.size.checked_add(entry.size).filter(|_| abuts);
            if let Some(size) = merged_size.filter(|_| last.data.coalesce(&entry.data)) {
                last.size = size;
                trace!(
                    base = format_args!("{:#x}", last.base),
                    end = format_args!("{:#x}", last.end()),
                    "coalesced range"
                );
                return;
            }
        }
        self.entries.push(entry);
    }
}

impl<T> RangeIndex<T>
{
    /// Whether every insert so far arrived in ascending base order.
    pub fn is_sorted(&self) -> bool
    {
        self.sorted
    }

    /// Stable sort by base address. Does not merge newly adjacent entries.
    pub fn sort(&mut self)
    {
        self.entries.sort_by_key(|entry| entry.base);
        self.sorted = true;
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RangeEntry<T>>
    {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RangeEntry<T>>
    {
        self.entries.iter()
    }

    /// Index of the first entry whose end lies above `addr`.
    fn lower_bound(&self, addr: u64) -> usize
    {
        debug_assert!(self.sorted, "RangeIndex queried before sort()");
        self.entries.partition_point(|entry| entry.end() <= addr)
    }

    /// The entry whose range contains `addr`.
    pub fn find_containing(&self, addr: u64) -> Option<&RangeEntry<T>>
    {
        self.entries
            .get(self.lower_bound(addr))
            .filter(|entry| entry.contains(addr))
    }

    /// The entry containing `addr`, else the first entry starting above it.
    pub fn find_containing_or_following(&self, addr: u64) -> Option<&RangeEntry<T>>
    {
        self.entries.get(self.lower_bound(addr))
    }
}

impl<'a, T> IntoIterator for &'a RangeIndex<T>
{
    type Item = &'a RangeEntry<T>;
    type IntoIter = std::slice::Iter<'a, RangeEntry<T>>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.entries.iter()
    }
}
