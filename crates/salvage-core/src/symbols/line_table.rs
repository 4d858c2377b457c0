//! Line tables: address ranges mapped to source file and line.

use std::fmt;

use crate::symbols::file_spec::FileSpec;
use crate::types::Address;

/// Half-open file-address range `[base, base + size)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressRange
{
    pub base: u64,
    pub size: u64,
}

impl AddressRange
{
    pub const fn new(base: u64, size: u64) -> Self
    {
        Self { base, size }
    }

    pub const fn end(&self) -> u64
    {
        self.base.saturating_add(self.size)
    }

    pub const fn contains(&self, addr: u64) -> bool
    {
        addr >= self.base && addr < self.end()
    }

    /// Render as `[start-end)` after sliding by `slide`.
    pub fn describe(&self, slide: u64, byte_size: u8) -> String
    {
        format!(
            "[{}-{})",
            Address::new(self.base.wrapping_add(slide)).to_string_width(byte_size),
            Address::new(self.end().wrapping_add(slide)).to_string_width(byte_size)
        )
    }
}

impl fmt::Display for AddressRange
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.describe(0, 8))
    }
}

/// One row of a line table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LineEntry
{
    pub range: AddressRange,
    pub file: FileSpec,
    pub line: u32,
    /// 0 when the column is unknown.
    pub column: u32,
    pub is_statement: bool,
}

impl LineEntry
{
    pub fn new(range: AddressRange, file: FileSpec, line: u32, column: u32) -> Self
    {
        Self {
            range,
            file,
            line,
            column,
            is_statement: true,
        }
    }

    pub fn is_valid(&self) -> bool
    {
        self.line != 0 && !self.file.is_empty()
    }

    /// `[0x...-0x...): /path/file.c:12:3`, addresses slid by `slide`.
    pub fn describe(&self, slide: u64, byte_size: u8) -> String
    {
        let mut out = format!("{}: {}", self.range.describe(slide, byte_size), self.file);
        if self.line != 0 {
            out.push_str(&format!(":{}", self.line));
            if self.column != 0 {
                out.push_str(&format!(":{}", self.column));
            }
        }
        out
    }
}

/// Rows of one compile unit, ordered by address.
#[derive(Debug, Clone, Default)]
pub struct LineTable
{
    entries: Vec<LineEntry>,
}

impl LineTable
{
    pub fn new(mut entries: Vec<LineEntry>) -> Self
    {
        entries.sort_by_key(|entry| entry.range.base);
        Self { entries }
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LineEntry>
    {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LineEntry>
    {
        self.entries.iter()
    }

    /// Row whose range contains `addr`.
    pub fn find_by_address(&self, addr: u64) -> Option<(usize, &LineEntry)>
    {
        let idx = self.entries.partition_point(|entry| entry.range.base <= addr);
        let idx = idx.checked_sub(1)?;
        let entry = &self.entries[idx];
        entry.range.contains(addr).then_some((idx, entry))
    }

    /// Search rows `start_idx..` for `file` at `line`.
    ///
    /// With `exact`, the first row on exactly `line`. Otherwise the first row
    /// on `line` if there is one, else the first row on the smallest line
    /// above it.
    pub fn find_line_entry(&self, start_idx: usize, line: u32, file: &FileSpec, exact: bool) -> Option<(usize, &LineEntry)>
    {
        let mut best: Option<(usize, &LineEntry)> = None;
        for (idx, entry) in self.entries.iter().enumerate().skip(start_idx) {
            if entry.file != *file || entry.line < line {
                continue;
            }
            if entry.line == line {
                return Some((idx, entry));
            }
            if exact {
                continue;
            }
            match best {
                Some((_, current)) if current.line <= entry.line => {}
                _ => best = Some((idx, entry)),
            }
        }
        best
    }
}

impl<'a> IntoIterator for &'a LineTable
{
    type Item = &'a LineEntry;
    type IntoIter = std::slice::Iter<'a, LineEntry>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}
