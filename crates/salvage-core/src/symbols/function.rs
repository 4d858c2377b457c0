//! Functions and their inlined call sites.

use smallvec::SmallVec;

use crate::symbols::file_spec::FileSpec;
use crate::symbols::line_table::{AddressRange, LineEntry, LineTable};
use crate::symbols::name::SymbolName;

pub type Ranges = SmallVec<[AddressRange; 1]>;

/// A copy of a function body inlined into another function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedBlock
{
    pub name: SymbolName,
    pub ranges: Ranges,
    pub call_file: Option<FileSpec>,
    pub call_line: u32,
    /// Nesting level, 1 for a block directly inside the function.
    pub depth: u32,
}

impl InlinedBlock
{
    pub fn new(name: SymbolName, ranges: impl IntoIterator<Item = AddressRange>, depth: u32) -> Self
    {
        Self {
            name,
            ranges: ranges.into_iter().collect(),
            call_file: None,
            call_line: 0,
            depth,
        }
    }

    #[must_use]
    pub fn with_call_site(mut self, file: FileSpec, line: u32) -> Self
    {
        self.call_file = Some(file);
        self.call_line = line;
        self
    }

    pub fn contains(&self, addr: u64) -> bool
    {
        self.ranges.iter().any(|range| range.contains(addr))
    }

    pub fn start_address(&self) -> Option<u64>
    {
        self.ranges.iter().map(|range| range.base).min()
    }
}

/// A concrete function with code in the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function
{
    name: SymbolName,
    ranges: Ranges,
    entry: u64,
    declaration: Option<(FileSpec, u32)>,
    inlined: Vec<InlinedBlock>,
}

impl Function
{
    /// Create a function from its code ranges. The entry point is the
    /// lowest address.
    pub fn new(name: SymbolName, ranges: impl IntoIterator<Item = AddressRange>) -> Self
    {
        let mut ranges: Ranges = ranges.into_iter().filter(|range| range.size > 0).collect();
        ranges.sort();
        let entry = ranges.first().map_or(0, |range| range.base);
        Self {
            name,
            ranges,
            entry,
            declaration: None,
            inlined: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_entry(mut self, entry: u64) -> Self
    {
        self.entry = entry;
        self
    }

    #[must_use]
    pub fn with_declaration(mut self, file: FileSpec, line: u32) -> Self
    {
        self.declaration = Some((file, line));
        self
    }

    #[must_use]
    pub fn with_inlined(mut self, block: InlinedBlock) -> Self
    {
        self.inlined.push(block);
        self
    }

    pub fn name(&self) -> &SymbolName
    {
        &self.name
    }

    pub fn ranges(&self) -> &[AddressRange]
    {
        &self.ranges
    }

    pub fn entry_address(&self) -> u64
    {
        self.entry
    }

    /// Hull of all ranges.
    pub fn address_range(&self) -> AddressRange
    {
        let end = self.ranges.iter().map(AddressRange::end).max().unwrap_or(self.entry);
        let base = self.ranges.first().map_or(self.entry, |range| range.base);
        AddressRange::new(base, end - base)
    }

    pub fn declaration(&self) -> Option<(&FileSpec, u32)>
    {
        self.declaration.as_ref().map(|(file, line)| (file, *line))
    }

    pub fn inlined_blocks(&self) -> &[InlinedBlock]
    {
        &self.inlined
    }

    pub fn contains(&self, addr: u64) -> bool
    {
        self.ranges.iter().any(|range| range.contains(addr))
    }

    /// Innermost inlined block covering `addr`.
    pub fn innermost_block(&self, addr: u64) -> Option<&InlinedBlock>
    {
        self.inlined
            .iter()
            .filter(|block| block.contains(addr))
            .max_by_key(|block| block.depth)
    }

    /// File and line where the function starts: the row at the entry point,
    /// else the declaration.
    pub fn start_line(&self, table: &LineTable) -> Option<(FileSpec, u32)>
    {
        if let Some((_, entry)) = table.find_by_address(self.entry) {
            if entry.line != 0 {
                return Some((entry.file.clone(), entry.line));
            }
        }
        self.declaration
            .as_ref()
            .filter(|(_, line)| *line != 0)
            .map(|(file, line)| (file.clone(), *line))
    }

    /// Line of the row covering the last byte of the function.
    pub fn end_line(&self, table: &LineTable) -> Option<(FileSpec, u32)>
    {
        let range = self.address_range();
        let last = range.end().checked_sub(1)?;
        table
            .find_by_address(last)
            .map(|(_, entry)| (entry.file.clone(), entry.line))
    }

    /// Row at the entry point.
    pub fn start_line_entry(&self, table: &LineTable) -> Option<LineEntry>
    {
        table.find_by_address(self.entry).map(|(_, entry)| entry.clone())
    }
}
