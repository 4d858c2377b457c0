//! Symbol contexts: the result of every symbol lookup.

use std::ptr;

use crate::symbols::compile_unit::CompileUnit;
use crate::symbols::function::{Function, InlinedBlock};
use crate::symbols::line_table::{AddressRange, LineEntry};
use crate::symbols::module::{Module, Symbol};
use crate::symbols::name::SymbolName;

/// Everything known about one lookup hit.
///
/// Only the module is mandatory. A context for an inlined call site has
/// both the enclosing `function` and the inlined `block`.
#[derive(Debug, Clone, Copy)]
pub struct SymbolContext<'a>
{
    pub module: &'a Module,
    pub compile_unit: Option<&'a CompileUnit>,
    pub function: Option<&'a Function>,
    pub block: Option<&'a InlinedBlock>,
    pub line_entry: Option<&'a LineEntry>,
    pub symbol: Option<&'a Symbol>,
}

fn same<T>(a: Option<&T>, b: Option<&T>) -> bool
{
    match (a, b) {
        (Some(a), Some(b)) => ptr::eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl PartialEq for SymbolContext<'_>
{
    fn eq(&self, other: &Self) -> bool
    {
        ptr::eq(self.module, other.module)
            && same(self.compile_unit, other.compile_unit)
            && same(self.function, other.function)
            && same(self.block, other.block)
            && same(self.symbol, other.symbol)
            && self.line_entry == other.line_entry
    }
}

impl<'a> SymbolContext<'a>
{
    pub fn new(module: &'a Module) -> Self
    {
        Self {
            module,
            compile_unit: None,
            function: None,
            block: None,
            line_entry: None,
            symbol: None,
        }
    }

    /// Name of the innermost thing this context describes: the inlined
    /// function, else the function, else the symbol.
    pub fn function_name(&self) -> Option<&'a SymbolName>
    {
        self.block
            .map(|block| &block.name)
            .or_else(|| self.function.map(Function::name))
            .or_else(|| self.symbol.map(Symbol::name))
    }

    pub fn function_name_str(&self) -> &'a str
    {
        self.function_name().map_or("<unknown>", SymbolName::display_name)
    }

    /// Code ranges covered by this context: the inlined block's when
    /// `use_inline_block_range` is set and there is one, else the
    /// function's, else the symbol's.
    pub fn address_ranges(&self, use_inline_block_range: bool) -> Vec<AddressRange>
    {
        if use_inline_block_range {
            if let Some(block) = self.block {
                return block.ranges.to_vec();
            }
        }
        if let Some(function) = self.function {
            return function.ranges().to_vec();
        }
        self.symbol.map(|symbol| vec![symbol.range()]).unwrap_or_default()
    }

    /// First line-table row of the function, or of the inlined block when
    /// this context is an inlined call site.
    pub fn function_start_line_entry(&self) -> Option<&'a LineEntry>
    {
        let table = self.compile_unit?.line_table();
        let start = match (self.block, self.function) {
            (Some(block), _) => block.start_address()?,
            (None, Some(function)) => function.entry_address(),
            (None, None) => return None,
        };
        table.find_by_address(start).map(|(_, entry)| entry)
    }
}

/// Ordered list of contexts.
#[derive(Debug, Clone, Default)]
pub struct SymbolContextList<'a>
{
    contexts: Vec<SymbolContext<'a>>,
}

impl<'a> SymbolContextList<'a>
{
    pub fn new() -> Self
    {
        Self { contexts: Vec::new() }
    }

    pub fn append(&mut self, context: SymbolContext<'a>)
    {
        self.contexts.push(context);
    }

    /// Append unless an identical context is already present. Returns
    /// whether it was added.
    pub fn append_if_unique(&mut self, context: SymbolContext<'a>) -> bool
    {
        if self.contexts.contains(&context) {
            return false;
        }
        self.contexts.push(context);
        true
    }

    pub fn extend(&mut self, other: SymbolContextList<'a>)
    {
        self.contexts.extend(other.contexts);
    }

    pub fn len(&self) -> usize
    {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.contexts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SymbolContext<'a>>
    {
        self.contexts.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SymbolContext<'a>>
    {
        self.contexts.iter()
    }

    /// Number of contexts whose line entry is on `line`.
    pub fn count_line_entries_with_line(&self, line: u32) -> usize
    {
        self.contexts
            .iter()
            .filter(|context| context.line_entry.is_some_and(|entry| entry.line == line))
            .count()
    }
}

impl<'a, 'b> IntoIterator for &'b SymbolContextList<'a>
{
    type Item = &'b SymbolContext<'a>;
    type IntoIter = std::slice::Iter<'b, SymbolContext<'a>>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

impl<'a> IntoIterator for SymbolContextList<'a>
{
    type Item = SymbolContext<'a>;
    type IntoIter = std::vec::IntoIter<SymbolContext<'a>>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.contexts.into_iter()
    }
}

impl<'a> FromIterator<SymbolContext<'a>> for SymbolContextList<'a>
{
    fn from_iter<I: IntoIterator<Item = SymbolContext<'a>>>(iter: I) -> Self
    {
        Self {
            contexts: iter.into_iter().collect(),
        }
    }
}
