//! Modules (executables and shared libraries) and module lists.

use std::path::Path;
use std::ptr;
use std::sync::Arc;

use tracing::trace;

use crate::error::SalvageResult;
use crate::symbols::compile_unit::CompileUnit;
use crate::symbols::context::{SymbolContext, SymbolContextList};
use crate::symbols::file_spec::FileSpec;
use crate::symbols::line_table::{AddressRange, LineEntry};
use crate::symbols::name::SymbolName;
use crate::types::Architecture;

/// A named section of a module and its file-address range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSection
{
    pub name: String,
    pub range: AddressRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind
{
    Code,
    Data,
    Other,
}

/// An entry of the module's symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol
{
    name: SymbolName,
    range: AddressRange,
    kind: SymbolKind,
}

impl Symbol
{
    pub fn new(name: SymbolName, address: u64, size: u64, kind: SymbolKind) -> Self
    {
        Self {
            name,
            range: AddressRange::new(address, size),
            kind,
        }
    }

    pub fn name(&self) -> &SymbolName
    {
        &self.name
    }

    pub fn address(&self) -> u64
    {
        self.range.base
    }

    pub fn range(&self) -> AddressRange
    {
        self.range
    }

    pub fn kind(&self) -> SymbolKind
    {
        self.kind
    }

    pub fn is_code(&self) -> bool
    {
        self.kind == SymbolKind::Code
    }
}

/// Debug information and symbols of one binary image.
///
/// Addresses stored in a module are file addresses. Where the image sits in
/// memory is the target's business, see
/// [`crate::target::SectionLoadList`].
#[derive(Debug, Clone)]
pub struct Module
{
    file: FileSpec,
    architecture: Architecture,
    base_address: u64,
    sections: Vec<ModuleSection>,
    compile_units: Vec<CompileUnit>,
    symbols: Vec<Symbol>,
}

impl Module
{
    pub fn new(file: FileSpec, architecture: Architecture) -> Self
    {
        Self {
            file,
            architecture,
            base_address: 0,
            sections: Vec::new(),
            compile_units: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Load sections, symbols and DWARF from the binary at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> SalvageResult<Self>
    {
        crate::symbols::dwarf::load_module(path.as_ref())
    }

    pub fn set_base_address(&mut self, base: u64)
    {
        self.base_address = base;
    }

    pub fn add_section(&mut self, name: impl Into<String>, range: AddressRange)
    {
        self.sections.push(ModuleSection {
            name: name.into(),
            range,
        });
    }

    pub fn add_compile_unit(&mut self, unit: CompileUnit)
    {
        self.compile_units.push(unit);
    }

    pub fn add_symbol(&mut self, symbol: Symbol)
    {
        self.symbols.push(symbol);
    }

    #[must_use]
    pub fn with_compile_unit(mut self, unit: CompileUnit) -> Self
    {
        self.add_compile_unit(unit);
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: Symbol) -> Self
    {
        self.add_symbol(symbol);
        self
    }

    pub fn file(&self) -> &FileSpec
    {
        &self.file
    }

    /// File name without directory, as used in headers and messages.
    pub fn name(&self) -> &str
    {
        self.file.filename()
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// File address of the image header, i.e. of the `__TEXT` segment.
    pub fn base_address(&self) -> u64
    {
        self.base_address
    }

    pub fn sections(&self) -> &[ModuleSection]
    {
        &self.sections
    }

    pub fn compile_units(&self) -> &[CompileUnit]
    {
        &self.compile_units
    }

    pub fn symbols(&self) -> &[Symbol]
    {
        &self.symbols
    }

    /// Whether `addr` is a file address inside this module.
    ///
    /// Modules built without a section list fall back to their compile units.
    pub fn contains_file_address(&self, addr: u64) -> bool
    {
        if self.sections.is_empty() {
            return self.compile_units.iter().any(|cu| cu.contains(addr));
        }
        self.sections.iter().any(|section| section.range.contains(addr))
    }

    fn symbol_containing(&self, addr: u64) -> Option<&Symbol>
    {
        self.symbols
            .iter()
            .find(|symbol| symbol.range.contains(addr) || (symbol.range.size == 0 && symbol.range.base == addr))
    }

    /// Everything known about the file address `addr`, or `None` when it is
    /// outside the module.
    pub fn resolve_file_address(&self, addr: u64) -> Option<SymbolContext<'_>>
    {
        if !self.contains_file_address(addr) {
            return None;
        }

        let mut context = SymbolContext::new(self);
        context.symbol = self.symbol_containing(addr);
        if let Some(cu) = self.compile_units.iter().find(|cu| cu.contains(addr)) {
            context.compile_unit = Some(cu);
            context.function = cu.function_containing(addr);
            context.block = context.function.and_then(|func| func.innermost_block(addr));
            context.line_entry = cu.line_table().find_by_address(addr).map(|(_, entry)| entry);
        }
        trace!(
            module = self.name(),
            addr = format_args!("{addr:#x}"),
            function = context.function_name().map(SymbolName::display_name),
            "resolved file address"
        );
        Some(context)
    }

    /// Functions named `name`, plus inlined copies when `include_inlines`.
    pub fn find_functions(&self, name: &str, include_inlines: bool) -> SymbolContextList<'_>
    {
        let mut list = SymbolContextList::new();
        for cu in &self.compile_units {
            for function in cu.functions() {
                if function.name().matches(name) {
                    let mut context = SymbolContext::new(self);
                    context.compile_unit = Some(cu);
                    context.function = Some(function);
                    list.append(context);
                }
                if !include_inlines {
                    continue;
                }
                for block in function.inlined_blocks() {
                    if block.name.matches(name) {
                        let mut context = SymbolContext::new(self);
                        context.compile_unit = Some(cu);
                        context.function = Some(function);
                        context.block = Some(block);
                        list.append(context);
                    }
                }
            }
        }
        list
    }

    /// Code symbols named `name`.
    pub fn find_function_symbols(&self, name: &str) -> SymbolContextList<'_>
    {
        self.symbols
            .iter()
            .filter(|symbol| symbol.is_code() && symbol.name.matches(name))
            .map(|symbol| {
                let mut context = SymbolContext::new(self);
                context.symbol = Some(symbol);
                context
            })
            .collect()
    }

    /// Function whose code contains `addr`.
    pub fn function_at(&self, addr: u64) -> Option<SymbolContext<'_>>
    {
        self.compile_units.iter().find_map(|cu| {
            cu.function_containing(addr).map(|function| {
                let mut context = SymbolContext::new(self);
                context.compile_unit = Some(cu);
                context.function = Some(function);
                context
            })
        })
    }

    /// Compile units for the source file `spec`.
    ///
    /// Without `check_inlines` only units whose own file matches are
    /// returned, with no line entry. With it, every unit whose line table
    /// mentions the file contributes its first row at line 1 or later, so
    /// files that only appear as inlined content are found too.
    pub fn resolve_file_path(&self, spec: &FileSpec, check_inlines: bool) -> SymbolContextList<'_>
    {
        let mut list = SymbolContextList::new();
        for cu in &self.compile_units {
            if !check_inlines {
                if spec.matches(cu.file()) {
                    let mut context = SymbolContext::new(self);
                    context.compile_unit = Some(cu);
                    list.append(context);
                }
                continue;
            }

            let mut start = 0;
            while let Some(idx) = cu.find_file_index(start, spec) {
                let file = &cu.support_files()[idx];
                if let Some((_, entry)) = cu.find_line_entry(0, 1, file, false) {
                    let mut context = SymbolContext::new(self);
                    context.compile_unit = Some(cu);
                    context.line_entry = Some(entry);
                    list.append(context);
                    break;
                }
                start = idx + 1;
            }
        }
        list
    }

    /// All line rows for `spec` across the module's compile units.
    pub fn line_entries_for_file<'a>(&'a self, spec: &'a FileSpec) -> impl Iterator<Item = (&'a CompileUnit, &'a LineEntry)> + 'a
    {
        self.compile_units
            .iter()
            .flat_map(move |cu| cu.line_entries_for_file(spec).map(move |entry| (cu, entry)))
    }
}

/// Shared, ordered list of modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleList
{
    modules: Vec<Arc<Module>>,
}

impl ModuleList
{
    pub fn new() -> Self
    {
        Self { modules: Vec::new() }
    }

    /// Append unless this very module is already listed.
    pub fn append(&mut self, module: Arc<Module>)
    {
        if !self.contains(&module) {
            self.modules.push(module);
        }
    }

    /// Append every module of `other` not already listed.
    pub fn extend(&mut self, other: ModuleList)
    {
        for module in other.modules {
            self.append(module);
        }
    }

    pub fn len(&self) -> usize
    {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.modules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Module>>
    {
        self.modules.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Module>>
    {
        self.modules.iter()
    }

    pub fn contains(&self, module: &Module) -> bool
    {
        self.find(module).is_some()
    }

    /// This list's handle on `module`, compared by identity.
    pub fn find(&self, module: &Module) -> Option<&Arc<Module>>
    {
        self.modules.iter().find(|m| ptr::eq(m.as_ref(), module))
    }

    /// Modules whose file `spec` names.
    pub fn find_modules(&self, spec: &FileSpec) -> ModuleList
    {
        Self {
            modules: self
                .modules
                .iter()
                .filter(|module| spec.matches(module.file()))
                .cloned()
                .collect(),
        }
    }

    pub fn find_functions(&self, name: &str, include_inlines: bool) -> SymbolContextList<'_>
    {
        let mut list = SymbolContextList::new();
        for module in &self.modules {
            list.extend(module.find_functions(name, include_inlines));
        }
        list
    }

    pub fn find_function_symbols(&self, name: &str) -> SymbolContextList<'_>
    {
        let mut list = SymbolContextList::new();
        for module in &self.modules {
            list.extend(module.find_function_symbols(name));
        }
        list
    }

    pub fn resolve_file_path(&self, spec: &FileSpec, check_inlines: bool) -> SymbolContextList<'_>
    {
        let mut list = SymbolContextList::new();
        for module in &self.modules {
            list.extend(module.resolve_file_path(spec, check_inlines));
        }
        list
    }
}

impl<'a> IntoIterator for &'a ModuleList
{
    type Item = &'a Arc<Module>;
    type IntoIter = std::slice::Iter<'a, Arc<Module>>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

impl FromIterator<Arc<Module>> for ModuleList
{
    fn from_iter<I: IntoIterator<Item = Arc<Module>>>(iter: I) -> Self
    {
        let mut list = Self::new();
        for module in iter {
            list.append(module);
        }
        list
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::function::{Function, InlinedBlock};
    use crate::symbols::line_table::LineTable;

    fn module() -> Module
    {
        let main_c = FileSpec::new("/src/main.c");
        let util_h = FileSpec::new("/src/util.h");
        let table = LineTable::new(vec![
            LineEntry::new(AddressRange::new(0x1000, 0x10), main_c.clone(), 10, 0),
            LineEntry::new(AddressRange::new(0x1010, 0x8), util_h.clone(), 4, 0),
            LineEntry::new(AddressRange::new(0x1018, 0x8), main_c.clone(), 12, 0),
        ]);
        let cu = CompileUnit::new(main_c, [util_h], table).with_function(
            Function::new(SymbolName::plain("main"), [AddressRange::new(0x1000, 0x20)]).with_inlined(
                InlinedBlock::new(SymbolName::plain("helper"), [AddressRange::new(0x1010, 0x8)], 1),
            ),
        );
        let mut module = Module::new(FileSpec::new("/bin/demo"), Architecture::X86_64)
            .with_compile_unit(cu)
            .with_symbol(Symbol::new(SymbolName::plain("main"), 0x1000, 0x20, SymbolKind::Code));
        module.add_section("__text", AddressRange::new(0x1000, 0x100));
        module
    }

    #[test]
    fn test_resolve_file_address()
    {
        let module = module();
        let context = module.resolve_file_address(0x1012).unwrap();
        assert_eq!(context.function_name_str(), "helper");
        assert_eq!(context.line_entry.map(|e| e.line), Some(4));
        assert_eq!(context.symbol.map(|s| s.name().raw()), Some("main"));

        let outside_rows = module.resolve_file_address(0x1080).unwrap();
        assert!(outside_rows.line_entry.is_none());
        assert!(module.resolve_file_address(0x2000).is_none());
    }

    #[test]
    fn test_find_functions_with_and_without_inlines()
    {
        let module = module();
        assert_eq!(module.find_functions("helper", false).len(), 0);
        assert_eq!(module.find_functions("helper", true).len(), 1);
        assert_eq!(module.find_functions("main", true).len(), 1);
        assert_eq!(module.find_function_symbols("main").len(), 1);
    }

    #[test]
    fn test_resolve_file_path_inline_pass()
    {
        let module = module();
        let spec = FileSpec::new("util.h");
        assert!(module.resolve_file_path(&spec, false).is_empty());
        let inlined = module.resolve_file_path(&spec, true);
        assert_eq!(inlined.len(), 1);
        assert_eq!(inlined.get(0).and_then(|c| c.line_entry).map(|e| e.line), Some(4));

        let direct = module.resolve_file_path(&FileSpec::new("main.c"), false);
        assert_eq!(direct.len(), 1);
        assert!(direct.get(0).unwrap().line_entry.is_none());
    }

    #[test]
    fn test_module_list_dedups_and_filters()
    {
        let module = Arc::new(module());
        let mut list = ModuleList::new();
        list.append(module.clone());
        list.append(module.clone());
        assert_eq!(list.len(), 1);
        assert_eq!(list.find_modules(&FileSpec::new("demo")).len(), 1);
        assert!(list.find_modules(&FileSpec::new("other")).is_empty());
    }
}
