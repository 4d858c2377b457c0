//! # DWARF Import
//!
//! Builds a [`Module`] from a binary on disk: sections and symbols come from
//! `object`, compile units, line tables and functions from `gimli`.
//!
//! ## Layout
//!
//! - One [`CompileUnit`] per `.debug_info` unit. Line rows become
//!   [`LineEntry`] values whose range ends where the next row starts.
//! - Every `DW_TAG_subprogram` with code becomes a [`Function`]; nested
//!   `DW_TAG_inlined_subroutine` DIEs become its [`InlinedBlock`]s, named
//!   through `DW_AT_abstract_origin`.
//! - Mach-O binaries keep their DWARF in a `.dSYM` bundle next to the binary
//!   when it was linked without it; the bundle is used when present.
//!
//! Units that fail to parse are skipped with a warning so that one bad unit
//! does not hide the rest of the module.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{
    constants, AttributeValue, DebuggingInformationEntry, Dwarf, EndianArcSlice, Reader, RunTimeEndian, SectionId,
    Unit,
};
use object::{BinaryFormat, Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionKind, SymbolKind as ObjSymbolKind};
use tracing::{debug, trace, warn};

use crate::error::{SalvageError, SalvageResult};
use crate::symbols::compile_unit::CompileUnit;
use crate::symbols::demangle::{make_symbol_name, map_dwarf_error};
use crate::symbols::file_spec::FileSpec;
use crate::symbols::function::{Function, InlinedBlock};
use crate::symbols::line_table::{AddressRange, LineEntry, LineTable};
use crate::symbols::module::{Module, Symbol, SymbolKind};
use crate::symbols::name::SymbolName;
use crate::types::Architecture;

type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;

/// How many `DW_AT_abstract_origin`/`DW_AT_specification` hops to follow
/// when looking for a name.
const MAX_ORIGIN_DEPTH: usize = 8;

const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_ranges", &[".debug_ranges", "__debug_ranges"]),
    (".debug_rnglists", &[".debug_rnglists", "__debug_rnglists"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offs", "__debug_str_offsets"]),
];

/// Load the module at `path`.
pub(crate) fn load_module(path: &Path) -> SalvageResult<Module>
{
    let data = Arc::<[u8]>::from(fs::read(path)?);
    let file = object::File::parse(&*data)
        .map_err(|err| SalvageError::InvalidObjectFile(format!("failed to parse {}: {err}", path.display())))?;

    let architecture = Architecture::from(file.architecture());
    let mut module = Module::new(FileSpec::from_path(path), architecture);
    module.set_base_address(image_base(&file));

    for section in file.sections() {
        if section.kind() == SectionKind::Debug || section.size() == 0 || section.address() == 0 {
            continue;
        }
        let name = section.name().unwrap_or("<unnamed>");
        module.add_section(name, AddressRange::new(section.address(), section.size()));
    }

    for symbol in collect_symbols(&file) {
        module.add_symbol(symbol);
    }

    let dsym = dsym_path(path).filter(|candidate| candidate.is_file());
    let units = match dsym {
        Some(dsym) => {
            debug!(path = %dsym.display(), "reading DWARF from dSYM bundle");
            let dsym_data = Arc::<[u8]>::from(fs::read(&dsym)?);
            let dsym_file = object::File::parse(&*dsym_data)
                .map_err(|err| SalvageError::InvalidObjectFile(format!("failed to parse {}: {err}", dsym.display())))?;
            import_units(&dsym_file)?
        }
        None => import_units(&file)?,
    };
    for unit in units {
        module.add_compile_unit(unit);
    }

    debug!(
        path = %path.display(),
        arch = %architecture,
        sections = module.sections().len(),
        symbols = module.symbols().len(),
        compile_units = module.compile_units().len(),
        "loaded module"
    );
    Ok(module)
}

/// File address of the image header: the `__TEXT` segment on Mach-O, the
/// lowest segment elsewhere.
fn image_base(file: &object::File<'_>) -> u64
{
    let text = file.segments().find(|segment| matches!(segment.name(), Ok(Some("__TEXT"))));
    if let Some(text) = text {
        return text.address();
    }
    file.segments()
        .filter(|segment| segment.size() > 0)
        .map(|segment| segment.address())
        .min()
        .unwrap_or(0)
}

fn dsym_path(path: &Path) -> Option<PathBuf>
{
    let name = path.file_name()?;
    let mut bundle = path.as_os_str().to_owned();
    bundle.push(".dSYM");
    Some(PathBuf::from(bundle).join("Contents/Resources/DWARF").join(name))
}

fn collect_symbols(file: &object::File<'_>) -> Vec<Symbol>
{
    let strip_underscore = file.format() == BinaryFormat::MachO;
    let mut symbols: Vec<Symbol> = file
        .symbols()
        .filter(|symbol| symbol.is_definition() && symbol.section_index().is_some())
        .filter_map(|symbol| {
            let raw = symbol.name().ok().filter(|name| !name.is_empty())?;
            let raw = if strip_underscore {
                raw.strip_prefix('_').unwrap_or(raw)
            } else {
                raw
            };
            let kind = match symbol.kind() {
                ObjSymbolKind::Text => SymbolKind::Code,
                ObjSymbolKind::Data => SymbolKind::Data,
                _ => SymbolKind::Other,
            };
            Some(Symbol::new(make_symbol_name(raw.to_string()), symbol.address(), symbol.size(), kind))
        })
        .collect();

    // Mach-O symbols carry no size; they run up to the next symbol.
    symbols.sort_by_key(Symbol::address);
    let addresses: Vec<u64> = symbols.iter().map(Symbol::address).collect();
    for (idx, symbol) in symbols.iter_mut().enumerate() {
        if symbol.range().size != 0 {
            continue;
        }
        if let Some(next) = addresses[idx + 1..].iter().find(|&&addr| addr > symbol.address()) {
            *symbol = Symbol::new(symbol.name().clone(), symbol.address(), next - symbol.address(), symbol.kind());
        }
    }
    symbols
}

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> SalvageResult<Arc<[u8]>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section
                .uncompressed_data()
                .map_err(|err| SalvageError::Dwarf(format!("failed to read {name}: {err}")))?;
            return Ok(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
                Cow::Owned(vec) => vec.into(),
            });
        }
    }

    Ok(Arc::<[u8]>::from(Vec::new()))
}

fn load_dwarf(file: &object::File<'_>) -> SalvageResult<OwnedDwarf>
{
    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let mut sections = HashMap::new();
    for (canonical, aliases) in DWARF_SECTIONS {
        sections.insert(*canonical, load_section_bytes(file, aliases)?);
    }

    let reader = |id: SectionId| {
        let data = sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, endian)
    };
    Dwarf::load(|section| Ok::<_, gimli::Error>(reader(section))).map_err(|err| map_dwarf_error("loading DWARF", err))
}

fn import_units(file: &object::File<'_>) -> SalvageResult<Vec<CompileUnit>>
{
    let dwarf = load_dwarf(file)?;
    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers
        .next()
        .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
    {
        let unit = match dwarf.unit(header) {
            Ok(unit) => unit,
            Err(err) => {
                warn!(error = %err, "skipping unparsable compilation unit");
                continue;
            }
        };
        match UnitImporter::new(&dwarf, &unit).import() {
            Ok(Some(cu)) => units.push(cu),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "skipping compilation unit"),
        }
    }
    Ok(units)
}

struct UnitImporter<'a>
{
    dwarf: &'a OwnedDwarf,
    unit: &'a Unit<OwnedReader>,
    comp_dir: Option<PathBuf>,
    files: HashMap<u64, FileSpec>,
}

impl<'a> UnitImporter<'a>
{
    fn new(dwarf: &'a OwnedDwarf, unit: &'a Unit<OwnedReader>) -> Self
    {
        let comp_dir = unit
            .comp_dir
            .as_ref()
            .and_then(|dir| dir.to_string_lossy().ok())
            .map(|dir| PathBuf::from(dir.into_owned()));
        Self {
            dwarf,
            unit,
            comp_dir,
            files: HashMap::new(),
        }
    }

    fn import(mut self) -> SalvageResult<Option<CompileUnit>>
    {
        let Some(name) = self.unit.name.as_ref() else {
            return Ok(None);
        };
        let name = name
            .to_string_lossy()
            .map_err(|err| map_dwarf_error("decoding unit name", err))?
            .into_owned();
        let file = self.resolve_path(PathBuf::new(), &name);

        let (entries, support_files) = self.import_line_table()?;
        let mut cu = CompileUnit::new(file, support_files, LineTable::new(entries));
        for function in self.import_functions()? {
            cu.add_function(function);
        }
        trace!(
            unit = %cu.file(),
            rows = cu.line_table().len(),
            functions = cu.functions().len(),
            "imported compilation unit"
        );
        Ok(Some(cu))
    }

    fn resolve_path(&self, dir: PathBuf, name: &str) -> FileSpec
    {
        let mut path = match &self.comp_dir {
            Some(comp_dir) if dir.is_relative() => comp_dir.join(dir),
            _ => dir,
        };
        path.push(name);
        FileSpec::from_path(&path)
    }

    fn attr_to_string(&self, value: AttributeValue<OwnedReader>) -> SalvageResult<String>
    {
        let reader = self
            .dwarf
            .attr_string(self.unit, value)
            .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
        let owned = match reader.to_string() {
            Ok(cow) => cow.into_owned(),
            Err(_) => reader
                .to_string_lossy()
                .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
                .into_owned(),
        };
        Ok(owned)
    }

    /// Path of line-program file `index`.
    fn file_spec(&mut self, index: u64) -> SalvageResult<Option<FileSpec>>
    {
        if let Some(spec) = self.files.get(&index) {
            return Ok(Some(spec.clone()));
        }
        let Some(program) = self.unit.line_program.as_ref() else {
            return Ok(None);
        };
        let header = program.header();
        let Some(entry) = header.file(index) else {
            return Ok(None);
        };
        let dir = match entry.directory(header) {
            Some(dir) => PathBuf::from(self.attr_to_string(dir)?),
            None => PathBuf::new(),
        };
        let name = self.attr_to_string(entry.path_name())?;
        let spec = self.resolve_path(dir, &name);
        self.files.insert(index, spec.clone());
        Ok(Some(spec))
    }

    fn import_line_table(&mut self) -> SalvageResult<(Vec<LineEntry>, Vec<FileSpec>)>
    {
        let Some(program) = self.unit.line_program.clone() else {
            return Ok((Vec::new(), Vec::new()));
        };

        let file_count = program.header().file_names().len() as u64;
        let first_index = if program.header().version() >= 5 { 0 } else { 1 };
        let mut support_files = Vec::new();
        for index in first_index..first_index + file_count {
            if let Some(spec) = self.file_spec(index)? {
                support_files.push(spec);
            }
        }

        let mut entries = Vec::new();
        let mut pending: Option<LineEntry> = None;
        let mut rows = program.rows();
        while let Some((_, row)) = rows
            .next_row()
            .map_err(|err| map_dwarf_error("running line program", err))?
        {
            if let Some(mut entry) = pending.take() {
                entry.range.size = row.address().saturating_sub(entry.range.base);
                if entry.range.size > 0 {
                    entries.push(entry);
                }
            }
            if row.end_sequence() {
                continue;
            }

            let file = self.file_spec(row.file_index())?.unwrap_or_default();
            let line = row.line().map_or(0, |line| u32::try_from(line.get()).unwrap_or(u32::MAX));
            let column = match row.column() {
                gimli::ColumnType::LeftEdge => 0,
                gimli::ColumnType::Column(column) => u32::try_from(column.get()).unwrap_or(u32::MAX),
            };
            let mut entry = LineEntry::new(AddressRange::new(row.address(), 0), file, line, column);
            entry.is_statement = row.is_stmt();
            pending = Some(entry);
        }
        if pending.is_some() {
            trace!("line program not terminated by end_sequence");
        }

        Ok((entries, support_files))
    }

    fn import_functions(&mut self) -> SalvageResult<Vec<Function>>
    {
        let mut functions = Vec::new();
        let mut open: Vec<(isize, Function)> = Vec::new();
        let mut depth: isize = 0;

        let mut cursor = self.unit.entries();
        while let Some((delta, entry)) = cursor
            .next_dfs()
            .map_err(|err| map_dwarf_error("traversing DIE tree", err))?
        {
            depth += delta;
            while open.last().is_some_and(|(open_depth, _)| *open_depth >= depth) {
                if let Some((_, function)) = open.pop() {
                    functions.push(function);
                }
            }

            match entry.tag() {
                constants::DW_TAG_subprogram => {
                    let ranges = self.ranges(entry)?;
                    if ranges.is_empty() {
                        continue;
                    }
                    let Some(name) = self.entry_name(entry, 0)? else {
                        continue;
                    };
                    let mut function = Function::new(name, ranges);
                    if let Some(low_pc) = self.low_pc(entry)? {
                        function = function.with_entry(low_pc);
                    }
                    if let Some((file, line)) = self.declaration(entry)? {
                        function = function.with_declaration(file, line);
                    }
                    open.push((depth, function));
                }
                constants::DW_TAG_inlined_subroutine => {
                    let Some(function_depth) = open.last().map(|(open_depth, _)| *open_depth) else {
                        continue;
                    };
                    let block_depth = u32::try_from(depth - function_depth).unwrap_or(u32::MAX);
                    let ranges = self.ranges(entry)?;
                    if ranges.is_empty() {
                        continue;
                    }
                    let name = self
                        .entry_name(entry, 0)?
                        .unwrap_or_else(|| SymbolName::plain("<inlined>"));
                    let mut block = InlinedBlock::new(name, ranges, block_depth);
                    if let Some((file, line)) = self.call_site(entry)? {
                        block = block.with_call_site(file, line);
                    }
                    if let Some((_, function)) = open.pop() {
                        open.push((function_depth, function.with_inlined(block)));
                    }
                }
                _ => {}
            }
        }
        functions.extend(open.into_iter().map(|(_, function)| function));
        Ok(functions)
    }

    fn ranges(&self, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> SalvageResult<Vec<AddressRange>>
    {
        let mut iter = self
            .dwarf
            .die_ranges(self.unit, entry)
            .map_err(|err| map_dwarf_error("reading DIE ranges", err))?;
        let mut ranges = Vec::new();
        while let Some(range) = iter
            .next()
            .map_err(|err| map_dwarf_error("reading DIE ranges", err))?
        {
            // A zero start is a dead-stripped function.
            if range.begin != 0 && range.end > range.begin {
                ranges.push(AddressRange::new(range.begin, range.end - range.begin));
            }
        }
        Ok(ranges)
    }

    fn low_pc(&self, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> SalvageResult<Option<u64>>
    {
        let Some(value) = entry
            .attr_value(constants::DW_AT_low_pc)
            .map_err(|err| map_dwarf_error("reading DW_AT_low_pc", err))?
        else {
            return Ok(None);
        };
        self.dwarf
            .attr_address(self.unit, value)
            .map_err(|err| map_dwarf_error("resolving DW_AT_low_pc", err))
    }

    fn file_and_line(
        &mut self,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
        file_attr: constants::DwAt,
        line_attr: constants::DwAt,
    ) -> SalvageResult<Option<(FileSpec, u32)>>
    {
        let file = entry
            .attr_value(file_attr)
            .map_err(|err| map_dwarf_error("reading file attribute", err))?;
        let line = entry
            .attr(line_attr)
            .map_err(|err| map_dwarf_error("reading line attribute", err))?
            .and_then(|attr| attr.udata_value())
            .and_then(|line| u32::try_from(line).ok());
        let (Some(AttributeValue::FileIndex(index)), Some(line)) = (file, line) else {
            return Ok(None);
        };
        Ok(self.file_spec(index)?.map(|file| (file, line)))
    }

    fn declaration(&mut self, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> SalvageResult<Option<(FileSpec, u32)>>
    {
        self.file_and_line(entry, constants::DW_AT_decl_file, constants::DW_AT_decl_line)
    }

    fn call_site(&mut self, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> SalvageResult<Option<(FileSpec, u32)>>
    {
        self.file_and_line(entry, constants::DW_AT_call_file, constants::DW_AT_call_line)
    }

    /// Linkage name, else plain name, following abstract origins and
    /// specifications within the unit.
    fn entry_name(
        &self,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
        depth: usize,
    ) -> SalvageResult<Option<SymbolName>>
    {
        for attr in [constants::DW_AT_linkage_name, constants::DW_AT_MIPS_linkage_name, constants::DW_AT_name] {
            if let Some(value) = entry
                .attr_value(attr)
                .map_err(|err| map_dwarf_error("reading DIE name", err))?
            {
                return Ok(Some(make_symbol_name(self.attr_to_string(value)?)));
            }
        }

        if depth >= MAX_ORIGIN_DEPTH {
            return Ok(None);
        }
        for attr in [constants::DW_AT_abstract_origin, constants::DW_AT_specification] {
            let value = entry
                .attr_value(attr)
                .map_err(|err| map_dwarf_error("reading DIE reference", err))?;
            match value {
                Some(AttributeValue::UnitRef(offset)) => {
                    let origin = self
                        .unit
                        .entry(offset)
                        .map_err(|err| map_dwarf_error("resolving DIE reference", err))?;
                    return self.entry_name(&origin, depth + 1);
                }
                Some(other) => {
                    trace!(value = ?other, "cross-unit name reference not followed");
                }
                None => {}
            }
        }
        Ok(None)
    }
}
