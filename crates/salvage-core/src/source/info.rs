//! # `source info`
//!
//! Dump the raw line-table rows for a function, an address, a file or the
//! selected frame.
//!
//! ## Output
//!
//! Rows found through symbol lookups are grouped by module:
//!
//! ```text
//! Lines found in module `demo
//! [0x0000000100003f30-0x0000000100003f38): /src/main.c:12:5
//! ```
//!
//! File mode walks each compile unit's line table instead and prints a
//! header per compile unit:
//!
//! ```text
//! Lines found for file main.c in compilation unit main.c in `demo
//! ```
//!
//! `--count N` bounds the rows per lookup. For symbol lookups the bound is
//! checked before a row is counted, so `N + 1` rows get through.

use tracing::debug;

use crate::error::{SalvageError, SalvageResult};
use crate::source::{describe_module_address, CommandOutput};
use crate::symbols::{CompileUnit, FileSpec, Module, ModuleList, SymbolContextList};
use crate::target::Target;

/// Options of `source info`. At most one of `name`, `address` and `file`
/// may be set; with none the selected frame is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfoOptions
{
    /// Maximum number of rows to dump.
    pub count: Option<u32>,
    /// Restrict the search to these modules.
    pub shlibs: Vec<String>,
    pub file: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub name: Option<String>,
    pub address: Option<u64>,
}

impl SourceInfoOptions
{
    pub fn validate(&self) -> SalvageResult<()>
    {
        if self.count == Some(0) {
            return Err(SalvageError::InvalidArgument("invalid line count: '0'".into()));
        }
        if self.start_line == Some(0) {
            return Err(SalvageError::InvalidArgument("invalid line number: '0'".into()));
        }
        if self.end_line == Some(0) {
            return Err(SalvageError::InvalidArgument("invalid end line number: '0'".into()));
        }
        if let (Some(start), Some(end)) = (self.start_line, self.end_line) {
            if end < start {
                return Err(SalvageError::InvalidArgument(format!(
                    "end line {end} is before start line {start}"
                )));
            }
        }

        let selectors = [self.file.is_some(), self.name.is_some(), self.address.is_some()];
        if selectors.into_iter().filter(|set| *set).count() > 1 {
            return Err(SalvageError::InvalidArgument(
                "specify only one of --file, --name or --address".into(),
            ));
        }
        if (self.start_line.is_some() || self.end_line.is_some()) && (self.name.is_some() || self.address.is_some()) {
            return Err(SalvageError::InvalidArgument(
                "--line and --end-line cannot be combined with --name or --address".into(),
            ));
        }
        Ok(())
    }
}

/// Run `source info` against `target`.
pub fn source_info(target: &Target, options: &SourceInfoOptions) -> SalvageResult<CommandOutput>
{
    options.validate()?;

    let mut dumper = InfoDumper {
        target,
        options,
        byte_size: target.address_byte_size(),
        output: CommandOutput::new(),
    };
    let modules = select_modules(target, &options.shlibs, &mut dumper.output)?;

    if let Some(name) = &options.name {
        dumper.dump_lines_in_functions(&modules, name)?;
    } else if let Some(addr) = options.address {
        dumper.dump_lines_for_address(addr)?;
    } else if let Some(file) = &options.file {
        dumper.dump_lines_for_file(&modules, file)?;
    } else {
        dumper.dump_lines_for_frame()?;
    }
    Ok(dumper.output)
}

/// Modules to search: those `shlibs` name, or every image.
///
/// A name matching nothing is a warning; all of them matching nothing is
/// an error.
pub(crate) fn select_modules(target: &Target, shlibs: &[String], output: &mut CommandOutput) -> SalvageResult<ModuleList>
{
    if shlibs.is_empty() {
        if target.images.is_empty() {
            return Err(SalvageError::NoModules(
                "The target has no associated executable images.".into(),
            ));
        }
        return Ok(target.images.clone());
    }

    let mut selected = ModuleList::new();
    for shlib in shlibs.iter().filter(|shlib| !shlib.is_empty()) {
        let found = target.images.find_modules(&FileSpec::new(shlib));
        if found.is_empty() {
            output.warn(format!("No module found for '{shlib}'."));
        }
        selected.extend(found);
    }
    if selected.is_empty() {
        return Err(SalvageError::NoModules("No modules match the input.".into()));
    }
    Ok(selected)
}

/// Line contexts for `addr` among `modules`, appended to `list` without
/// duplicates. Returns the number of modules that had line information,
/// or a message saying why none did.
pub(crate) fn contexts_for_address<'m>(
    target: &Target,
    modules: &'m ModuleList,
    addr: u64,
    list: &mut SymbolContextList<'m>,
) -> Result<usize, String>
{
    let byte_size = target.address_byte_size();

    if target.section_load_list.is_empty() {
        let mut matches = 0;
        for module in modules {
            let Some(context) = module.resolve_file_address(addr) else {
                continue;
            };
            if context.line_entry.is_some() {
                list.append_if_unique(context);
                matches += 1;
            }
        }
        if matches == 0 {
            return Err(format!(
                "Source information for file address 0x{addr:x} not found in any modules."
            ));
        }
        return Ok(matches);
    }

    let Some((loaded, file_address)) = target.section_load_list.resolve_load_address(addr) else {
        return Err(format!("Unable to resolve address 0x{addr:x}."));
    };
    let described = describe_module_address(loaded, file_address, byte_size);
    let Some(module) = modules.find(loaded) else {
        return Err(format!(
            "Address 0x{addr:x} resolves to {described}, but it cannot be found in any modules."
        ));
    };
    match module.resolve_file_address(file_address) {
        Some(context) if context.line_entry.is_some() => {
            list.append_if_unique(context);
            Ok(1)
        }
        _ => Err(format!(
            "Address 0x{addr:x} resolves to {described}, but there is no source information available for this address."
        )),
    }
}

struct InfoDumper<'t>
{
    target: &'t Target,
    options: &'t SourceInfoOptions,
    byte_size: u8,
    output: CommandOutput,
}

impl InfoDumper<'_>
{
    fn slide_for(&self, module: &Module) -> u64
    {
        self.target.section_load_list.slide_for(module).unwrap_or(0)
    }

    /// Print the rows of `list` that pass the filters. Returns how many
    /// were printed.
    fn dump_lines_in_contexts(&mut self, list: &SymbolContextList<'_>, module_filter: Option<&ModuleList>) -> usize
    {
        let start_line = self.options.start_line.unwrap_or(0);
        let end_line = self.options.end_line.unwrap_or(0);
        let count = self.options.count.unwrap_or(0) as usize;

        let mut matches = 0;
        let mut last_module: Option<&str> = None;
        for context in list {
            if context.compile_unit.is_none() {
                continue;
            }
            let Some(entry) = context.line_entry else {
                continue;
            };
            if module_filter.is_some_and(|modules| !modules.is_empty() && !modules.contains(context.module)) {
                continue;
            }
            if start_line > 0 && entry.line < start_line {
                continue;
            }
            if end_line > 0 && entry.line > end_line {
                continue;
            }
            if count > 0 && matches > count {
                continue;
            }

            let module_name = context.module.name();
            if last_module != Some(module_name) {
                if matches > 0 {
                    self.output.output.push_str("\n\n");
                }
                self.output.output.push_str(&format!("Lines found in module `{module_name}\n"));
            }
            let slide = self.slide_for(context.module);
            self.output.output.push_str(&entry.describe(slide, self.byte_size));
            self.output.output.push('\n');
            last_module = Some(module_name);
            matches += 1;
        }
        matches
    }

    /// Print every row for `file` in `cu`, line by line from the start
    /// line. Returns the number of rows printed.
    fn dump_file_lines_in_compile_unit(&mut self, module: &Module, cu: &CompileUnit, file: &FileSpec) -> usize
    {
        let Some(file_idx) = cu.find_file_index(0, file) else {
            return 0;
        };
        let cu_file = &cu.support_files()[file_idx];
        let end_line = self.options.end_line.unwrap_or(0);
        let count = self.options.count.unwrap_or(0) as usize;
        let slide = self.slide_for(module);

        let mut matches = 0;
        let mut printed = 0;
        let mut header_printed = false;
        let mut line = self.options.start_line.unwrap_or(0);
        'lines: loop {
            let Some((first_idx, first)) = cu.find_line_entry(0, line, cu_file, false) else {
                break;
            };
            if end_line > 0 && first.line > end_line {
                break;
            }

            line = first.line;
            let mut next = Some((first_idx, first));
            while let Some((idx, entry)) = next {
                matches += 1;
                if count > 0 && matches > count {
                    break 'lines;
                }
                if !header_printed {
                    if !self.output.output.is_empty() {
                        self.output.output.push_str("\n\n");
                    }
                    self.output.output.push_str(&format!(
                        "Lines found for file {} in compilation unit {} in `{}\n",
                        file.filename(),
                        cu.file().filename(),
                        module.name()
                    ));
                    header_printed = true;
                }
                self.output.output.push_str(&entry.describe(slide, self.byte_size));
                self.output.output.push('\n');
                printed += 1;
                next = cu.find_line_entry(idx + 1, line, cu_file, true);
            }

            let Some(following) = line.checked_add(1) else {
                break;
            };
            line = following;
        }
        printed
    }

    fn dump_lines_in_functions(&mut self, modules: &ModuleList, name: &str) -> SalvageResult<()>
    {
        let mut functions = modules.find_functions(name, true);
        if functions.is_empty() {
            for symbol_context in modules.find_function_symbols(name) {
                let Some(symbol) = symbol_context.symbol else {
                    continue;
                };
                if let Some(function) = symbol_context.module.function_at(symbol.address()) {
                    functions.append(function);
                }
            }
        }
        if functions.is_empty() {
            return Err(SalvageError::NotFound(format!("Could not find function named '{name}'.")));
        }
        debug!(name, matches = functions.len(), "dumping lines for functions");

        let step = u64::from(self.byte_size.max(1));
        let mut lines = SymbolContextList::new();
        for function in &functions {
            let function_name = function.function_name_str();
            let mut found = false;
            for range in function.address_ranges(true) {
                let start = self
                    .target
                    .section_load_list
                    .load_address(function.module, range.base)
                    .unwrap_or(range.base);
                let end = start.saturating_add(range.size);
                let mut addr = start;
                while addr < end {
                    match contexts_for_address(self.target, modules, addr, &mut lines) {
                        Ok(_) => found = true,
                        Err(message) => self.output.warn(format!("in symbol '{function_name}': {message}")),
                    }
                    addr = match addr.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
            }
            if !found {
                self.output.warn(format!(
                    "Unable to find line information for matching symbol '{function_name}'."
                ));
            }
        }

        if lines.is_empty() {
            return Err(SalvageError::NotFound(format!(
                "No line information could be found for any symbols matching '{name}'."
            )));
        }
        if self.dump_lines_in_contexts(&lines, Some(modules)) == 0 {
            return Err(SalvageError::NotFound(format!(
                "Unable to dump line information for symbol '{name}'."
            )));
        }
        Ok(())
    }

    fn dump_lines_for_address(&mut self, addr: u64) -> SalvageResult<()>
    {
        let target = self.target;
        let mut list = SymbolContextList::new();
        contexts_for_address(target, &target.images, addr, &mut list).map_err(SalvageError::NotFound)?;
        if self.dump_lines_in_contexts(&list, None) == 0 {
            return Err(SalvageError::NotFound(format!(
                "No modules contain load address 0x{addr:x}."
            )));
        }
        Ok(())
    }

    fn dump_lines_for_file(&mut self, modules: &ModuleList, file: &str) -> SalvageResult<()>
    {
        let spec = FileSpec::new(file);
        let mut displayed = false;
        for module in modules {
            for cu in module.compile_units() {
                if self.dump_file_lines_in_compile_unit(module, cu, &spec) > 0 {
                    displayed = true;
                }
            }
        }
        if !displayed {
            return Err(SalvageError::NotFound(format!("No source filenames matched '{file}'.")));
        }
        Ok(())
    }

    fn dump_lines_for_frame(&mut self) -> SalvageResult<()>
    {
        let target = self.target;
        let Some(pc) = target.selected_frame_pc() else {
            return Err(SalvageError::NotFound(
                "No selected frame to use to find the default source.".into(),
            ));
        };
        let Some(context) = target.resolve_address(pc).filter(|context| context.compile_unit.is_some()) else {
            return Err(SalvageError::NotFound("No debug info for the selected frame.".into()));
        };
        let list: SymbolContextList<'_> = std::iter::once(context).collect();
        if self.dump_lines_in_contexts(&list, None) == 0 {
            return Err(SalvageError::NotFound(
                "No source line info available for the selected frame.".into(),
            ));
        }
        Ok(())
    }
}
