//! # `source list`
//!
//! Display a window of source around a function, an address or a file
//! line, or continue the previous listing.
//!
//! ## Windows
//!
//! A function listing starts a little before the function's first line so
//! the signature is visible: 5 lines for windows of 10 or more, half the
//! window otherwise, never before line 1. See [`window_for_function`].
//!
//! ## Continuation
//!
//! A bare `source list` picks up after the last displayed block (or before
//! it with `--reverse`). The first bare listing of a session starts at
//! `main` when there is one.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{SalvageError, SalvageResult};
use crate::source::manager::{BreakpointLines, SourceManager, DEFAULT_LIST_COUNT};
use crate::source::CommandOutput;
use crate::symbols::{FileSpec, ModuleList, SymbolContext, SymbolContextList};
use crate::target::{SectionLoadList, Target};

/// Options of `source list`. At most one of `file`, `name` and `address`
/// may be set; with none the previous listing continues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceListOptions
{
    pub count: Option<u32>,
    /// Only search these modules. Applies to `file` and `name`.
    pub shlibs: Vec<String>,
    /// Prefix lines with the number of line-table entries on them.
    pub show_breakpoints: bool,
    /// Continue backwards.
    pub reverse: bool,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub name: Option<String>,
    pub address: Option<u64>,
}

impl SourceListOptions
{
    pub fn validate(&self) -> SalvageResult<()>
    {
        if self.count == Some(0) {
            return Err(SalvageError::InvalidArgument("invalid line count: '0'".into()));
        }
        if self.line == Some(0) {
            return Err(SalvageError::InvalidArgument("invalid line number: '0'".into()));
        }

        let selectors = [self.file.is_some(), self.name.is_some(), self.address.is_some()];
        if selectors.into_iter().filter(|set| *set).count() > 1 {
            return Err(SalvageError::InvalidArgument(
                "specify only one of --file, --name or --address".into(),
            ));
        }
        if self.line.is_some() && (self.name.is_some() || self.address.is_some()) {
            return Err(SalvageError::InvalidArgument(
                "--line cannot be combined with --name or --address".into(),
            ));
        }
        if self.reverse && (self.file.is_some() || self.line.is_some() || self.name.is_some() || self.address.is_some()) {
            return Err(SalvageError::InvalidArgument(
                "--reverse only applies to a bare listing".into(),
            ));
        }
        if !self.shlibs.is_empty() && self.file.is_none() && self.name.is_none() {
            return Err(SalvageError::InvalidArgument(
                "--shlib needs --file or --name".into(),
            ));
        }
        Ok(())
    }
}

/// Identity of a listed function: name, start file and start line.
///
/// Ordered by function name, then file directory, then file name, then
/// line, so a set of them drops repeated inline expansions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceInfo
{
    pub function: String,
    pub file: FileSpec,
    pub line: u32,
}

impl SourceInfo
{
    /// Name and first line of the function, or of the inlined block, that
    /// `context` describes. `None` without a name or a valid first line.
    pub fn from_context(context: &SymbolContext<'_>) -> Option<Self>
    {
        let function = context.function_name()?.display_name().to_owned();
        let entry = context.function_start_line_entry().filter(|entry| entry.is_valid())?;
        Some(Self {
            function,
            file: entry.file.clone(),
            line: entry.line,
        })
    }
}

/// First line and line count of a function listing.
///
/// `end_line` is the function's last line, when known. If the window would
/// reach past it the count becomes the distance to it plus the margin.
///
/// ```rust
/// use salvage_core::source::window_for_function;
///
/// assert_eq!(window_for_function(42, Some(60), 10), (37, 10));
/// assert_eq!(window_for_function(2, None, 10), (1, 10));
/// assert_eq!(window_for_function(42, Some(44), 10), (37, 12));
/// ```
pub fn window_for_function(start_line: u32, end_line: Option<u32>, count: u32) -> (u32, u32)
{
    let margin = if count >= 10 { 5 } else { count / 2 };
    let first = if start_line <= margin { 1 } else { start_line - margin };

    let mut count = count;
    if let Some(extent) = end_line.filter(|end| *end != 0).and_then(|end| end.checked_sub(first)) {
        if count > extent {
            count = extent + margin;
        }
    }
    (first, count)
}

/// Command to run when the user repeats `source list` with an empty line.
///
/// ```rust
/// use salvage_core::source::repeat_command;
///
/// assert_eq!(repeat_command(&["--reverse"]), "source list -r");
/// assert_eq!(repeat_command(&["-c", "20"]), "source list");
/// ```
pub fn repeat_command<S: AsRef<str>>(args: &[S]) -> &'static str
{
    if args.iter().any(|arg| matches!(arg.as_ref(), "-r" | "--reverse")) {
        "source list -r"
    } else {
        "source list"
    }
}

/// Run `source list` against `target`, updating its source manager.
pub fn source_list(target: &mut Target, options: &SourceListOptions) -> SalvageResult<CommandOutput>
{
    options.validate()?;

    let Target {
        images,
        section_load_list,
        source_manager,
        ..
    } = target;
    let mut lister = Lister {
        images,
        load_list: section_load_list,
        manager: source_manager,
        options,
        output: CommandOutput::new(),
    };

    if let Some(name) = &options.name {
        lister.list_function(name)?;
    } else if let Some(addr) = options.address {
        lister.list_address(addr)?;
    } else if let Some(file) = &options.file {
        lister.list_file(file)?;
    } else {
        lister.list_more()?;
    }
    Ok(lister.output)
}

/// Number of line-table rows per line of `file` across `images`.
pub(crate) fn breakpoint_lines(images: &ModuleList, file: &FileSpec) -> BreakpointLines
{
    images
        .iter()
        .flat_map(|module| {
            module
                .line_entries_for_file(file)
                .map(|(_, entry)| entry.line)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Start of `main`, where a session's first bare listing begins.
fn default_source_location(images: &ModuleList) -> Option<(PathBuf, u32)>
{
    images.find_functions("main", false).iter().find_map(|context| {
        let table = context.compile_unit?.line_table();
        let (file, line) = context.function?.start_line(table)?;
        Some((file.path(), line))
    })
}

/// Stop context line, e.g. ``demo`main + 16 [inlined] helper at /src/main.c:12:5``.
fn describe_stop_context(context: &SymbolContext<'_>) -> String
{
    let mut out = format!("{}`", context.module.name());
    let base = match (context.function, context.symbol) {
        (Some(function), _) => {
            out.push_str(function.name().display_name());
            Some(function.entry_address())
        }
        (None, Some(symbol)) => {
            out.push_str(symbol.name().display_name());
            Some(symbol.address())
        }
        (None, None) => {
            out.push_str("<unknown>");
            None
        }
    };

    let entry = context.line_entry;
    if let (Some(base), Some(entry)) = (base, entry) {
        if entry.range.base > base {
            out.push_str(&format!(" + {}", entry.range.base - base));
        }
    }
    if let Some(block) = context.block {
        out.push_str(&format!(" [inlined] {}", block.name.display_name()));
    }
    if let Some(entry) = entry {
        out.push_str(&format!(" at {}:{}", entry.file, entry.line));
        if entry.column != 0 {
            out.push_str(&format!(":{}", entry.column));
        }
    }
    out
}

/// Context among several that matched a file name, or `None` when they
/// name different files.
///
/// A row from an inlined-only match agrees with a compile unit of the same
/// file, and the compile unit is preferred.
fn pick_file_match<'a>(matches: &SymbolContextList<'a>) -> Option<SymbolContext<'a>>
{
    let mut iter = matches.iter().copied();
    let mut best = iter.next()?;
    for context in iter {
        let (Some(best_cu), Some(cu)) = (best.compile_unit, context.compile_unit) else {
            continue;
        };
        let conflict = match (context.line_entry, best.line_entry) {
            (Some(entry), Some(best_entry)) => best_entry.file != entry.file,
            (Some(entry), None) => *best_cu.file() != entry.file,
            (None, Some(best_entry)) if best_entry.file == *cu.file() => {
                best = context;
                false
            }
            (None, Some(_)) => true,
            (None, None) => best_cu.file() != cu.file(),
        };
        if conflict {
            return None;
        }
    }
    Some(best)
}

fn read_failure(file: &FileSpec, err: SalvageError) -> SalvageError
{
    match err {
        SalvageError::Io(io) => SalvageError::NotFound(format!("Unable to read source file \"{file}\": {io}")),
        other => other,
    }
}

struct Lister<'t>
{
    images: &'t ModuleList,
    load_list: &'t SectionLoadList,
    manager: &'t mut SourceManager,
    options: &'t SourceListOptions,
    output: CommandOutput,
}

impl Lister<'_>
{
    fn count(&self) -> u32
    {
        self.options.count.unwrap_or(DEFAULT_LIST_COUNT)
    }

    fn breakpoints_for(&self, file: &FileSpec) -> Option<BreakpointLines>
    {
        self.options
            .show_breakpoints
            .then(|| breakpoint_lines(self.images, file))
    }

    /// Modules named by `--shlib`, or every image.
    fn candidate_modules(&self) -> ModuleList
    {
        if self.options.shlibs.is_empty() {
            return self.images.clone();
        }
        let mut selected = ModuleList::new();
        for shlib in &self.options.shlibs {
            selected.extend(self.images.find_modules(&FileSpec::new(shlib)));
        }
        selected
    }

    fn display(&mut self, file: &FileSpec, start_line: u32, count: u32, current_line: Option<u32>, marker: &str) -> SalvageResult<usize>
    {
        let breakpoints = self.breakpoints_for(file);
        self.manager
            .display_source_lines(
                &file.path(),
                start_line,
                count,
                current_line,
                marker,
                breakpoints.as_ref(),
                &mut self.output.output,
            )
            .map_err(|err| read_failure(file, err))
    }

    fn display_function_source(&mut self, context: &SymbolContext<'_>, info: Option<SourceInfo>) -> SalvageResult<usize>
    {
        let name = self.options.name.as_deref().unwrap_or_default();
        let Some(function) = context.function else {
            return Err(SalvageError::NotFound(format!("Could not find function info for: \"{name}\".")));
        };
        let info = info.or_else(|| SourceInfo::from_context(context));
        let no_start_line = || {
            SalvageError::NotFound(format!(
                "Could not find line information for start of function: \"{}\".",
                context.function_name_str()
            ))
        };

        let count = self.count();
        let (start_file, start_line, end_line) = match context.block {
            None => {
                let table = context.compile_unit.map(|cu| cu.line_table());
                let (file, line) = table
                    .and_then(|table| function.start_line(table))
                    .ok_or_else(no_start_line)?;
                let end = table.and_then(|table| function.end_line(table)).map(|(_, line)| line);
                (file, line, end)
            }
            Some(_) => {
                let info = info.ok_or_else(no_start_line)?;
                let end = info.line.saturating_add(count);
                (info.file, info.line, Some(end))
            }
        };

        let (first, window) = window_for_function(start_line, end_line, count);
        debug!(function = context.function_name_str(), file = %start_file, first, window, "listing function");

        let header_at = self.output.output.len();
        self.output.output.push_str(&format!("File: {start_file}\n"));
        match self.display(&start_file, first, window, None, "") {
            Ok(written) => Ok(written),
            Err(err) => {
                self.output.output.truncate(header_at);
                Err(err)
            }
        }
    }

    fn list_function(&mut self, name: &str) -> SalvageResult<()>
    {
        let modules = self.candidate_modules();
        let mut functions = modules.find_functions(name, true);
        if functions.is_empty() {
            let first = modules.find_function_symbols(name).iter().find_map(|symbol_context| {
                let symbol = symbol_context.symbol?;
                symbol_context.module.function_at(symbol.address())
            });
            if let Some(context) = first {
                functions.append(context);
            }
        }
        if functions.is_empty() {
            return Err(SalvageError::NotFound(format!("Could not find function named: \"{name}\".")));
        }

        if functions.len() == 1 {
            let Some(context) = functions.get(0).copied() else {
                return Ok(());
            };
            if self.display_function_source(&context, None)? == 0 {
                return Err(SalvageError::NotFound(format!(
                    "No source lines available for function \"{name}\"."
                )));
            }
            return Ok(());
        }

        let mut seen = BTreeSet::new();
        let mut displayed = false;
        let mut last_error = None;
        for context in &functions {
            let Some(info) = SourceInfo::from_context(context) else {
                continue;
            };
            if !seen.insert(info.clone()) {
                continue;
            }
            match self.display_function_source(context, Some(info)) {
                Ok(written) => displayed |= written > 0,
                Err(err) => {
                    self.output.warn(err.to_string());
                    last_error = Some(err);
                }
            }
        }
        if !displayed {
            return Err(last_error.unwrap_or_else(|| {
                SalvageError::NotFound(format!("No source lines available for function \"{name}\"."))
            }));
        }
        Ok(())
    }

    fn list_address(&mut self, addr: u64) -> SalvageResult<()>
    {
        let images = self.images;
        let load_list = self.load_list;
        let mut contexts = SymbolContextList::new();

        if load_list.is_empty() {
            for module in images {
                if let Some(context) = module.resolve_file_address(addr).filter(|c| c.line_entry.is_some()) {
                    contexts.append(context);
                }
            }
            if contexts.is_empty() {
                return Err(SalvageError::NotFound(format!(
                    "no modules have source information for file address 0x{addr:x}."
                )));
            }
        } else if let Some((loaded, file_address)) = load_list.resolve_load_address(addr) {
            let module = images.find(loaded).unwrap_or(loaded);
            match module.resolve_file_address(file_address) {
                Some(context) if context.line_entry.is_some() => contexts.append(context),
                _ => {
                    let byte_size = module.architecture().address_byte_size();
                    return Err(SalvageError::NotFound(format!(
                        "address resolves to {}, but there is no line table information available for this address.",
                        crate::source::describe_module_address(module, file_address, byte_size)
                    )));
                }
            }
        }
        if contexts.is_empty() {
            return Err(SalvageError::NotFound(format!("no modules contain load address 0x{addr:x}.")));
        }

        let count = self.count();
        let back_up = if count >= 10 { 5 } else { count / 2 };
        for context in &contexts {
            let (Some(_), Some(entry)) = (context.compile_unit, context.line_entry) else {
                continue;
            };
            self.output.output.push_str(&describe_stop_context(context));
            self.output.output.push('\n');
            let first = if entry.line > back_up { entry.line - back_up } else { 1 };
            self.display(&entry.file, first, count, Some(entry.line), "->")?;
        }
        Ok(())
    }

    fn list_file(&mut self, file: &str) -> SalvageResult<()>
    {
        let spec = FileSpec::new(file);
        let modules = self.candidate_modules();
        let mut matches = modules.resolve_file_path(&spec, false);
        if matches.is_empty() {
            matches = modules.resolve_file_path(&spec, true);
        }
        if matches.is_empty() {
            return Err(SalvageError::NotFound(format!("Could not find source file \"{file}\".")));
        }

        let Some(best) = pick_file_match(&matches) else {
            return Err(SalvageError::AmbiguousMatch(format!(
                "Multiple source files found matching: \"{file}\"."
            )));
        };
        let Some(cu) = best.compile_unit else {
            return Err(SalvageError::NotFound(format!("No comp unit found for: \"{file}\".")));
        };

        let display_file = best.line_entry.map_or_else(|| cu.file().clone(), |entry| entry.file.clone());
        let start_line = self.options.line.unwrap_or(1);
        let count = self.count();
        self.display(&display_file, start_line, count, None, "")?;
        Ok(())
    }

    fn list_more(&mut self) -> SalvageResult<()>
    {
        if self.manager.last_file().is_none() && !self.manager.default_set() {
            if let Some((path, line)) = default_source_location(self.images) {
                if let Err(err) = self.manager.set_default_file_and_line(&path, line) {
                    self.output.warn(format!("Unable to read source file \"{}\": {err}", path.display()));
                }
            }
        }
        let Some(last_file) = self.manager.last_file().cloned() else {
            return Err(SalvageError::NotFound(
                "No source file to list; use --file or --name first.".into(),
            ));
        };

        let breakpoints = self.breakpoints_for(&FileSpec::from_path(last_file.path()));
        let out = &mut self.output.output;
        match self.options.line {
            None => {
                self.manager
                    .display_more(self.options.count.unwrap_or(0), self.options.reverse, breakpoints.as_ref(), out);
            }
            Some(line) => {
                let count = self.options.count.unwrap_or(DEFAULT_LIST_COUNT);
                self.manager
                    .display_using_last_file(line, count, None, "", breakpoints.as_ref(), out);
            }
        }
        Ok(())
    }
}
