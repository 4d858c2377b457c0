//! Compile units.

use crate::symbols::file_spec::FileSpec;
use crate::symbols::function::Function;
use crate::symbols::line_table::{LineEntry, LineTable};

/// One compiled source file with its line table and functions.
///
/// `support_files[0]` is always the unit's own file; the rest are the
/// headers and other files its line table refers to.
#[derive(Debug, Clone)]
pub struct CompileUnit
{
    file: FileSpec,
    support_files: Vec<FileSpec>,
    line_table: LineTable,
    functions: Vec<Function>,
}

impl CompileUnit
{
    pub fn new(file: FileSpec, support_files: impl IntoIterator<Item = FileSpec>, line_table: LineTable) -> Self
    {
        let mut files = vec![file.clone()];
        for support in support_files {
            if !files.contains(&support) {
                files.push(support);
            }
        }
        Self {
            file,
            support_files: files,
            line_table,
            functions: Vec::new(),
        }
    }

    pub fn add_function(&mut self, function: Function)
    {
        self.functions.push(function);
    }

    #[must_use]
    pub fn with_function(mut self, function: Function) -> Self
    {
        self.add_function(function);
        self
    }

    pub fn file(&self) -> &FileSpec
    {
        &self.file
    }

    pub fn support_files(&self) -> &[FileSpec]
    {
        &self.support_files
    }

    pub fn line_table(&self) -> &LineTable
    {
        &self.line_table
    }

    pub fn functions(&self) -> &[Function]
    {
        &self.functions
    }

    /// Index of the first support file at or after `start` that `spec`
    /// matches.
    pub fn find_file_index(&self, start: usize, spec: &FileSpec) -> Option<usize>
    {
        self.support_files
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, file)| spec.matches(file))
            .map(|(idx, _)| idx)
    }

    pub fn find_line_entry(&self, start_idx: usize, line: u32, file: &FileSpec, exact: bool) -> Option<(usize, &LineEntry)>
    {
        self.line_table.find_line_entry(start_idx, line, file, exact)
    }

    pub fn function_containing(&self, addr: u64) -> Option<&Function>
    {
        self.functions.iter().find(|func| func.contains(addr))
    }

    /// Whether any function or line row covers `addr`.
    pub fn contains(&self, addr: u64) -> bool
    {
        self.function_containing(addr).is_some() || self.line_table.find_by_address(addr).is_some()
    }

    /// Every row whose file `spec` matches.
    pub fn line_entries_for_file<'a>(&'a self, spec: &'a FileSpec) -> impl Iterator<Item = &'a LineEntry> + 'a
    {
        self.line_table.iter().filter(move |entry| spec.matches(&entry.file))
    }
}
