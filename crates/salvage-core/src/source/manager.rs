//! # Source manager
//!
//! Caches source files and remembers where the last listing stopped so a
//! bare `source list` continues from there.
//!
//! ## Line format
//!
//! Every displayed line is
//!
//! ```text
//! [bp] MM NNNN<TAB>text
//! ```
//!
//! `MM` is the current-line marker right-aligned in two columns (blank on
//! other lines) and `NNNN` the line number left-aligned in four. The `[bp]`
//! prefix only appears when breakpoint annotations were requested: `[N] `
//! for lines with N locations, four spaces otherwise.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::SalvageResult;

/// Lines after a bare `source list` when no count was ever given.
pub const DEFAULT_LIST_COUNT: u32 = 10;

/// A source file split into lines. Line numbers are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFile
{
    path: PathBuf,
    lines: Vec<String>,
}

impl SourceFile
{
    /// Read `path`. Invalid UTF-8 is replaced rather than rejected.
    pub fn load(path: impl AsRef<Path>) -> SalvageResult<Self>
    {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Ok(Self::from_text(path, &String::from_utf8_lossy(&bytes)))
    }

    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self
    {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_owned).collect(),
        }
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn line_count(&self) -> usize
    {
        self.lines.len()
    }

    pub fn line(&self, line: u32) -> Option<&str>
    {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        self.lines.get(index).map(String::as_str)
    }

    pub fn is_valid_line(&self, line: u32) -> bool
    {
        self.line(line).is_some()
    }
}

/// Breakpoint location counts per line of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointLines
{
    counts: BTreeMap<u32, usize>,
}

impl BreakpointLines
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn add(&mut self, line: u32)
    {
        *self.counts.entry(line).or_default() += 1;
    }

    pub fn count(&self, line: u32) -> usize
    {
        self.counts.get(&line).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool
    {
        self.counts.is_empty()
    }
}

impl FromIterator<u32> for BreakpointLines
{
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self
    {
        let mut lines = Self::new();
        for line in iter {
            lines.add(line);
        }
        lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor
{
    /// Nothing displayed and no default chosen.
    Unset,
    /// A default was chosen but nothing displayed yet.
    Default(u32),
    /// First line of the last display.
    At(u32),
    /// The last display ran past the end of the file.
    Exhausted,
}

/// Source file cache plus the "last listed" cursor.
#[derive(Debug)]
pub struct SourceManager
{
    files: HashMap<PathBuf, Arc<SourceFile>>,
    last_file: Option<Arc<SourceFile>>,
    cursor: Cursor,
    last_count: u32,
    default_set: bool,
}

impl Default for SourceManager
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SourceManager
{
    pub fn new() -> Self
    {
        Self {
            files: HashMap::new(),
            last_file: None,
            cursor: Cursor::Unset,
            last_count: 0,
            default_set: false,
        }
    }

    /// Cached contents of `path`, reading the file on first use.
    pub fn file(&mut self, path: &Path) -> SalvageResult<Arc<SourceFile>>
    {
        if let Some(file) = self.files.get(path) {
            return Ok(file.clone());
        }
        let file = Arc::new(SourceFile::load(path)?);
        debug!(path = %path.display(), lines = file.line_count(), "cached source file");
        self.files.insert(path.to_path_buf(), file.clone());
        Ok(file)
    }

    /// Seed the cache, e.g. with generated sources.
    pub fn insert_file(&mut self, file: SourceFile)
    {
        self.files.insert(file.path.clone(), Arc::new(file));
    }

    pub fn last_file(&self) -> Option<&Arc<SourceFile>>
    {
        self.last_file.as_ref()
    }

    /// First line of the last display, once something was displayed.
    pub fn last_line(&self) -> Option<u32>
    {
        match self.cursor {
            Cursor::At(line) => Some(line),
            _ => None,
        }
    }

    pub fn last_count(&self) -> u32
    {
        self.last_count
    }

    pub fn default_set(&self) -> bool
    {
        self.default_set
    }

    /// Make `path` the file a bare listing starts in, at `line`.
    pub fn set_default_file_and_line(&mut self, path: &Path, line: u32) -> SalvageResult<()>
    {
        let file = self.file(path)?;
        self.last_file = Some(file);
        self.cursor = Cursor::Default(line);
        self.default_set = true;
        Ok(())
    }

    /// Display `count` lines of `path` starting at `start_line` and make it
    /// the last file. Returns the number of bytes written to `out`.
    pub fn display_source_lines(
        &mut self,
        path: &Path,
        start_line: u32,
        count: u32,
        current_line: Option<u32>,
        marker: &str,
        breakpoints: Option<&BreakpointLines>,
        out: &mut String,
    ) -> SalvageResult<usize>
    {
        let file = self.file(path)?;
        let same_file = self.last_file.as_ref().is_some_and(|last| Arc::ptr_eq(last, &file));
        if !same_file {
            self.last_file = Some(file);
            self.cursor = Cursor::Unset;
        }
        Ok(self.display_using_last_file(start_line, count, current_line, marker, breakpoints, out))
    }

    /// Display `count` lines of the last file. A `start_line` of 0 continues
    /// after the previous display.
    pub fn display_using_last_file(
        &mut self,
        start_line: u32,
        count: u32,
        current_line: Option<u32>,
        marker: &str,
        breakpoints: Option<&BreakpointLines>,
        out: &mut String,
    ) -> usize
    {
        let Some(file) = self.last_file.clone() else {
            return 0;
        };
        if count == 0 {
            return 0;
        }

        let start = match (start_line, self.cursor) {
            (0, Cursor::At(line)) => line.saturating_add(self.last_count),
            (0, Cursor::Default(line)) => line.max(1),
            (0, _) => 1,
            (line, _) => line,
        };
        self.cursor = Cursor::At(start);
        self.last_count = count;

        let annotate = breakpoints.filter(|lines| !lines.is_empty());
        let before = out.len();
        for line in start..start.saturating_add(count) {
            let Some(text) = file.line(line) else {
                self.cursor = Cursor::Exhausted;
                break;
            };
            if let Some(lines) = annotate {
                match lines.count(line) {
                    0 => out.push_str("    "),
                    n => out.push_str(&format!("[{n}] ")),
                }
            }
            let mark = if current_line == Some(line) { marker } else { "" };
            out.push_str(&format!("{mark:>2.2} {line:<4}\t{text}\n"));
        }
        trace!(path = %file.path().display(), start, count, cursor = ?self.cursor, "displayed source");
        out.len() - before
    }

    /// Continue the last listing: the next `count` lines, or the previous
    /// ones when `reverse`. A `count` of 0 reuses the last count.
    pub fn display_more(&mut self, count: u32, reverse: bool, breakpoints: Option<&BreakpointLines>, out: &mut String) -> usize
    {
        if self.last_file.is_none() {
            return 0;
        }
        if count > 0 {
            self.last_count = count;
        } else if self.last_count == 0 {
            self.last_count = DEFAULT_LIST_COUNT;
        }
        let count = self.last_count;

        let start = match self.cursor {
            Cursor::Exhausted => return 0,
            Cursor::At(1) | Cursor::Default(1) if reverse => return 0,
            Cursor::At(line) | Cursor::Default(line) if reverse => line.saturating_sub(count).max(1),
            Cursor::At(line) => line.saturating_add(count),
            Cursor::Default(line) => line.max(1),
            Cursor::Unset => 1,
        };
        self.display_using_last_file(start, count, None, "", breakpoints, out)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn manager_with(lines: u32) -> (SourceManager, PathBuf)
    {
        let path = PathBuf::from("/virtual/main.c");
        let text: String = (1..=lines).map(|n| format!("line {n}\n")).collect();
        let mut manager = SourceManager::new();
        manager.insert_file(SourceFile::from_text(&path, &text));
        (manager, path)
    }

    #[test]
    fn test_line_format_and_marker()
    {
        let (mut manager, path) = manager_with(20);
        let mut out = String::new();
        manager
            .display_source_lines(&path, 9, 3, Some(10), "->", None, &mut out)
            .unwrap();
        assert_eq!(out, "   9   \tline 9\n-> 10  \tline 10\n   11  \tline 11\n");
    }

    #[test]
    fn test_breakpoint_prefix()
    {
        let (mut manager, path) = manager_with(5);
        let breakpoints: BreakpointLines = [2, 2].into_iter().collect();
        let mut out = String::new();
        manager
            .display_source_lines(&path, 1, 2, None, "", Some(&breakpoints), &mut out)
            .unwrap();
        assert_eq!(out, "       1   \tline 1\n[2]    2   \tline 2\n");
    }

    #[test]
    fn test_display_more_continues_and_exhausts()
    {
        let (mut manager, path) = manager_with(25);
        let mut out = String::new();
        manager.display_source_lines(&path, 1, 10, None, "", None, &mut out).unwrap();
        assert_eq!(manager.last_line(), Some(1));

        out.clear();
        assert!(manager.display_more(0, false, None, &mut out) > 0);
        assert!(out.starts_with("   11  \t"));

        out.clear();
        manager.display_more(0, false, None, &mut out);
        assert_eq!(out.lines().count(), 5);
        assert_eq!(manager.display_more(0, false, None, &mut out), 0);
    }

    #[test]
    fn test_display_more_reverse()
    {
        let (mut manager, path) = manager_with(40);
        let mut out = String::new();
        manager.display_source_lines(&path, 21, 10, None, "", None, &mut out).unwrap();

        out.clear();
        manager.display_more(0, true, None, &mut out);
        assert!(out.starts_with("   11  \t"));

        out.clear();
        manager.display_more(0, true, None, &mut out);
        assert!(out.starts_with("   1   \t"));
        assert_eq!(manager.display_more(0, true, None, &mut out), 0);
    }

    #[test]
    fn test_default_line_is_not_skipped()
    {
        let (mut manager, path) = manager_with(30);
        manager.set_default_file_and_line(&path, 12).unwrap();
        let mut out = String::new();
        manager.display_more(5, false, None, &mut out);
        assert!(out.starts_with("   12  \t"));
        assert_eq!(out.lines().count(), 5);
    }

    #[test]
    fn test_missing_file_is_an_error()
    {
        let mut manager = SourceManager::new();
        let mut out = String::new();
        let result = manager.display_source_lines(Path::new("/nonexistent/salvage.c"), 1, 10, None, "", None, &mut out);
        assert!(result.is_err());
        assert!(manager.last_file().is_none());
    }
}
