//! Source and module file names.

use std::fmt;
use std::path::{Path, PathBuf};

/// A file name split into directory and file name.
///
/// A spec without a directory matches any file with the same file name, so
/// `--file main.c` finds `/src/app/main.c`. A spec with a directory has to
/// match both parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileSpec
{
    directory: Option<String>,
    filename: String,
}

impl FileSpec
{
    pub fn new(path: impl AsRef<str>) -> Self
    {
        let path = path.as_ref();
        match path.rsplit_once('/') {
            Some(("", name)) => Self::from_parts(Some("/".to_string()), name),
            Some((dir, name)) => Self::from_parts(Some(dir.to_string()), name),
            None => Self::from_parts(None, path),
        }
    }

    pub fn from_parts(directory: Option<String>, filename: impl Into<String>) -> Self
    {
        Self {
            directory: directory.filter(|dir| !dir.is_empty()),
            filename: filename.into(),
        }
    }

    pub fn from_path(path: &Path) -> Self
    {
        Self::new(path.to_string_lossy())
    }

    pub fn directory(&self) -> Option<&str>
    {
        self.directory.as_deref()
    }

    pub fn filename(&self) -> &str
    {
        &self.filename
    }

    pub fn has_directory(&self) -> bool
    {
        self.directory.is_some()
    }

    pub fn is_empty(&self) -> bool
    {
        self.filename.is_empty()
    }

    pub fn path(&self) -> PathBuf
    {
        match &self.directory {
            Some(dir) => Path::new(dir).join(&self.filename),
            None => PathBuf::from(&self.filename),
        }
    }

    /// Whether `candidate` names the file this spec asks for.
    ///
    /// File names always have to agree; directories only when this spec
    /// has one.
    pub fn matches(&self, candidate: &FileSpec) -> bool
    {
        if self.filename != candidate.filename {
            return false;
        }
        match &self.directory {
            Some(dir) => candidate.directory.as_deref() == Some(dir.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for FileSpec
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.directory {
            Some(dir) if dir.ends_with('/') => write!(f, "{dir}{}", self.filename),
            Some(dir) => write!(f, "{dir}/{}", self.filename),
            None => write!(f, "{}", self.filename),
        }
    }
}
