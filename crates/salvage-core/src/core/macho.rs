//! Mach-O core file container.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object::macho;
use object::read::macho::{LoadCommandVariant, MachHeader};
use object::{Endian, Endianness, FileKind};
use tracing::{debug, trace};

use super::container::{CoreContainer, CoreSection, ThreadContext, ThreadState};
use super::header::{MachHeaderProbe, MACH_HEADER_SIZE};
use crate::error::{SalvageError, SalvageResult};
use crate::types::{Architecture, MemoryPermissions};

/// A Mach-O `MH_CORE` file read into memory.
///
/// Segments and thread contexts are extracted once when the file is opened;
/// the raw bytes are kept for [`CoreContainer::copy_data`].
pub struct MachCoreFile
{
    path: PathBuf,
    data: Arc<[u8]>,
    header_len: usize,
    architecture: Architecture,
    sections: Vec<CoreSection>,
    threads: Vec<ThreadContext>,
}

impl std::fmt::Debug for MachCoreFile
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("MachCoreFile")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("architecture", &self.architecture)
            .field("sections", &self.sections.len())
            .field("threads", &self.threads.len())
            .finish()
    }
}

/// Check whether the file at `path` starts with a Mach-O core header.
///
/// Unreadable or short files are simply not cores.
pub fn is_mach_core(path: &Path) -> bool
{
    use std::io::Read;

    let mut bytes = [0u8; MACH_HEADER_SIZE];
    let read = fs::File::open(path).and_then(|mut file| file.read_exact(&mut bytes));
    read.is_ok() && MachHeaderProbe::parse(&bytes).is_some_and(|probe| probe.is_core())
}

impl MachCoreFile
{
    /// Read and parse a core file from disk.
    ///
    /// ## Errors
    ///
    /// - [`SalvageError::InvalidCoreModule`] if the file cannot be read
    /// - [`SalvageError::InvalidObjectFile`] if it is not a Mach-O core
    /// - [`SalvageError::NoSections`] if it has no segments
    pub fn open(path: impl AsRef<Path>) -> SalvageResult<Self>
    {
        let path = path.as_ref();
        let bytes =
            fs::read(path).map_err(|err| SalvageError::InvalidCoreModule(format!("{}: {err}", path.display())))?;
        Self::parse(path, Arc::from(bytes))
    }

    /// Parse an in-memory core image. `path` is only used for messages.
    pub fn parse(path: impl AsRef<Path>, data: Arc<[u8]>) -> SalvageResult<Self>
    {
        let path = path.as_ref().to_path_buf();
        let invalid = |err: object::Error| SalvageError::InvalidObjectFile(format!("{}: {err}", path.display()));

        let kind = FileKind::parse(&*data).map_err(invalid)?;
        let parsed = match kind {
            FileKind::MachO32 => parse_commands::<macho::MachHeader32<Endianness>>(&data).map_err(invalid)?,
            FileKind::MachO64 => parse_commands::<macho::MachHeader64<Endianness>>(&data).map_err(invalid)?,
            other => {
                return Err(SalvageError::InvalidObjectFile(format!(
                    "{}: not a Mach-O file ({other:?})",
                    path.display()
                )))
            }
        };

        if parsed.filetype != macho::MH_CORE {
            return Err(SalvageError::InvalidObjectFile(format!(
                "{}: Mach-O file type {} is not MH_CORE",
                path.display(),
                parsed.filetype
            )));
        }
        if parsed.sections.is_empty() {
            return Err(SalvageError::NoSections);
        }

        debug!(
            path = %path.display(),
            arch = %parsed.architecture,
            segments = parsed.sections.len(),
            threads = parsed.threads.len(),
            "parsed Mach-O core"
        );

        Ok(Self {
            path,
            data,
            header_len: parsed.header_len,
            architecture: parsed.architecture,
            sections: parsed.sections,
            threads: parsed.threads,
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }
}

struct ParsedCore
{
    filetype: u32,
    header_len: usize,
    architecture: Architecture,
    sections: Vec<CoreSection>,
    threads: Vec<ThreadContext>,
}

fn parse_commands<Mach>(data: &[u8]) -> object::Result<ParsedCore>
where
    Mach: MachHeader<Endian = Endianness>,
{
    let header = Mach::parse(data, 0)?;
    let endian = header.endian()?;
    let mut sections = Vec::new();
    let mut threads = Vec::new();

    let mut commands = header.load_commands(endian, data, 0)?;
    while let Some(command) = commands.next()? {
        match command.variant()? {
            LoadCommandVariant::Segment32(segment, _) => sections.push(CoreSection {
                name: segment_name(&segment.segname),
                vm_addr: u64::from(segment.vmaddr.get(endian)),
                vm_size: u64::from(segment.vmsize.get(endian)),
                file_offset: u64::from(segment.fileoff.get(endian)),
                file_size: u64::from(segment.filesize.get(endian)),
                permissions: MemoryPermissions::from_bits_truncate(segment.initprot.get(endian)),
            }),
            LoadCommandVariant::Segment64(segment, _) => sections.push(CoreSection {
                name: segment_name(&segment.segname),
                vm_addr: segment.vmaddr.get(endian),
                vm_size: segment.vmsize.get(endian),
                file_offset: segment.fileoff.get(endian),
                file_size: segment.filesize.get(endian),
                permissions: MemoryPermissions::from_bits_truncate(segment.initprot.get(endian)),
            }),
            LoadCommandVariant::Thread(_, state) => {
                let context = parse_thread_states(state, endian);
                trace!(flavors = context.states.len(), "LC_THREAD");
                threads.push(context);
            }
            _ => {}
        }
    }

    let header_len = if header.is_type_64() {
        std::mem::size_of::<macho::MachHeader64<Endianness>>()
    } else {
        std::mem::size_of::<macho::MachHeader32<Endianness>>()
    };

    Ok(ParsedCore {
        filetype: header.filetype(endian),
        header_len,
        architecture: Architecture::from_mach_cpu(header.cputype(endian), header.cpusubtype(endian)),
        sections,
        threads,
    })
}

fn segment_name(raw: &[u8; 16]) -> String
{
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

/// Split the payload of an `LC_THREAD` command into its states.
///
/// A truncated trailing state is dropped.
fn parse_thread_states(mut bytes: &[u8], endian: Endianness) -> ThreadContext
{
    let read_u32 = |chunk: &[u8]| {
        let word = [chunk[0], chunk[1], chunk[2], chunk[3]];
        if endian.is_big_endian() {
            u32::from_be_bytes(word)
        } else {
            u32::from_le_bytes(word)
        }
    };

    let mut states = Vec::new();
    while bytes.len() >= 8 {
        let flavor = read_u32(&bytes[0..4]);
        let count = read_u32(&bytes[4..8]) as usize;
        let body = &bytes[8..];
        let Some(state) = count.checked_mul(4).and_then(|len| body.get(..len)) else {
            break;
        };
        states.push(ThreadState {
            flavor,
            words: state.chunks_exact(4).map(read_u32).collect(),
        });
        bytes = &body[count * 4..];
    }
    ThreadContext { states }
}

impl CoreContainer for MachCoreFile
{
    fn sections(&self) -> &[CoreSection]
    {
        &self.sections
    }

    fn thread_context_count(&self) -> usize
    {
        self.threads.len()
    }

    fn thread_context(&self, index: usize) -> Option<&ThreadContext>
    {
        self.threads.get(index)
    }

    fn copy_data(&self, file_offset: u64, dest: &mut [u8]) -> usize
    {
        let Ok(start) = usize::try_from(file_offset) else {
            return 0;
        };
        let Some(available) = self.data.get(start..) else {
            return 0;
        };
        let len = available.len().min(dest.len());
        dest[..len].copy_from_slice(&available[..len]);
        len
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn header_bytes(&self) -> &[u8]
    {
        &self.data[..self.header_len.min(self.data.len())]
    }
}
