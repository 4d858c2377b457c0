//! Thread, region and architecture types.

use std::fmt;

use super::{Address, MemoryPermissions};

/// Thread identifier
///
/// Core threads have no kernel identity left, so they are numbered by the
/// order of their `LC_THREAD` records: the first record is thread 0.
///
/// ```rust
/// use salvage_core::types::ThreadId;
///
/// let thread = ThreadId::from(1);
/// assert_eq!(thread.raw(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Answer to "what is mapped at this address" for a core file.
///
/// A region either describes a mapped range with its protection, or the
/// unmapped gap between the queried address and the next mapped range. Gaps
/// carry no permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion
{
    /// Start address of the region (inclusive)
    pub start: Address,
    /// End address of the region (exclusive)
    pub end: Address,
    pub permissions: MemoryPermissions,
    /// False for a gap in front of the next mapped range.
    pub mapped: bool,
}

impl MemoryRegion
{
    /// Get the size of the memory region in bytes
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    pub fn is_readable(&self) -> bool
    {
        self.permissions.contains(MemoryPermissions::READABLE)
    }

    pub fn is_writable(&self) -> bool
    {
        self.permissions.contains(MemoryPermissions::WRITABLE)
    }

    pub fn is_executable(&self) -> bool
    {
        self.permissions.contains(MemoryPermissions::EXECUTABLE)
    }

    /// Check if an address lies within this memory region
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }
}

impl fmt::Display for MemoryRegion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[{}-{}) {}", self.start, self.end, self.permissions)?;
        if !self.mapped {
            write!(f, " (unmapped)")?;
        }
        Ok(())
    }
}

/// CPU architecture of a core file or module
///
/// `I486` only appears as reported by a container. A core loaded through
/// [`crate::core::CoreProcess`] is normalised to [`Architecture::I386`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    Arm64,
    /// 32-bit ARM
    Arm,
    /// 64-bit x86
    X86_64,
    /// 32-bit x86
    I386,
    /// Generic 32-bit x86 as tagged by some core writers
    I486,
    /// Anything else; the string names it.
    Unknown(&'static str),
}

// <mach/machine.h>
const CPU_ARCH_ABI64: u32 = 0x0100_0000;
const CPU_TYPE_X86: u32 = 7;
const CPU_TYPE_ARM: u32 = 12;
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;
const CPU_SUBTYPE_486: u32 = 4;

impl Architecture
{
    /// Map a Mach-O `cputype`/`cpusubtype` pair.
    ///
    /// ```rust
    /// use salvage_core::types::Architecture;
    ///
    /// assert_eq!(Architecture::from_mach_cpu(0x0100_0007, 3), Architecture::X86_64);
    /// assert_eq!(Architecture::from_mach_cpu(7, 4), Architecture::I486);
    /// ```
    pub fn from_mach_cpu(cputype: u32, cpusubtype: u32) -> Self
    {
        match cputype {
            t if t == CPU_TYPE_X86 | CPU_ARCH_ABI64 => Architecture::X86_64,
            CPU_TYPE_X86 if cpusubtype & !CPU_SUBTYPE_MASK == CPU_SUBTYPE_486 => Architecture::I486,
            CPU_TYPE_X86 => Architecture::I386,
            t if t == CPU_TYPE_ARM | CPU_ARCH_ABI64 => Architecture::Arm64,
            CPU_TYPE_ARM => Architecture::Arm,
            _ => Architecture::Unknown("unknown"),
        }
    }

    /// Collapse container-only aliases onto the architecture a session uses.
    #[must_use]
    pub const fn normalized(self) -> Self
    {
        match self {
            Architecture::I486 => Architecture::I386,
            other => other,
        }
    }

    /// Size of an address in bytes for this architecture.
    #[must_use]
    pub const fn address_byte_size(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Unknown(_) => 8,
            Architecture::Arm | Architecture::I386 | Architecture::I486 => 4,
        }
    }

    pub const fn is_valid(self) -> bool
    {
        !matches!(self, Architecture::Unknown(_))
    }
}

impl From<object::Architecture> for Architecture
{
    fn from(arch: object::Architecture) -> Self
    {
        match arch {
            object::Architecture::Aarch64 => Architecture::Arm64,
            object::Architecture::Arm => Architecture::Arm,
            object::Architecture::X86_64 => Architecture::X86_64,
            object::Architecture::I386 => Architecture::I386,
            _ => Architecture::Unknown("unknown"),
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Arm => write!(f, "arm"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::I386 => write!(f, "i386"),
            Architecture::I486 => write!(f, "i486"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
