//! Memory protection flags.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Protection of a mapped range, using the Mach `VM_PROT_*` bit values.
    ///
    /// ```rust
    /// use salvage_core::types::MemoryPermissions;
    ///
    /// let perms = MemoryPermissions::from_vm_prot(0);
    /// assert_eq!(perms, MemoryPermissions::READABLE | MemoryPermissions::EXECUTABLE);
    /// assert_eq!(perms.to_string(), "r-x");
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryPermissions: u32
    {
        const READABLE = 0x1;
        const WRITABLE = 0x2;
        const EXECUTABLE = 0x4;
    }
}

impl MemoryPermissions
{
    /// Convert a segment's `initprot`, treating an empty set as `r-x`.
    ///
    /// Some core writers leave the protection fields zeroed. The range is
    /// still readable, and never writable because cores are read-only.
    pub fn from_vm_prot(prot: u32) -> Self
    {
        let perms = Self::from_bits_truncate(prot);
        if perms.is_empty() {
            Self::READABLE | Self::EXECUTABLE
        } else {
            perms
        }
    }
}

impl fmt::Display for MemoryPermissions
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let flag = |bit: Self, c: char| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READABLE, 'r'),
            flag(Self::WRITABLE, 'w'),
            flag(Self::EXECUTABLE, 'x')
        )
    }
}
