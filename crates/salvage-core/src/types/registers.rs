//! CPU register snapshot of a core thread.

use super::{Address, Architecture};

/// General-purpose register names in the order the Mach thread states
/// store them.
pub const X86_64_REGISTER_NAMES: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15", "rip",
    "rflags", "cs", "fs", "gs",
];
pub const I386_REGISTER_NAMES: &[&str] = &[
    "eax", "ebx", "ecx", "edx", "edi", "esi", "ebp", "esp", "ss", "eflags", "eip", "cs", "ds", "es", "fs", "gs",
];
pub const ARM64_REGISTER_NAMES: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16", "x17",
    "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "fp", "lr", "sp", "pc", "cpsr",
];
pub const ARM_REGISTER_NAMES: &[&str] = &[
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr", "pc", "cpsr",
];

/// Register values captured for one thread
///
/// `pc`, `sp`, `fp` and `status` are pulled out of `general` for the
/// common queries; `general` keeps every register of the thread state in
/// its native order, paired with [`Registers::names`].
///
/// ```rust
/// use salvage_core::types::{Address, Architecture, Registers};
///
/// let mut values = vec![0u64; 34];
/// values[32] = 0x1000;
/// let regs = Registers::from_values(Architecture::Arm64, values);
/// assert_eq!(regs.pc, Address::new(0x1000));
/// assert_eq!(regs.get("pc"), Some(0x1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers
{
    /// Program Counter (PC) - address of the next instruction to execute
    pub pc: Address,
    /// Stack Pointer (SP) - address of the top of the stack
    pub sp: Address,
    /// Frame Pointer (FP) - address of the current stack frame
    pub fp: Address,
    /// Status/Flags register (CPSR, RFLAGS or EFLAGS)
    pub status: u64,
    pub general: Vec<u64>,
    architecture: Architecture,
}

impl Registers
{
    /// Build a snapshot from values laid out as in the `*_REGISTER_NAMES`
    /// table of `architecture`. Missing trailing values read as zero.
    pub fn from_values(architecture: Architecture, general: Vec<u64>) -> Self
    {
        let mut regs = Self {
            pc: Address::ZERO,
            sp: Address::ZERO,
            fp: Address::ZERO,
            status: 0,
            general,
            architecture,
        };
        let (pc, sp, fp, status) = match architecture {
            Architecture::X86_64 => ("rip", "rsp", "rbp", "rflags"),
            Architecture::I386 | Architecture::I486 => ("eip", "esp", "ebp", "eflags"),
            Architecture::Arm64 => ("pc", "sp", "fp", "cpsr"),
            Architecture::Arm => ("pc", "sp", "r7", "cpsr"),
            Architecture::Unknown(_) => return regs,
        };
        regs.pc = Address::new(regs.get(pc).unwrap_or(0));
        regs.sp = Address::new(regs.get(sp).unwrap_or(0));
        regs.fp = Address::new(regs.get(fp).unwrap_or(0));
        regs.status = regs.get(status).unwrap_or(0);
        regs
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Register names for this snapshot's architecture.
    pub fn names(&self) -> &'static [&'static str]
    {
        match self.architecture {
            Architecture::X86_64 => X86_64_REGISTER_NAMES,
            Architecture::I386 | Architecture::I486 => I386_REGISTER_NAMES,
            Architecture::Arm64 => ARM64_REGISTER_NAMES,
            Architecture::Arm => ARM_REGISTER_NAMES,
            Architecture::Unknown(_) => &[],
        }
    }

    /// Look up a register by name.
    pub fn get(&self, name: &str) -> Option<u64>
    {
        let index = self.names().iter().position(|n| *n == name)?;
        Some(self.general.get(index).copied().unwrap_or(0))
    }

    /// `(name, value)` pairs in native order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_
    {
        self.names()
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, self.general.get(i).copied().unwrap_or(0)))
    }
}
