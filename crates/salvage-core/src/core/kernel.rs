//! Kernel image search used to second-guess the page scan.
//!
//! A kernel core can map several kernel-looking images (kexts, a second
//! copy of the kernel). The page scan keeps the last one it sees, which is
//! not always the running kernel, so the loader asks a [`KernelSearch`] for
//! a better answer.

use tracing::{debug, trace};

use super::header::{ImageKind, MachHeaderProbe, MACH_HEADER_SIZE};
use super::threads::decode_registers;
use super::CoreProcess;
use crate::types::Address;

/// Strategy that locates the running kernel's `mach_header` in a core.
///
/// The loader calls it with both image addresses hidden, so
/// [`CoreProcess::image_info_address`] returns `None` during the call
/// unless the strategy itself records something.
pub trait KernelSearch: Send + Sync
{
    fn search_for_kernel(&self, process: &CoreProcess) -> Option<u64>;
}

/// Kernel search in the manner of the Darwin kernel dynamic loader.
///
/// 1. Trust a known image-info address if it points at a kernel header.
/// 2. Otherwise walk down from thread 0's PC on 1 MiB boundaries, since
///    kernels are loaded at 1 MiB alignment.
#[derive(Debug, Clone, Copy)]
pub struct DarwinKernelSearch
{
    /// How many 1 MiB steps below the PC to try.
    pub max_steps: u32,
}

pub const KERNEL_ALIGNMENT: u64 = 0x10_0000;

impl Default for DarwinKernelSearch
{
    fn default() -> Self
    {
        Self { max_steps: 128 }
    }
}

/// Whether a kernel header sits at `addr`.
pub fn is_kernel_at(process: &CoreProcess, addr: u64) -> bool
{
    let mut bytes = [0u8; MACH_HEADER_SIZE];
    match process.read_memory(addr, &mut bytes) {
        Ok(MACH_HEADER_SIZE) => {
            MachHeaderProbe::parse(&bytes).and_then(|probe| probe.image_kind()) == Some(ImageKind::Kernel)
        }
        _ => false,
    }
}

impl KernelSearch for DarwinKernelSearch
{
    fn search_for_kernel(&self, process: &CoreProcess) -> Option<u64>
    {
        if let Some(addr) = process.image_info_address() {
            if is_kernel_at(process, addr) {
                debug!(addr = format_args!("{addr:#x}"), "kernel at image info address");
                return Some(addr);
            }
        }

        // Decode thread 0 directly; the cached thread list is built on first query.
        let container = process.container();
        let context = container.thread_context(0)?;
        let pc = decode_registers(container.architecture().normalized(), context).ok()?.pc.value();
        let mut addr = Address::new(pc).align_down(KERNEL_ALIGNMENT).value();
        for _ in 0..self.max_steps {
            trace!(addr = format_args!("{addr:#x}"), "probing for kernel near pc");
            if is_kernel_at(process, addr) {
                debug!(addr = format_args!("{addr:#x}"), pc = format_args!("{pc:#x}"), "kernel found near pc");
                return Some(addr);
            }
            addr = addr.checked_sub(KERNEL_ALIGNMENT)?;
        }
        None
    }
}
