//! Mach-O header sniffing.
//!
//! Only the seven 32-bit words of `struct mach_header` are needed to tell a
//! dynamic linker from a kernel, or a core file from anything else. The
//! 64-bit header adds a reserved word after them, which is never read.

use object::macho;

pub use object::macho::{MH_CIGAM, MH_CIGAM_64, MH_CORE, MH_DYLDLINK, MH_DYLINKER, MH_EXECUTE, MH_MAGIC, MH_MAGIC_64};

/// Bytes read from a page when probing for an image header.
pub const MACH_HEADER_SIZE: usize = 28;

/// Decoded fields of a `struct mach_header`, already in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeaderProbe
{
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

/// Kind of image found behind a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind
{
    /// `MH_DYLINKER`: the user-space dynamic loader.
    Dyld,
    /// `MH_EXECUTE` without `MH_DYLDLINK`: a statically linked kernel.
    Kernel,
}

impl MachHeaderProbe
{
    /// Decode a header from memory bytes.
    ///
    /// The words are read little-endian; a byte-swapped magic means the
    /// image is big-endian, and every field is swapped back. Returns `None`
    /// for short input or a magic that is not a Mach-O magic in either
    /// order.
    pub fn parse(bytes: &[u8]) -> Option<Self>
    {
        let words = bytes.get(..MACH_HEADER_SIZE)?;
        let mut fields = [0u32; 7];
        for (field, chunk) in fields.iter_mut().zip(words.chunks_exact(4)) {
            *field = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        if fields[0] == MH_CIGAM || fields[0] == MH_CIGAM_64 {
            for field in &mut fields {
                *field = field.swap_bytes();
            }
        }
        if fields[0] != MH_MAGIC && fields[0] != MH_MAGIC_64 {
            return None;
        }

        let [magic, cputype, cpusubtype, filetype, ncmds, sizeofcmds, flags] = fields;
        Some(Self {
            magic,
            cputype,
            cpusubtype,
            filetype,
            ncmds,
            sizeofcmds,
            flags,
        })
    }

    pub fn is_64(&self) -> bool
    {
        self.magic == MH_MAGIC_64
    }

    pub fn is_core(&self) -> bool
    {
        self.filetype == MH_CORE
    }

    /// Classify the image as a dynamic loader or a kernel, if it is either.
    pub fn image_kind(&self) -> Option<ImageKind>
    {
        match self.filetype {
            macho::MH_DYLINKER => Some(ImageKind::Dyld),
            macho::MH_EXECUTE if self.flags & MH_DYLDLINK == 0 => Some(ImageKind::Kernel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn header_bytes(words: [u32; 7], big_endian: bool) -> Vec<u8>
    {
        words
            .iter()
            .flat_map(|w| if big_endian { w.to_be_bytes() } else { w.to_le_bytes() })
            .collect()
    }

    #[test]
    fn test_dyld_header()
    {
        let bytes = header_bytes([MH_MAGIC_64, 0x0100_0007, 3, MH_DYLINKER, 10, 0x400, 0], false);
        let probe = MachHeaderProbe::parse(&bytes).unwrap();
        assert!(probe.is_64());
        assert_eq!(probe.image_kind(), Some(ImageKind::Dyld));
    }

    #[test]
    fn test_kernel_requires_dyldlink_clear()
    {
        let kernel = header_bytes([MH_MAGIC_64, 0x0100_0007, 3, MH_EXECUTE, 10, 0x400, 0x1], false);
        assert_eq!(MachHeaderProbe::parse(&kernel).unwrap().image_kind(), Some(ImageKind::Kernel));

        let app = header_bytes([MH_MAGIC_64, 0x0100_0007, 3, MH_EXECUTE, 10, 0x400, MH_DYLDLINK], false);
        assert_eq!(MachHeaderProbe::parse(&app).unwrap().image_kind(), None);
    }

    #[test]
    fn test_byte_swapped_header()
    {
        let bytes = header_bytes([MH_MAGIC, 18, 0, MH_DYLINKER, 4, 0x100, 0], true);
        let probe = MachHeaderProbe::parse(&bytes).unwrap();
        assert_eq!(probe.magic, MH_MAGIC);
        assert_eq!(probe.filetype, MH_DYLINKER);
        assert_eq!(probe.ncmds, 4);
    }

    #[test]
    fn test_rejects_garbage_and_short_input()
    {
        assert!(MachHeaderProbe::parse(&[0u8; MACH_HEADER_SIZE]).is_none());
        assert!(MachHeaderProbe::parse(&MH_MAGIC_64.to_le_bytes()).is_none());
    }
}
