//! Reads from the reconstructed address space.

use tracing::trace;

use super::container::CoreContainer;
use crate::error::{SalvageError, SalvageResult};
use crate::range_index::{FileRange, RangeIndex};

/// Reader over the virtual-address to file-offset index of a core.
///
/// Segments that are contiguous in memory are not always contiguous in the
/// file, e.g.
///
/// ```text
///             address    size       fileoff    filesize
/// LC_SEGMENT  0x000f6000 0x00001000 0x1d509ee8 0x00001000
/// LC_SEGMENT  0x0f600000 0x00100000 0x1d50aee8 0x00100000
/// LC_SEGMENT  0x000f7000 0x00001000 0x1d60aee8 0x00001000
/// ```
///
/// so a read crossing `0xf7000` has to continue from a different file
/// offset. [`CoreMemoryReader::read`] walks entry by entry until the request
/// is satisfied or the mapping ends.
pub struct CoreMemoryReader<'a>
{
    ranges: &'a RangeIndex<FileRange>,
    container: &'a dyn CoreContainer,
}

impl<'a> CoreMemoryReader<'a>
{
    pub fn new(ranges: &'a RangeIndex<FileRange>, container: &'a dyn CoreContainer) -> Self
    {
        Self { ranges, container }
    }

    /// Fill `buf` from `addr` onwards and return how many bytes were read.
    ///
    /// A read that runs off the end of the mapped data is short, not an
    /// error. Nothing is cached; the container already holds every byte.
    ///
    /// ## Errors
    ///
    /// [`SalvageError::AddressNotMapped`] only when `addr` itself is not
    /// mapped, i.e. when zero bytes could be read.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> SalvageResult<usize>
    {
        let mut bytes_read = 0usize;

        while bytes_read < buf.len() {
            let curr_addr = addr.wrapping_add(bytes_read as u64);
            let Some(entry) = self.ranges.find_containing(curr_addr) else {
                if bytes_read == 0 {
                    return Err(SalvageError::AddressNotMapped(curr_addr));
                }
                break;
            };

            let bytes_left = entry.end() - curr_addr;
            let Some(file_offset) = entry.data.offset.checked_add(curr_addr - entry.base) else {
                trace!(addr = format_args!("{curr_addr:#x}"), "file offset out of range");
                break;
            };
            let want = (buf.len() - bytes_read).min(usize::try_from(bytes_left).unwrap_or(usize::MAX));
            let copied = self.container.copy_data(file_offset, &mut buf[bytes_read..bytes_read + want]);
            trace!(
                addr = format_args!("{curr_addr:#x}"),
                file_offset = format_args!("{file_offset:#x}"),
                copied,
                "core read"
            );
            if copied == 0 {
                break;
            }
            bytes_read += copied;
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::core::container::{CoreSection, ThreadContext};
    use crate::range_index::RangeEntry;
    use crate::types::Architecture;

    /// Backing file of `len` bytes, each holding its offset's low byte.
    struct Backing
    {
        len: u64,
    }

    impl CoreContainer for Backing
    {
        fn sections(&self) -> &[CoreSection]
        {
            &[]
        }

        fn thread_context_count(&self) -> usize
        {
            0
        }

        fn thread_context(&self, _index: usize) -> Option<&ThreadContext>
        {
            None
        }

        fn copy_data(&self, file_offset: u64, dest: &mut [u8]) -> usize
        {
            let available = self.len.saturating_sub(file_offset);
            let len = dest.len().min(usize::try_from(available).unwrap_or(usize::MAX));
            for (i, byte) in dest[..len].iter_mut().enumerate() {
                *byte = (file_offset + i as u64) as u8;
            }
            len
        }

        fn architecture(&self) -> Architecture
        {
            Architecture::X86_64
        }

        fn header_bytes(&self) -> &[u8]
        {
            &[]
        }
    }

    #[test]
    fn test_read_stops_at_unrepresentable_file_offset()
    {
        let mut ranges = RangeIndex::new();
        ranges.insert(RangeEntry::new(0x1000, 0x1000, FileRange::new(0x10, 0x1000)));
        ranges.insert(RangeEntry::new(0x2000, 0x1000, FileRange::new(u64::MAX - 0x10, 0x1000)));
        let backing = Backing { len: 0x2000 };
        let reader = CoreMemoryReader::new(&ranges, &backing);

        let mut buf = [0u8; 0x40];
        assert_eq!(reader.read(0x1fe0, &mut buf).unwrap(), 0x20);
        assert_eq!(buf[0], 0xf0);

        // 0x20 bytes into the second entry the file offset passes u64::MAX
        assert_eq!(reader.read(0x2020, &mut buf).unwrap(), 0);
    }
}
