use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;
use xxhash_rust::xxh32::xxh32;

use crate::error::{Error, Result};
use crate::format::{FileHeader, FILE_HEADER_SIZE};

/// Physical size of one page: 1020 payload bytes + 4-byte XXH32 checksum.
pub const PAGE_SIZE: u64 = 1024;

/// Payload bytes per page.
pub const PAGE_PAYLOAD: u64 = PAGE_SIZE - 4;

/// Checksummed, page-structured container file.
///
/// # Addressing
/// The file is a sequence of 1024-byte physical pages; each page carries
/// 1020 payload bytes followed by the XXH32 checksum of those bytes.
/// **Logical** offsets address the concatenated payload stream, **physical**
/// offsets address raw file bytes:
/// ```text
/// physical = (logical / 1020) * 1024 + logical % 1020
/// ```
///
/// # Allocation
/// Writers obtain space through [`allocate_space`], which hands out
/// contiguous logical ranges at the frontier in strictly increasing order.
/// Patch-back writes into previously allocated ranges (section headers) are
/// the only non-sequential writes.
///
/// # Lifecycle
/// [`create`] reserves a zeroed 48-byte file header; [`close`] patches it
/// with the real values and refuses to run while any writer is open.
///
/// [`allocate_space`]: PagedFile::allocate_space
/// [`create`]: PagedFile::create
/// [`close`]: PagedFile::close
pub struct PagedFile {
    file: File,
    /// Raw length of the file in bytes; always a multiple of `PAGE_SIZE`.
    physical_eof: u64,
    /// Logical position of the next `write` call.
    position: u64,
    /// Allocation frontier: first logical byte not yet handed out.
    unused_logical_start: u64,
    /// Live compressed-vector writers; file close is rejected while > 0.
    writer_count: usize,
    closed: bool,
    read_only: bool,
    section_logical_start: u64,
    record_count: u64,
}

impl PagedFile {
    /// Create a new PCVF1 file at `path`, truncating any existing file.
    ///
    /// The 48-byte file header region is reserved and zero-filled; real
    /// values are patched in by [`close`](PagedFile::close).
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "creating PCVF1 file");

        let mut paged = Self {
            file,
            physical_eof: 0,
            position: 0,
            unused_logical_start: 0,
            writer_count: 0,
            closed: false,
            read_only: false,
            section_logical_start: 0,
            record_count: 0,
        };
        paged.allocate_space(FILE_HEADER_SIZE, true)?;
        Ok(paged)
    }

    /// Open an existing PCVF1 file read-only, validating magic and version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let physical_eof = file.metadata()?.len();
        if physical_eof % PAGE_SIZE != 0 {
            return Err(Error::BadFileHeader(format!(
                "file length {physical_eof} is not a multiple of the {PAGE_SIZE}-byte page size"
            )));
        }

        let mut paged = Self {
            file,
            physical_eof,
            position: 0,
            unused_logical_start: (physical_eof / PAGE_SIZE) * PAGE_PAYLOAD,
            writer_count: 0,
            closed: false,
            read_only: true,
            section_logical_start: 0,
            record_count: 0,
        };

        let mut header_buf = [0u8; FILE_HEADER_SIZE as usize];
        paged.read_at(0, &mut header_buf)?;
        let header = FileHeader::from_bytes(&header_buf)?;
        paged.section_logical_start = header.section_logical_start;
        paged.record_count = header.record_count;
        Ok(paged)
    }

    /// Reserve `n` contiguous logical bytes at the allocation frontier and
    /// return their logical offset. With `extend_with_zeros` the range is
    /// zero-filled immediately (for regions patched at a later time).
    pub fn allocate_space(&mut self, n: u64, extend_with_zeros: bool) -> Result<u64> {
        let logical = self.unused_logical_start;
        self.unused_logical_start += n;
        if extend_with_zeros {
            let zeros = vec![0u8; n as usize];
            self.write_at(logical, &zeros)?;
        }
        Ok(logical)
    }

    /// Translate a logical (payload stream) offset to a physical (raw file)
    /// offset.
    pub fn logical_to_physical(&self, logical: u64) -> u64 {
        (logical / PAGE_PAYLOAD) * PAGE_SIZE + logical % PAGE_PAYLOAD
    }

    /// Translate a physical offset back to logical. Fails if the offset
    /// lands inside a page checksum.
    pub fn physical_to_logical(&self, physical: u64) -> Result<u64> {
        let in_page = physical % PAGE_SIZE;
        if in_page >= PAGE_PAYLOAD {
            return Err(Error::BadPacket(format!(
                "physical offset {physical} points into a page checksum"
            )));
        }
        Ok((physical / PAGE_SIZE) * PAGE_PAYLOAD + in_page)
    }

    /// Position the next [`write`](PagedFile::write) at a logical offset.
    pub fn seek(&mut self, logical: u64) {
        self.position = logical;
    }

    /// Write `buf` at the current logical position, advancing it.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_at(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Write `buf` at logical offset `logical`.
    ///
    /// Partial pages are read-modify-written and every touched page's
    /// checksum is recomputed. Pages are always written whole, so the file
    /// stays a multiple of `PAGE_SIZE` bytes long.
    pub fn write_at(&mut self, logical: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::Internal("write to a read-only file".into()));
        }
        let mut logical = logical;
        let mut remaining = buf;
        let mut page = [0u8; PAGE_SIZE as usize];

        while !remaining.is_empty() {
            let page_index = logical / PAGE_PAYLOAD;
            let in_page = (logical % PAGE_PAYLOAD) as usize;
            let n = remaining.len().min(PAGE_PAYLOAD as usize - in_page);
            let page_start = page_index * PAGE_SIZE;

            if page_start < self.physical_eof {
                self.file.seek(SeekFrom::Start(page_start))?;
                self.file.read_exact(&mut page)?;
            } else {
                page.fill(0);
            }

            page[in_page..in_page + n].copy_from_slice(&remaining[..n]);
            let checksum = xxh32(&page[..PAGE_PAYLOAD as usize], 0);
            page[PAGE_PAYLOAD as usize..].copy_from_slice(&checksum.to_le_bytes());

            self.file.seek(SeekFrom::Start(page_start))?;
            self.file.write_all(&page)?;
            self.physical_eof = self.physical_eof.max(page_start + PAGE_SIZE);

            logical += n as u64;
            remaining = &remaining[n..];
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at logical offset `logical`,
    /// verifying the checksum of every page touched.
    pub fn read_at(&mut self, logical: u64, buf: &mut [u8]) -> Result<()> {
        let mut logical = logical;
        let mut filled = 0usize;
        let mut page = [0u8; PAGE_SIZE as usize];

        while filled < buf.len() {
            let page_index = logical / PAGE_PAYLOAD;
            let in_page = (logical % PAGE_PAYLOAD) as usize;
            let n = (buf.len() - filled).min(PAGE_PAYLOAD as usize - in_page);

            self.file.seek(SeekFrom::Start(page_index * PAGE_SIZE))?;
            self.file.read_exact(&mut page)?;

            let stored = u32::from_le_bytes(page[PAGE_PAYLOAD as usize..].try_into().unwrap());
            if xxh32(&page[..PAGE_PAYLOAD as usize], 0) != stored {
                return Err(Error::BadChecksum { page: page_index });
            }

            buf[filled..filled + n].copy_from_slice(&page[in_page..in_page + n]);
            filled += n;
            logical += n as u64;
        }
        Ok(())
    }

    /// Current allocation frontier: the first logical byte not yet handed
    /// out. Used to compute section lengths.
    pub fn unused_logical_start(&self) -> u64 {
        self.unused_logical_start
    }

    /// Raw file length in bytes.
    pub fn physical_length(&self) -> u64 {
        self.physical_eof
    }

    pub fn incr_writer_count(&mut self) {
        self.writer_count += 1;
    }

    pub fn decr_writer_count(&mut self) {
        self.writer_count = self.writer_count.saturating_sub(1);
    }

    pub fn writer_count(&self) -> usize {
        self.writer_count
    }

    /// Logical offset of the compressed-vector section header, 0 if none.
    pub fn section_logical_start(&self) -> u64 {
        self.section_logical_start
    }

    /// Total records in the compressed-vector section.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Record the section location and record count to be patched into the
    /// file header at close. Called by the writer through its node.
    pub(crate) fn set_section_info(&mut self, section_logical_start: u64, record_count: u64) {
        self.section_logical_start = section_logical_start;
        self.record_count = record_count;
    }

    /// Patch the file header with final values and flush. Idempotent; fails
    /// with [`Error::OpenWriter`] while any writer is still open.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.writer_count > 0 {
            return Err(Error::OpenWriter(self.writer_count));
        }

        let header = FileHeader {
            version_major: 1,
            version_minor: 0,
            file_physical_length: self.physical_eof,
            section_logical_start: self.section_logical_start,
            record_count: self.record_count,
        };
        self.write_at(0, &header.to_bytes())?;
        self.file.flush()?;
        self.closed = true;
        debug!(
            physical_length = self.physical_eof,
            section_logical_start = self.section_logical_start,
            record_count = self.record_count,
            "PCVF1 file closed"
        );
        Ok(())
    }
}
