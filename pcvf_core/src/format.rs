use crate::error::{Error, Result};

/// Magic bytes for PCVF version 1 files.
/// 8 bytes: "PCVF1\n" followed by 2 null bytes.
pub const MAGIC: &[u8; 8] = b"PCVF1\n\x00\x00";

/// Fixed size of the PCVF1 file header in bytes.
///   magic[8] + version_major:u16 + version_minor:u16 + reserved:u32
///   + file_physical_length:u64 + section_logical_start:u64
///   + record_count:u64 + reserved[8]
///   = 8 + 2 + 2 + 4 + 8 + 8 + 8 + 8 = 48
pub const FILE_HEADER_SIZE: u64 = 48;

/// Maximum size of a data packet, including header, stream lengths and
/// padding. Nothing larger is ever written.
pub const DATA_PACKET_MAX: usize = 65_536;

/// Fill threshold that triggers packet emission during a write. Once the
/// would-be packet reaches 75% of `DATA_PACKET_MAX` it is flushed: packets
/// stay full enough to be efficient, and a streaming reader with a
/// two-packet working set can still decode any single record.
pub const TARGET_PACKET_SIZE: usize = DATA_PACKET_MAX * 3 / 4;

/// Size of the fixed part of a data packet:
///   packet_type:u8 + packet_flags:u8 + packet_logical_length_minus_1:u16
///   + bytestream_count:u16 = 6
/// Immediately followed by `bytestream_count` u16 LE per-stream byte counts.
pub const DATA_PACKET_HEADER_SIZE: usize = 6;

/// Size of an index packet header:
///   packet_type:u8 + packet_flags:u8 + packet_logical_length_minus_1:u16
///   + entry_count:u16 + index_level:u8 + reserved[9] = 16
pub const INDEX_PACKET_HEADER_SIZE: usize = 16;

/// Size of one index entry: chunk_record_number:u64 + chunk_physical_offset:u64.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// Size of a compressed-vector section header:
///   section_id:u8 + reserved[7] + section_logical_length:u64
///   + data_physical_offset:u64 + index_physical_offset:u64 = 32
pub const SECTION_HEADER_SIZE: usize = 32;

// ── Tags ───────────────────────────────────────────────────────────────────

pub const PACKET_TYPE_INDEX: u8 = 0;
pub const PACKET_TYPE_DATA: u8 = 1;

pub const SECTION_ID_COMPRESSED_VECTOR: u8 = 1;

// ── File header ────────────────────────────────────────────────────────────

/// Decoded representation of the 48-byte PCVF1 file header.
///
/// Written as a zeroed placeholder at file creation and patched with real
/// values when the file is closed. `section_logical_start == 0` means the
/// file contains no compressed-vector section.
#[derive(Debug, Clone, Default)]
pub struct FileHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub file_physical_length: u64,
    pub section_logical_start: u64,
    pub record_count: u64,
}

impl FileHeader {
    /// Serialize to exactly `FILE_HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version_major.to_le_bytes());
        buf[10..12].copy_from_slice(&self.version_minor.to_le_bytes());
        // reserved u32 stays zero
        buf[16..24].copy_from_slice(&self.file_physical_length.to_le_bytes());
        buf[24..32].copy_from_slice(&self.section_logical_start.to_le_bytes());
        buf[32..40].copy_from_slice(&self.record_count.to_le_bytes());
        // reserved[8] stays zero
        buf
    }

    /// Deserialize from `FILE_HEADER_SIZE` bytes, checking magic and version.
    pub fn from_bytes(buf: &[u8; FILE_HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[..8] != MAGIC {
            return Err(Error::BadFileHeader(
                "invalid magic bytes, not a PCVF1 file".into(),
            ));
        }
        let version_major = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        if version_major != 1 {
            return Err(Error::BadFileHeader(format!(
                "unsupported PCVF version {version_major} (only version 1 is supported)"
            )));
        }
        Ok(Self {
            version_major,
            version_minor: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            file_physical_length: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            section_logical_start: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            record_count: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        })
    }
}

// ── Section header ─────────────────────────────────────────────────────────

/// Header of a compressed-vector binary section.
///
/// The slot for this header is reserved when a writer is constructed and the
/// real values are patched in when the writer closes.
/// `section_logical_length` spans from the header start to the end of the
/// index packet; `data_physical_offset` locates the first data packet and
/// `index_physical_offset` the single index packet.
#[derive(Debug, Clone, Default)]
pub struct CompressedVectorSectionHeader {
    pub section_logical_length: u64,
    pub data_physical_offset: u64,
    pub index_physical_offset: u64,
}

impl CompressedVectorSectionHeader {
    /// Serialize to exactly `SECTION_HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; SECTION_HEADER_SIZE] {
        let mut buf = [0u8; SECTION_HEADER_SIZE];
        buf[0] = SECTION_ID_COMPRESSED_VECTOR;
        // reserved[7] stays zero
        buf[8..16].copy_from_slice(&self.section_logical_length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_physical_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_physical_offset.to_le_bytes());
        buf
    }

    /// Deserialize from `SECTION_HEADER_SIZE` bytes, checking the section tag.
    pub fn from_bytes(buf: &[u8; SECTION_HEADER_SIZE]) -> Result<Self> {
        if buf[0] != SECTION_ID_COMPRESSED_VECTOR {
            return Err(Error::BadPacket(format!(
                "expected compressed-vector section tag {SECTION_ID_COMPRESSED_VECTOR}, got {}",
                buf[0]
            )));
        }
        Ok(Self {
            section_logical_length: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            data_physical_offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            index_physical_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }

    /// Sanity-check the header against the physical length of the file it
    /// is about to be written into (or was read from).
    pub fn verify(&self, file_physical_length: u64) -> Result<()> {
        if self.section_logical_length < SECTION_HEADER_SIZE as u64 {
            return Err(Error::Internal(format!(
                "section logical length {} smaller than the section header itself",
                self.section_logical_length
            )));
        }
        if self.data_physical_offset >= file_physical_length {
            return Err(Error::Internal(format!(
                "data physical offset {} beyond file end {}",
                self.data_physical_offset, file_physical_length
            )));
        }
        if self.index_physical_offset >= file_physical_length {
            return Err(Error::Internal(format!(
                "index physical offset {} beyond file end {}",
                self.index_physical_offset, file_physical_length
            )));
        }
        Ok(())
    }
}

// ── Data packet header ─────────────────────────────────────────────────────

/// Fixed 6-byte header of a data packet.
///
/// On disk it is immediately followed by `bytestream_count` u16 LE values
/// giving the byte count each stream contributed to this packet, then the
/// stream payloads in ascending bytestream order, then zero padding to a
/// multiple of four bytes.
#[derive(Debug, Clone, Default)]
pub struct DataPacketHeader {
    pub packet_flags: u8,
    pub packet_logical_length_minus_1: u16,
    pub bytestream_count: u16,
}

impl DataPacketHeader {
    pub fn to_bytes(&self) -> [u8; DATA_PACKET_HEADER_SIZE] {
        let mut buf = [0u8; DATA_PACKET_HEADER_SIZE];
        buf[0] = PACKET_TYPE_DATA;
        buf[1] = self.packet_flags;
        buf[2..4].copy_from_slice(&self.packet_logical_length_minus_1.to_le_bytes());
        buf[4..6].copy_from_slice(&self.bytestream_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; DATA_PACKET_HEADER_SIZE]) -> Result<Self> {
        if buf[0] != PACKET_TYPE_DATA {
            return Err(Error::BadPacket(format!(
                "expected data packet tag {PACKET_TYPE_DATA}, got {}",
                buf[0]
            )));
        }
        Ok(Self {
            packet_flags: buf[1],
            packet_logical_length_minus_1: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            bytestream_count: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
        })
    }
}

// ── Index packet ───────────────────────────────────────────────────────────

/// Fixed 16-byte header of an index packet.
#[derive(Debug, Clone, Default)]
pub struct IndexPacketHeader {
    pub packet_flags: u8,
    pub packet_logical_length_minus_1: u16,
    pub entry_count: u16,
    pub index_level: u8,
}

impl IndexPacketHeader {
    pub fn to_bytes(&self) -> [u8; INDEX_PACKET_HEADER_SIZE] {
        let mut buf = [0u8; INDEX_PACKET_HEADER_SIZE];
        buf[0] = PACKET_TYPE_INDEX;
        buf[1] = self.packet_flags;
        buf[2..4].copy_from_slice(&self.packet_logical_length_minus_1.to_le_bytes());
        buf[4..6].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[6] = self.index_level;
        // reserved[9] stays zero
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_PACKET_HEADER_SIZE]) -> Result<Self> {
        if buf[0] != PACKET_TYPE_INDEX {
            return Err(Error::BadPacket(format!(
                "expected index packet tag {PACKET_TYPE_INDEX}, got {}",
                buf[0]
            )));
        }
        Ok(Self {
            packet_flags: buf[1],
            packet_logical_length_minus_1: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            entry_count: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            index_level: buf[6],
        })
    }
}

/// One entry in an index packet — locates a chunk of data packets.
#[derive(Debug, Clone, Default)]
pub struct IndexEntry {
    /// Record number of the first record in the chunk.
    pub chunk_record_number: u64,
    /// Physical offset of the first data packet of the chunk.
    pub chunk_physical_offset: u64,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.chunk_record_number.to_le_bytes());
        buf[8..16].copy_from_slice(&self.chunk_physical_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE]) -> Self {
        Self {
            chunk_record_number: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            chunk_physical_offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}
