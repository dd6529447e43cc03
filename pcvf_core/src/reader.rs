use crate::error::{Error, Result};
use crate::file::PagedFile;
use crate::format::{
    CompressedVectorSectionHeader, DataPacketHeader, IndexEntry, IndexPacketHeader,
    DATA_PACKET_HEADER_SIZE, DATA_PACKET_MAX, INDEX_ENTRY_SIZE, INDEX_PACKET_HEADER_SIZE,
    PACKET_TYPE_DATA, PACKET_TYPE_INDEX, SECTION_HEADER_SIZE,
};

/// Kind of one on-disk packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    Index,
}

/// Location and shape of one packet, for inspection tools.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub kind: PacketKind,
    pub logical_offset: u64,
    pub length: usize,
    pub bytestream_count: usize,
}

/// A fully walked compressed-vector section.
#[derive(Debug)]
pub struct SectionContents {
    pub header: CompressedVectorSectionHeader,
    /// Reassembled compressed bytes, one vector per bytestream, in
    /// bytestream order. Empty when the section holds only zero-record
    /// packets.
    pub bytestreams: Vec<Vec<u8>>,
    pub packets: Vec<PacketInfo>,
    pub data_packet_count: u64,
}

/// Sequential reader for one compressed-vector binary section.
///
/// # Walk sequence
/// 1. Read the 32-byte section header at `section_logical_start`.
/// 2. Walk packets logically from the end of the header: each data packet's
///    per-stream payload slices are appended to per-bytestream accumulators;
///    the single index packet terminates the walk.
/// 3. Cross-check the header's offsets and length against what the walk
///    actually found.
///
/// Typed decoding of the reassembled bytestreams is codec territory and
/// lives outside the core.
pub struct SectionReader<'f> {
    file: &'f mut PagedFile,
    section_logical_start: u64,
}

impl<'f> SectionReader<'f> {
    pub fn new(file: &'f mut PagedFile, section_logical_start: u64) -> Self {
        Self {
            file,
            section_logical_start,
        }
    }

    /// Walk the whole section, validating framing as it goes.
    pub fn read_section(&mut self) -> Result<SectionContents> {
        let mut header_buf = [0u8; SECTION_HEADER_SIZE];
        self.file.read_at(self.section_logical_start, &mut header_buf)?;
        let header = CompressedVectorSectionHeader::from_bytes(&header_buf)?;
        header.verify(self.file.physical_length())?;

        let section_end = self.section_logical_start + header.section_logical_length;
        let mut offset = self.section_logical_start + SECTION_HEADER_SIZE as u64;

        let mut bytestreams: Vec<Vec<u8>> = Vec::new();
        let mut packets = Vec::new();
        let mut data_packet_count = 0u64;
        let mut first_data_logical: Option<u64> = None;
        let mut index_entry: Option<IndexEntry> = None;
        let mut index_logical = 0u64;

        while offset < section_end {
            // Peek the shared 4-byte packet prefix: type, flags, length-1.
            let mut prefix = [0u8; 4];
            self.file.read_at(offset, &mut prefix)?;
            let length = u16::from_le_bytes([prefix[2], prefix[3]]) as usize + 1;
            if length % 4 != 0 {
                return Err(Error::BadPacket(format!(
                    "packet at logical {offset} has length {length}, not a multiple of 4"
                )));
            }
            if length > DATA_PACKET_MAX {
                return Err(Error::BadPacket(format!(
                    "packet at logical {offset} has length {length} > {DATA_PACKET_MAX}"
                )));
            }
            if offset + length as u64 > section_end {
                return Err(Error::BadPacket(format!(
                    "packet at logical {offset} overruns the section end"
                )));
            }

            let mut packet = vec![0u8; length];
            self.file.read_at(offset, &mut packet)?;

            match prefix[0] {
                PACKET_TYPE_DATA => {
                    if index_entry.is_some() {
                        return Err(Error::BadPacket(
                            "data packet found after the index packet".into(),
                        ));
                    }
                    let stream_count =
                        self.read_data_packet(offset, &packet, &mut bytestreams)?;
                    packets.push(PacketInfo {
                        kind: PacketKind::Data,
                        logical_offset: offset,
                        length,
                        bytestream_count: stream_count,
                    });
                    first_data_logical.get_or_insert(offset);
                    data_packet_count += 1;
                }
                PACKET_TYPE_INDEX => {
                    index_entry = Some(self.read_index_packet(offset, &packet)?);
                    index_logical = offset;
                    packets.push(PacketInfo {
                        kind: PacketKind::Index,
                        logical_offset: offset,
                        length,
                        bytestream_count: 0,
                    });
                    offset += length as u64;
                    break;
                }
                tag => {
                    return Err(Error::BadPacket(format!(
                        "unknown packet tag {tag} at logical {offset}"
                    )));
                }
            }
            offset += length as u64;
        }

        // The index packet terminates the section; cross-check everything
        // the writer promised in the section header.
        let entry = index_entry
            .ok_or_else(|| Error::BadPacket("section has no index packet".into()))?;
        if offset != section_end {
            return Err(Error::BadPacket(format!(
                "index packet ends at logical {offset}, section header says {section_end}"
            )));
        }
        if data_packet_count == 0 {
            return Err(Error::BadPacket("section has no data packet".into()));
        }

        let first_data_physical = self
            .file
            .logical_to_physical(first_data_logical.unwrap_or(0));
        if header.data_physical_offset != first_data_physical {
            return Err(Error::BadPacket(format!(
                "section header points at data {} but the first data packet is at {}",
                header.data_physical_offset, first_data_physical
            )));
        }
        if entry.chunk_physical_offset != first_data_physical {
            return Err(Error::BadPacket(format!(
                "index entry points at {} but the first data packet is at {}",
                entry.chunk_physical_offset, first_data_physical
            )));
        }
        let index_physical = self.file.logical_to_physical(index_logical);
        if header.index_physical_offset != index_physical {
            return Err(Error::BadPacket(format!(
                "section header points at index {} but the index packet is at {}",
                header.index_physical_offset, index_physical
            )));
        }

        Ok(SectionContents {
            header,
            bytestreams,
            packets,
            data_packet_count,
        })
    }

    /// Parse one data packet, appending each stream's slice to its
    /// accumulator. Returns the packet's stream count.
    fn read_data_packet(
        &mut self,
        offset: u64,
        packet: &[u8],
        bytestreams: &mut Vec<Vec<u8>>,
    ) -> Result<usize> {
        let header =
            DataPacketHeader::from_bytes(packet[..DATA_PACKET_HEADER_SIZE].try_into().unwrap())?;
        let stream_count = header.bytestream_count as usize;

        // Zero-record packets carry no streams at all.
        if stream_count == 0 {
            return Ok(0);
        }

        if bytestreams.is_empty() {
            bytestreams.resize(stream_count, Vec::new());
        } else if bytestreams.len() != stream_count {
            return Err(Error::BadPacket(format!(
                "packet at logical {offset} has {stream_count} streams, earlier packets had {}",
                bytestreams.len()
            )));
        }

        let lengths_end = DATA_PACKET_HEADER_SIZE + stream_count * 2;
        if lengths_end > packet.len() {
            return Err(Error::BadPacket(format!(
                "packet at logical {offset} too short for {stream_count} stream lengths"
            )));
        }

        let mut at = lengths_end;
        for stream in 0..stream_count {
            let pos = DATA_PACKET_HEADER_SIZE + stream * 2;
            let count = u16::from_le_bytes([packet[pos], packet[pos + 1]]) as usize;
            if at + count > packet.len() {
                return Err(Error::BadPacket(format!(
                    "stream {stream} of packet at logical {offset} overruns the packet"
                )));
            }
            bytestreams[stream].extend_from_slice(&packet[at..at + count]);
            at += count;
        }

        // Whatever follows the streams must be alignment padding only.
        if packet.len() - at >= 4 {
            return Err(Error::BadPacket(format!(
                "packet at logical {offset} has {} trailing bytes, more than padding",
                packet.len() - at
            )));
        }
        Ok(stream_count)
    }

    fn read_index_packet(&mut self, offset: u64, packet: &[u8]) -> Result<IndexEntry> {
        if packet.len() != INDEX_PACKET_HEADER_SIZE + INDEX_ENTRY_SIZE {
            return Err(Error::BadPacket(format!(
                "index packet at logical {offset} has length {}, expected {}",
                packet.len(),
                INDEX_PACKET_HEADER_SIZE + INDEX_ENTRY_SIZE
            )));
        }
        let header =
            IndexPacketHeader::from_bytes(packet[..INDEX_PACKET_HEADER_SIZE].try_into().unwrap())?;
        if header.entry_count != 1 {
            return Err(Error::BadPacket(format!(
                "index packet at logical {offset} has {} entries, expected 1",
                header.entry_count
            )));
        }
        Ok(IndexEntry::from_bytes(
            packet[INDEX_PACKET_HEADER_SIZE..].try_into().unwrap(),
        ))
    }
}
