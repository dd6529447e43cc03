use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::buffer::SourceBuffer;
use crate::encoder::{Encoder, EncoderFactory};
use crate::error::{Error, Result};
use crate::format::{
    CompressedVectorSectionHeader, DataPacketHeader, IndexEntry, IndexPacketHeader,
    DATA_PACKET_HEADER_SIZE, DATA_PACKET_MAX, INDEX_ENTRY_SIZE, INDEX_PACKET_HEADER_SIZE,
    SECTION_HEADER_SIZE, TARGET_PACKET_SIZE,
};
use crate::node::CompressedVectorNode;
use crate::prototype::PathResolution;

/// Records processed per encoder per pass of the write loop. Bounds memory
/// growth between packet-size checks; any positive bound suffices.
const RECORDS_PER_PASS: u64 = 50;

/// Streaming writer for one compressed-vector binary section.
///
/// # Write contract
/// Fill the bound field buffers, call [`write`] with the record count to
/// append, refill, repeat. Call [`close`] to drain the encoders, emit the
/// mandatory index packet, and patch the section header. Dropping an open
/// writer closes it, logging and swallowing any error; call [`close`]
/// explicitly to observe failures.
///
/// # Section layout written
/// ```text
/// [SECTION HEADER: 32 bytes placeholder]
/// [DATA PACKET 0] [DATA PACKET 1] ...     ← ≤ 64 KB each, multiple of 4
/// [INDEX PACKET: 32 bytes]                ← exactly one, points at packet 0
/// ← seek back, overwrite section header with real values
/// ```
///
/// Each data packet interleaves all bytestreams in ascending bytestream
/// order; the per-stream share of a packet is chosen so inter-stream
/// synchronization stays tight enough for a streaming reader holding two
/// packets.
///
/// [`write`]: CompressedVectorWriter::write
/// [`close`]: CompressedVectorWriter::close
pub struct CompressedVectorWriter {
    node: Rc<CompressedVectorNode>,
    buffers: Vec<SourceBuffer>,
    /// Ordered by bytestream number, not by caller buffer order.
    encoders: Vec<Box<dyn Encoder>>,
    is_open: bool,
    section_header_logical_start: u64,
    section_logical_length: u64,
    data_physical_offset: u64,
    top_index_physical_offset: u64,
    record_count: u64,
    data_packets_count: u64,
    index_packets_count: u64,
    /// Fixed scratch region for packet assembly, reused for every packet.
    packet_scratch: Box<[u8; DATA_PACKET_MAX]>,
}

impl CompressedVectorWriter {
    /// Open a writer for `node`, binding one encoder per field buffer.
    ///
    /// The buffer set must cover the node's prototype exactly (every
    /// terminal field once). The section header slot is reserved here; the
    /// node's section can be written only once.
    pub fn new(
        node: Rc<CompressedVectorNode>,
        buffers: Vec<SourceBuffer>,
        factory: &dyn EncoderFactory,
    ) -> Result<Self> {
        if node.is_written() {
            return Err(Error::BadApiArgument(
                "compressed vector has already been written".into(),
            ));
        }
        if buffers.is_empty() {
            return Err(Error::BadApiArgument("empty buffer set".into()));
        }
        node.prototype().check_buffers(&buffers)?;

        let mut encoders = Vec::with_capacity(buffers.len());
        for buf in &buffers {
            let (number, field) = match node.prototype().resolve(buf.path()) {
                PathResolution::Terminal(number, field) => (number, field.clone()),
                _ => {
                    return Err(Error::Internal(format!(
                        "path '{}' did not resolve to a terminal field",
                        buf.path()
                    )));
                }
            };
            encoders.push(factory.make_encoder(number, &field, buf.clone())?);
        }

        // Streams must be ordered by bytestream number, not by the order the
        // caller supplied the buffers, so sort.
        encoders.sort_by_key(|e| e.bytestream_number());

        #[cfg(feature = "deep-validation")]
        for (i, encoder) in encoders.iter().enumerate() {
            if encoder.bytestream_number() != i {
                return Err(Error::Internal(format!(
                    "bytestream index {i} holds stream number {}",
                    encoder.bytestream_number()
                )));
            }
        }

        // Reserve the section header slot; real values are patched in at
        // close. Zero-extend now since the slot is written much later.
        let section_header_logical_start = node
            .file()
            .borrow_mut()
            .allocate_space(SECTION_HEADER_SIZE as u64, true)?;

        node.file().borrow_mut().incr_writer_count();

        Ok(Self {
            node,
            buffers,
            encoders,
            is_open: true,
            section_header_logical_start,
            section_logical_length: 0,
            data_physical_offset: 0,
            top_index_physical_offset: 0,
            record_count: 0,
            data_packets_count: 0,
            index_packets_count: 0,
            packet_scratch: Box::new([0u8; DATA_PACKET_MAX]),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Records ingested so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn node(&self) -> &Rc<CompressedVectorNode> {
        &self.node
    }

    /// Re-bind the writer to a new buffer set.
    ///
    /// The new set must have the same length as the current one and each
    /// buffer must be pairwise-compatible with its predecessor (same path,
    /// same value kind). The bound encoders then observe the new contents.
    pub fn set_buffers(&mut self, buffers: &[SourceBuffer]) -> Result<()> {
        self.check_writer_open()?;
        if buffers.len() != self.buffers.len() {
            return Err(Error::BuffersNotCompatible(format!(
                "old size {} != new size {}",
                self.buffers.len(),
                buffers.len()
            )));
        }
        for (old, new) in self.buffers.iter().zip(buffers) {
            old.check_compatible(new)?;
        }
        for (old, new) in self.buffers.iter().zip(buffers) {
            old.adopt(new)?;
        }
        Ok(())
    }

    /// Re-bind to `buffers`, then append `record_count` records.
    pub fn write_with(&mut self, buffers: &[SourceBuffer], record_count: u64) -> Result<()> {
        self.set_buffers(buffers)?;
        self.write(record_count)
    }

    /// Append `record_count` records from the bound field buffers.
    ///
    /// `write(0)` emits one zero-record data packet, which guarantees the
    /// section contains at least one data packet for its header to point
    /// at. Partial bytes may remain queued in the encoders afterwards; they
    /// are drained only at [`close`](CompressedVectorWriter::close).
    pub fn write(&mut self, record_count: u64) -> Result<()> {
        self.check_writer_open()?;

        if record_count == 0 {
            self.packet_write_zero_records()?;
            return Ok(());
        }

        for buf in &self.buffers {
            if record_count > buf.capacity() as u64 {
                return Err(Error::BadApiArgument(format!(
                    "requested {record_count} records but buffer '{}' holds {}",
                    buf.path(),
                    buf.capacity()
                )));
            }
        }

        // Start reading every column from its beginning.
        for buf in &self.buffers {
            buf.rewind();
        }

        let end_record_index = self.record_count + record_count;
        loop {
            let total_remaining: u64 = self
                .encoders
                .iter()
                .map(|e| end_record_index - e.current_record_index())
                .sum();
            if total_remaining == 0 {
                break;
            }

            // Once the would-be packet is full enough, emit it and restart
            // the loop: the packet size may still be nonzero after the write
            // if the streams held more than one packet's worth.
            if self.current_packet_size() >= TARGET_PACKET_SIZE {
                self.packet_write()?;
                continue;
            }

            for encoder in &mut self.encoders {
                let current = encoder.current_record_index();
                if current < end_record_index {
                    let n = (end_record_index - current).min(RECORDS_PER_PASS);
                    encoder.process_records(n as usize)?;
                }
            }
        }

        self.record_count += record_count;
        Ok(())
    }

    /// Drain the encoders, emit the single index packet, patch the section
    /// header, and record the section location on the node. Idempotent:
    /// a second call returns without touching the file.
    pub fn close(&mut self) -> Result<()> {
        // Before anything that can fail, release the file's writer slot.
        self.node.file().borrow_mut().decr_writer_count();

        if !self.is_open {
            return Ok(());
        }
        // Mark closed before any I/O, so a failure that unwinds through the
        // drop guard does not re-enter.
        self.is_open = false;

        // Write out all queued stream bytes plus whatever sits in encoder
        // registers. Done when a flush leaves nothing available.
        self.flush();
        while self.total_output_available() > 0 {
            self.packet_write()?;
            self.flush();
        }

        // A section always carries at least one data packet, so its header
        // has a first packet to point at.
        if self.data_packets_count == 0 {
            self.packet_write_zero_records()?;
        }

        self.packet_write_index()?;

        let header = {
            let mut file = self.node.file().borrow_mut();
            self.section_logical_length =
                file.unused_logical_start() - self.section_header_logical_start;

            let header = CompressedVectorSectionHeader {
                section_logical_length: self.section_logical_length,
                data_physical_offset: self.data_physical_offset,
                index_physical_offset: self.top_index_physical_offset,
            };
            header.verify(file.physical_length())?;

            // Patch the header into the slot reserved at construction.
            file.seek(self.section_header_logical_start);
            file.write(&header.to_bytes())?;
            header
        };
        debug!(
            section_logical_length = header.section_logical_length,
            data_physical_offset = header.data_physical_offset,
            index_physical_offset = header.index_physical_offset,
            record_count = self.record_count,
            data_packets = self.data_packets_count,
            "compressed vector section closed"
        );

        self.node
            .mark_written(self.record_count, self.section_header_logical_start);

        // Release the encoders and their buffer bindings.
        self.encoders.clear();
        Ok(())
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn check_writer_open(&self) -> Result<()> {
        if !self.is_open {
            return Err(Error::WriterNotOpen);
        }
        Ok(())
    }

    /// Commit partial register state in every encoder. Never does I/O.
    fn flush(&mut self) {
        for encoder in &mut self.encoders {
            encoder.register_flush_to_output();
        }
    }

    fn total_output_available(&self) -> usize {
        self.encoders.iter().map(|e| e.output_available()).sum()
    }

    /// Size the next data packet would have if emitted now.
    fn current_packet_size(&self) -> usize {
        DATA_PACKET_HEADER_SIZE + self.encoders.len() * 2 + self.total_output_available()
    }

    /// Assemble and write one data packet from the queued stream bytes.
    ///
    /// Returns the packet's physical offset, or 0 without writing if no
    /// stream has output. If the queues hold more than one packet's worth,
    /// each stream contributes proportionally to its share so the streams
    /// stay loosely synchronized.
    fn packet_write(&mut self) -> Result<u64> {
        let total_output = self.total_output_available();
        if total_output == 0 {
            return Ok(0);
        }

        let stream_count = self.encoders.len();
        let max_payload = DATA_PACKET_MAX - DATA_PACKET_HEADER_SIZE - stream_count * 2;

        let mut counts = vec![0usize; stream_count];
        if total_output < max_payload {
            // Everything fits in one packet; drain fully.
            for (count, encoder) in counts.iter_mut().zip(&self.encoders) {
                *count = encoder.output_available();
            }
        } else {
            // Too much for one packet: send proportional shares. The -1
            // leaves slack for rounding so the total stays under the cap.
            let fraction = (max_payload - 1) as f64 / total_output as f64;
            for (count, encoder) in counts.iter_mut().zip(&self.encoders) {
                *count = (fraction * encoder.output_available() as f64).floor() as usize;
            }
        }

        let total_count: usize = counts.iter().sum();
        if total_count > max_payload {
            return Err(Error::Internal(format!(
                "stream byte total {total_count} exceeds packet payload cap {max_payload}"
            )));
        }

        // Lay the packet out in the scratch buffer: header placeholder,
        // per-stream byte counts, then the stream payloads in bytestream
        // order.
        let scratch = &mut self.packet_scratch[..];
        scratch[..DATA_PACKET_HEADER_SIZE].fill(0);
        let mut at = DATA_PACKET_HEADER_SIZE;
        for &count in &counts {
            scratch[at..at + 2].copy_from_slice(&(count as u16).to_le_bytes());
            at += 2;
        }
        for (encoder, &count) in self.encoders.iter_mut().zip(&counts) {
            if at + count > DATA_PACKET_MAX {
                return Err(Error::Internal(format!(
                    "stream of {count} bytes overruns the packet scratch at {at}"
                )));
            }
            encoder.output_read(&mut scratch[at..at + count])?;
            at += count;
        }

        let mut packet_length = at;
        if packet_length != DATA_PACKET_HEADER_SIZE + stream_count * 2 + total_count {
            return Err(Error::Internal(format!(
                "assembled packet length {packet_length} disagrees with {} header + {} stream lengths + {total_count} payload",
                DATA_PACKET_HEADER_SIZE,
                stream_count * 2
            )));
        }

        // Packet length must be a multiple of 4; pad with zero bytes.
        while packet_length % 4 != 0 {
            if packet_length >= DATA_PACKET_MAX {
                return Err(Error::Internal("padding overruns the packet scratch".into()));
            }
            scratch[packet_length] = 0;
            packet_length += 1;
        }

        let header = DataPacketHeader {
            packet_flags: 0,
            packet_logical_length_minus_1: (packet_length - 1) as u16,
            bytestream_count: stream_count as u16,
        };
        scratch[..DATA_PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        let physical_offset = self.commit_packet(packet_length)?;
        trace!(
            packet_length,
            stream_count,
            physical_offset,
            "data packet written"
        );
        Ok(physical_offset)
    }

    /// Write a header-only data packet (plus alignment padding).
    fn packet_write_zero_records(&mut self) -> Result<()> {
        let mut packet_length = DATA_PACKET_HEADER_SIZE;
        while packet_length % 4 != 0 {
            self.packet_scratch[packet_length] = 0;
            packet_length += 1;
        }
        let header = DataPacketHeader {
            packet_flags: 0,
            packet_logical_length_minus_1: (packet_length - 1) as u16,
            bytestream_count: 0,
        };
        self.packet_scratch[..DATA_PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        self.commit_packet(packet_length)?;
        trace!(packet_length, "zero-record data packet written");
        Ok(())
    }

    /// Allocate file space for the assembled packet, write it, and track
    /// the first data packet's physical offset for the section header.
    fn commit_packet(&mut self, packet_length: usize) -> Result<u64> {
        let mut file = self.node.file().borrow_mut();
        let logical_offset = file.allocate_space(packet_length as u64, false)?;
        let physical_offset = file.logical_to_physical(logical_offset);
        file.seek(logical_offset);
        file.write(&self.packet_scratch[..packet_length])?;
        drop(file);

        if self.data_packets_count == 0 {
            self.data_physical_offset = physical_offset;
        }
        self.data_packets_count += 1;
        Ok(physical_offset)
    }

    /// Write the single index packet: one entry pointing at the first data
    /// packet.
    fn packet_write_index(&mut self) -> Result<()> {
        if self.index_packets_count != 0 {
            return Err(Error::Internal(format!(
                "section already has {} index packet(s)",
                self.index_packets_count
            )));
        }

        let packet_length = INDEX_PACKET_HEADER_SIZE + INDEX_ENTRY_SIZE;
        let header = IndexPacketHeader {
            packet_flags: 0,
            packet_logical_length_minus_1: (packet_length - 1) as u16,
            entry_count: 1,
            index_level: 0,
        };
        let entry = IndexEntry {
            chunk_record_number: 0,
            chunk_physical_offset: self.data_physical_offset,
        };

        let mut packet = [0u8; INDEX_PACKET_HEADER_SIZE + INDEX_ENTRY_SIZE];
        packet[..INDEX_PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        packet[INDEX_PACKET_HEADER_SIZE..].copy_from_slice(&entry.to_bytes());

        let mut file = self.node.file().borrow_mut();
        let logical_offset = file.allocate_space(packet_length as u64, false)?;
        self.top_index_physical_offset = file.logical_to_physical(logical_offset);
        file.seek(logical_offset);
        file.write(&packet)?;
        drop(file);

        self.index_packets_count += 1;
        Ok(())
    }
}

impl Drop for CompressedVectorWriter {
    fn drop(&mut self) {
        if self.is_open {
            if let Err(err) = self.close() {
                error!(%err, "error while closing compressed vector writer on drop");
            }
        }
    }
}
