use std::collections::VecDeque;

use pcvf_core::{Encoder, Error, Result, SourceBuffer};

use crate::bitpack::read_queue;

/// Encoder for `String` fields: each value is a ULEB128 byte-length prefix
/// followed by the UTF-8 bytes.
pub struct StringEncoder {
    bytestream_number: usize,
    buffer: SourceBuffer,
    out: VecDeque<u8>,
    current_record_index: u64,
}

impl StringEncoder {
    pub fn new(bytestream_number: usize, buffer: SourceBuffer) -> Self {
        Self {
            bytestream_number,
            buffer,
            out: VecDeque::new(),
            current_record_index: 0,
        }
    }
}

impl Encoder for StringEncoder {
    fn bytestream_number(&self) -> usize {
        self.bytestream_number
    }

    fn current_record_index(&self) -> u64 {
        self.current_record_index
    }

    fn process_records(&mut self, max: usize) -> Result<usize> {
        for taken in 0..max {
            let Some(value) = self.buffer.next_str() else {
                return Err(Error::Internal(format!(
                    "field buffer '{}' exhausted after {taken} of {max} records",
                    self.buffer.path()
                )));
            };
            write_uleb128(&mut self.out, value.len() as u64);
            self.out.extend(value.into_bytes());
            self.current_record_index += 1;
        }
        Ok(max)
    }

    fn output_available(&self) -> usize {
        self.out.len()
    }

    fn output_read(&mut self, dst: &mut [u8]) -> Result<()> {
        read_queue(&mut self.out, dst)
    }

    // Strings are byte-aligned; there is never partial register state.
    fn register_flush_to_output(&mut self) {}
}

/// Append `value` as ULEB128: 7 bits per byte, least-significant first,
/// high bit set on every byte but the last.
pub fn write_uleb128(out: &mut VecDeque<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push_back(byte);
            return;
        }
        out.push_back(byte | 0x80);
    }
}

/// Read one ULEB128 value from `bytes` starting at `*at`, advancing it.
pub fn read_uleb128(bytes: &[u8], at: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*at)
            .ok_or_else(|| Error::BadPacket("bytestream exhausted inside a length prefix".into()))?;
        *at += 1;
        if shift >= 64 {
            return Err(Error::BadPacket("length prefix longer than 64 bits".into()));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Decode `record_count` length-prefixed strings from `bytes`.
pub fn decode_strings(bytes: &[u8], record_count: u64) -> Result<Vec<String>> {
    let mut at = 0usize;
    let mut values = Vec::with_capacity(record_count as usize);
    for _ in 0..record_count {
        let len = read_uleb128(bytes, &mut at)? as usize;
        let end = at
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| Error::BadPacket("string runs past the end of its bytestream".into()))?;
        let value = std::str::from_utf8(&bytes[at..end])
            .map_err(|e| Error::BadPacket(format!("string is not valid UTF-8: {e}")))?;
        values.push(value.to_string());
        at = end;
    }
    Ok(values)
}
