use std::collections::VecDeque;

use pcvf_core::{Encoder, Error, Result, SourceBuffer};

use crate::bitpack::read_queue;

/// Encoder for `Float` fields: the IEEE-754 bits of each value, appended
/// verbatim in little-endian order (4 bytes per record, 8 when `double`).
pub struct FloatEncoder {
    bytestream_number: usize,
    buffer: SourceBuffer,
    double: bool,
    out: VecDeque<u8>,
    current_record_index: u64,
}

impl FloatEncoder {
    pub fn new(bytestream_number: usize, buffer: SourceBuffer, double: bool) -> Self {
        Self {
            bytestream_number,
            buffer,
            double,
            out: VecDeque::new(),
            current_record_index: 0,
        }
    }
}

impl Encoder for FloatEncoder {
    fn bytestream_number(&self) -> usize {
        self.bytestream_number
    }

    fn current_record_index(&self) -> u64 {
        self.current_record_index
    }

    fn process_records(&mut self, max: usize) -> Result<usize> {
        for taken in 0..max {
            let Some(value) = self.buffer.next_real() else {
                return Err(Error::Internal(format!(
                    "field buffer '{}' exhausted after {taken} of {max} records",
                    self.buffer.path()
                )));
            };
            if self.double {
                self.out.extend(value.to_le_bytes());
            } else {
                self.out.extend((value as f32).to_le_bytes());
            }
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

    // Floats are byte-aligned; there is never partial register state.
    fn register_flush_to_output(&mut self) {}
}

/// Decode `record_count` floats from `bytes`.
pub fn decode_floats(bytes: &[u8], double: bool, record_count: u64) -> Result<Vec<f64>> {
    let width = if double { 8 } else { 4 };
    let needed = record_count as usize * width;
    if bytes.len() < needed {
        return Err(Error::BadPacket(format!(
            "float bytestream holds {} bytes, {needed} needed for {record_count} records",
            bytes.len()
        )));
    }
    let mut values = Vec::with_capacity(record_count as usize);
    for chunk in bytes[..needed].chunks_exact(width) {
        if double {
            values.push(f64::from_le_bytes(chunk.try_into().unwrap()));
        } else {
            values.push(f32::from_le_bytes(chunk.try_into().unwrap()) as f64);
        }
    }
    Ok(values)
}
