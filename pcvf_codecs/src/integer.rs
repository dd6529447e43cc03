use pcvf_core::{Encoder, Error, Result, SourceBuffer};

use crate::bitpack::{bit_width, BitPacker, BitUnpacker};

/// Bit-packing encoder for `Integer { min, max }` fields.
///
/// Each value is checked against the declared range, biased by `-min`, and
/// packed with the minimal bit width for `max - min`. A constant field
/// (`min == max`) uses zero bits and produces an empty bytestream.
pub struct IntegerEncoder {
    bytestream_number: usize,
    buffer: SourceBuffer,
    min: i64,
    max: i64,
    packer: BitPacker,
    current_record_index: u64,
}

impl IntegerEncoder {
    pub fn new(bytestream_number: usize, buffer: SourceBuffer, min: i64, max: i64) -> Self {
        let width = bit_width(max.wrapping_sub(min) as u64);
        Self {
            bytestream_number,
            buffer,
            min,
            max,
            packer: BitPacker::new(width),
            current_record_index: 0,
        }
    }
}

impl Encoder for IntegerEncoder {
    fn bytestream_number(&self) -> usize {
        self.bytestream_number
    }

    fn current_record_index(&self) -> u64 {
        self.current_record_index
    }

    fn process_records(&mut self, max: usize) -> Result<usize> {
        for taken in 0..max {
            let Some(value) = self.buffer.next_integer() else {
                return Err(Error::Internal(format!(
                    "field buffer '{}' exhausted after {taken} of {max} records",
                    self.buffer.path()
                )));
            };
            if value < self.min || value > self.max {
                return Err(Error::ValueOutOfRange(format!(
                    "'{}' value {value} outside [{}, {}]",
                    self.buffer.path(),
                    self.min,
                    self.max
                )));
            }
            self.packer.push(value.wrapping_sub(self.min) as u64);
            self.current_record_index += 1;
        }
        Ok(max)
    }

    fn output_available(&self) -> usize {
        self.packer.available()
    }

    fn output_read(&mut self, dst: &mut [u8]) -> Result<()> {
        self.packer.read(dst)
    }

    fn register_flush_to_output(&mut self) {
        self.packer.flush();
    }
}

/// Bit-packing encoder for `ScaledInteger` fields: quantizes each real
/// value to `raw = round((value - offset) / scale)` and packs the raw like
/// [`IntegerEncoder`] does.
pub struct ScaledIntegerEncoder {
    bytestream_number: usize,
    buffer: SourceBuffer,
    min: i64,
    max: i64,
    scale: f64,
    offset: f64,
    packer: BitPacker,
    current_record_index: u64,
}

impl ScaledIntegerEncoder {
    pub fn new(
        bytestream_number: usize,
        buffer: SourceBuffer,
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    ) -> Self {
        let width = bit_width(max.wrapping_sub(min) as u64);
        Self {
            bytestream_number,
            buffer,
            min,
            max,
            scale,
            offset,
            packer: BitPacker::new(width),
            current_record_index: 0,
        }
    }
}

impl Encoder for ScaledIntegerEncoder {
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
            let raw = ((value - self.offset) / self.scale).round();
            if !raw.is_finite() || raw < self.min as f64 || raw > self.max as f64 {
                return Err(Error::ValueOutOfRange(format!(
                    "'{}' value {value} quantizes to {raw}, outside [{}, {}]",
                    self.buffer.path(),
                    self.min,
                    self.max
                )));
            }
            self.packer
                .push((raw as i64).wrapping_sub(self.min) as u64);
            self.current_record_index += 1;
        }
        Ok(max)
    }

    fn output_available(&self) -> usize {
        self.packer.available()
    }

    fn output_read(&mut self, dst: &mut [u8]) -> Result<()> {
        self.packer.read(dst)
    }

    fn register_flush_to_output(&mut self) {
        self.packer.flush();
    }
}

/// Decode `record_count` bit-packed raws from `bytes`.
pub fn decode_raws(bytes: &[u8], min: i64, max: i64, record_count: u64) -> Result<Vec<i64>> {
    let width = bit_width(max.wrapping_sub(min) as u64);
    let mut unpacker = BitUnpacker::new(bytes);
    let mut values = Vec::with_capacity(record_count as usize);
    for _ in 0..record_count {
        let raw = unpacker.read(width)?;
        values.push(min.wrapping_add(raw as i64));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_biased_range() {
        let buffer = SourceBuffer::integers("i", vec![-5, -1, 0, 3, 10]);
        let mut encoder = IntegerEncoder::new(0, buffer, -5, 10);
        encoder.process_records(5).unwrap();
        encoder.register_flush_to_output();

        let mut bytes = vec![0u8; encoder.output_available()];
        encoder.output_read(&mut bytes).unwrap();

        assert_eq!(decode_raws(&bytes, -5, 10, 5).unwrap(), vec![-5, -1, 0, 3, 10]);
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let buffer = SourceBuffer::integers("i", vec![11]);
        let mut encoder = IntegerEncoder::new(0, buffer, 0, 10);
        assert!(matches!(
            encoder.process_records(1),
            Err(Error::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn scaled_quantization_roundtrip() {
        let buffer = SourceBuffer::reals("x", vec![0.0, 0.25, 1.5, -2.75]);
        let mut encoder = ScaledIntegerEncoder::new(0, buffer, -20, 20, 0.25, 0.0);
        encoder.process_records(4).unwrap();
        encoder.register_flush_to_output();

        let mut bytes = vec![0u8; encoder.output_available()];
        encoder.output_read(&mut bytes).unwrap();

        let raws = decode_raws(&bytes, -20, 20, 4).unwrap();
        let reals: Vec<f64> = raws.iter().map(|&r| r as f64 * 0.25).collect();
        assert_eq!(reals, vec![0.0, 0.25, 1.5, -2.75]);
    }
}
