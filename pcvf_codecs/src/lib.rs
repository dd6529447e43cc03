pub mod bitpack;
mod float;
mod integer;
mod string;

pub use float::{decode_floats, FloatEncoder};
pub use integer::{decode_raws, IntegerEncoder, ScaledIntegerEncoder};
pub use string::{decode_strings, StringEncoder};

use pcvf_core::{Encoder, EncoderFactory, FieldType, Result, SourceBuffer};

/// The stock per-field-type encoder selection.
///
/// Picks the encoder matching the type a field declares in the prototype:
/// bit-packed integers, quantized scaled integers, verbatim IEEE floats,
/// length-prefixed strings.
pub struct StandardEncoderFactory;

impl EncoderFactory for StandardEncoderFactory {
    fn make_encoder(
        &self,
        bytestream_number: usize,
        field: &FieldType,
        buffer: SourceBuffer,
    ) -> Result<Box<dyn Encoder>> {
        Ok(match *field {
            FieldType::Integer { min, max } => {
                Box::new(IntegerEncoder::new(bytestream_number, buffer, min, max))
            }
            FieldType::ScaledInteger {
                min,
                max,
                scale,
                offset,
            } => Box::new(ScaledIntegerEncoder::new(
                bytestream_number,
                buffer,
                min,
                max,
                scale,
                offset,
            )),
            FieldType::Float { double } => {
                Box::new(FloatEncoder::new(bytestream_number, buffer, double))
            }
            FieldType::String => Box::new(StringEncoder::new(bytestream_number, buffer)),
        })
    }
}

/// One decoded field column.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedColumn {
    Integer(Vec<i64>),
    Real(Vec<f64>),
    Str(Vec<String>),
}

/// Decode one reassembled bytestream back into `record_count` typed values.
///
/// The inverse of the encoder the factory picks for `field`: scaled
/// integers come back as reals via `raw * scale + offset`.
pub fn decode_bytestream(
    field: &FieldType,
    bytes: &[u8],
    record_count: u64,
) -> Result<DecodedColumn> {
    Ok(match *field {
        FieldType::Integer { min, max } => {
            DecodedColumn::Integer(decode_raws(bytes, min, max, record_count)?)
        }
        FieldType::ScaledInteger {
            min,
            max,
            scale,
            offset,
        } => {
            let raws = decode_raws(bytes, min, max, record_count)?;
            DecodedColumn::Real(raws.iter().map(|&raw| raw as f64 * scale + offset).collect())
        }
        FieldType::Float { double } => {
            DecodedColumn::Real(decode_floats(bytes, double, record_count)?)
        }
        FieldType::String => DecodedColumn::Str(decode_strings(bytes, record_count)?),
    })
}
