use crate::buffer::SourceBuffer;
use crate::error::Result;
use crate::prototype::FieldType;

/// One per-field output-producing state machine.
///
/// Each encoder owns exactly one bytestream: it consumes values from its
/// bound field buffer and appends compressed bytes to an internal output
/// queue, from which the writer drains packets. Encoders may hold partial
/// words in an internal register between calls; [`register_flush_to_output`]
/// commits that partial state and must be idempotent.
///
/// [`register_flush_to_output`]: Encoder::register_flush_to_output
pub trait Encoder {
    /// Position of this encoder's field in a depth-first traversal of the
    /// prototype. Stable for the lifetime of the encoder.
    fn bytestream_number(&self) -> usize;

    /// Count of records consumed from the caller-side buffer so far.
    fn current_record_index(&self) -> u64;

    /// Consume up to `max` records from the bound field buffer, appending
    /// compressed bytes to the output queue. Returns the number consumed.
    fn process_records(&mut self, max: usize) -> Result<usize>;

    /// Bytes currently queued for flush.
    fn output_available(&self) -> usize;

    /// Dequeue exactly `dst.len()` bytes into `dst`. Asking for more than
    /// [`output_available`](Encoder::output_available) is an internal error.
    fn output_read(&mut self, dst: &mut [u8]) -> Result<()>;

    /// Commit any partial register state into the output queue. Idempotent.
    fn register_flush_to_output(&mut self);
}

/// Picks the appropriate encoder for a field's declared type.
///
/// The writer resolves each buffer's path to a bytestream number and hands
/// the pair to the factory; implementations live outside the core so the
/// writer stays agnostic of concrete encodings.
pub trait EncoderFactory {
    fn make_encoder(
        &self,
        bytestream_number: usize,
        field: &FieldType,
        buffer: SourceBuffer,
    ) -> Result<Box<dyn Encoder>>;
}
