use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the PCVF core.
///
/// `Internal` variants indicate implementation bugs (invariant violations),
/// not user errors; everything else is a caller-visible condition.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad API argument: {0}")]
    BadApiArgument(String),

    #[error("buffers not compatible: {0}")]
    BuffersNotCompatible(String),

    #[error("writer is not open")]
    WriterNotOpen,

    #[error("value out of declared range: {0}")]
    ValueOutOfRange(String),

    #[error("file has {0} open writer(s); close them before closing the file")]
    OpenWriter(usize),

    #[error("bad file header: {0}")]
    BadFileHeader(String),

    #[error("checksum mismatch on page {page}")]
    BadChecksum { page: u64 },

    #[error("bad packet: {0}")]
    BadPacket(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
