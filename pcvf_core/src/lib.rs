pub mod buffer;
pub mod encoder;
pub mod error;
pub mod file;
pub mod format;
pub mod node;
pub mod prototype;
pub mod reader;
pub mod writer;

pub use buffer::{BufferValues, SourceBuffer, ValueKind};
pub use encoder::{Encoder, EncoderFactory};
pub use error::{Error, Result};
pub use file::PagedFile;
pub use format::{CompressedVectorSectionHeader, FileHeader, DATA_PACKET_MAX, TARGET_PACKET_SIZE};
pub use node::CompressedVectorNode;
pub use prototype::{FieldType, ProtoNode, Prototype};
pub use reader::{SectionContents, SectionReader};
pub use writer::CompressedVectorWriter;
