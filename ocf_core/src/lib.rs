pub mod codec;
pub mod error;
pub mod finalizer;
pub mod format;
pub mod reader;
pub mod record;
pub mod writer;

pub use codec::Codec;
pub use error::{OcfError, Result};
pub use finalizer::{BlockFinalizer, WriterStats};
pub use format::{Header, SyncMarker, MAGIC, SYNC_SIZE};
pub use reader::{read_header, Block, Reader};
pub use record::{DatumEncoder, RecordWriter};
pub use writer::{Abandoned, DirectBlockWriter};
