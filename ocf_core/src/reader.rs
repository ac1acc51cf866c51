use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::codec::Codec;
use crate::error::{OcfError, Result};
use crate::format::{read_fixed, read_long, read_long_opt, Header, SyncMarker};

/// One block as read from disk, payload already decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Records the writer declared for this block.
    pub count: u64,
    /// Payload length as stored, before decompression.
    pub stored_len: u64,
    /// Concatenated encoded records.
    pub payload: Vec<u8>,
}

/// Sequential block reader for object container files.
///
/// # Open sequence
/// 1. Read magic, metadata map and sync marker.
/// 2. Check the provided codec against `avro.codec`.
///
/// # Access pattern
/// Blocks are read front to back. Records inside a block are never decoded;
/// [`Block::payload`] holds their concatenated encodings. Every block's
/// trailing sync marker is compared with the header's.
pub struct Reader<R: Read> {
    source: R,
    header: Header,
    codec: Box<dyn Codec>,
    blocks_read: u64,
    failed: bool,
}

/// Read only the header of the file at `path`, e.g. to pick the codec.
pub fn read_header(path: impl AsRef<Path>) -> Result<Header> {
    let mut file = BufReader::new(File::open(path)?);
    Header::read_from(&mut file)
}

impl Reader<BufReader<File>> {
    /// Open a container file on disk.
    pub fn open(path: impl AsRef<Path>, codec: Box<dyn Codec>) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?), codec)
    }
}

impl<R: Read> Reader<R> {
    /// Read the header from `source`.
    ///
    /// `codec` must match the identifier stored in the header; use
    /// `ocf_codecs::codec_by_name(header.codec_name()?)` when it is not known
    /// up front.
    pub fn new(mut source: R, codec: Box<dyn Codec>) -> Result<Self> {
        let header = Header::read_from(&mut source)?;
        let file_codec = header.codec_name()?;
        if file_codec != codec.name() {
            return Err(OcfError::CodecMismatch {
                file: file_codec.to_string(),
                provided: codec.name().to_string(),
            });
        }
        Ok(Self {
            source,
            header,
            codec,
            blocks_read: 0,
            failed: false,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn schema(&self) -> Option<&str> {
        self.header.schema()
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub fn sync_marker(&self) -> &SyncMarker {
        &self.header.sync
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Read and decompress the next block.
    ///
    /// Returns `Ok(None)` on a clean end of file between blocks. A file cut
    /// inside a block yields [`OcfError::Truncated`].
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let count = match read_long_opt(&mut self.source)? {
            None => return Ok(None),
            Some(n) if n < 0 => {
                return Err(OcfError::Corrupt(format!(
                    "block {} has negative record count {}",
                    self.blocks_read, n
                )))
            }
            Some(n) => n as u64,
        };
        let stored_len = read_long(&mut self.source)?;
        if stored_len < 0 {
            return Err(OcfError::Corrupt(format!(
                "block {} has negative length {}",
                self.blocks_read, stored_len
            )));
        }
        let stored = read_fixed(&mut self.source, stored_len as u64)?;

        let sync = SyncMarker::read_from(&mut self.source)?;
        if sync != self.header.sync {
            return Err(OcfError::SyncMismatch {
                block: self.blocks_read,
            });
        }

        let payload = self.codec.decompress_block(&stored)?;
        self.blocks_read += 1;
        Ok(Some(Block {
            count,
            stored_len: stored_len as u64,
            payload,
        }))
    }
}

impl<R: Read> Iterator for Reader<R> {
    type Item = Result<Block>;

    /// Yields blocks until end of file; stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_block() {
            Ok(block) => block.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
