use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use ocf_core::codec::Codec;
use ocf_core::format::CODEC_DEFLATE;
use ocf_core::{OcfError, Result};

/// `"deflate"` codec: each block is one raw deflate stream (RFC 1951).
///
/// There is no zlib header or adler32 trailer, and nothing is shared between
/// blocks, so any block inflates on its own.
pub struct DeflateCodec {
    /// Compression level (0 = store, 9 = smallest).
    pub level: Compression,
    /// Largest inflated block accepted when decompressing.
    pub max_block_len: usize,
}

/// Default cap on one inflated block (256 MiB).
pub const DEFAULT_MAX_BLOCK_LEN: usize = 256 * 1024 * 1024;

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
        }
    }
}

impl DeflateCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
            ..Self::default()
        }
    }

    pub fn with_max_block_len(mut self, max_block_len: usize) -> Self {
        self.max_block_len = max_block_len;
        self
    }
}

fn codec_error(source: std::io::Error) -> OcfError {
    OcfError::Codec {
        codec: CODEC_DEFLATE,
        source,
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        CODEC_DEFLATE
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut enc = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), self.level);
        enc.write_all(raw).map_err(codec_error)?;
        enc.finish().map_err(codec_error)
    }

    /// Inflate one block, refusing output past `max_block_len` bytes.
    fn decompress_block(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let cap = self.max_block_len.min(compressed.len().saturating_mul(4));
        let mut raw = Vec::with_capacity(cap);
        DeflateDecoder::new(compressed)
            .take(self.max_block_len as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(codec_error)?;
        if raw.len() > self.max_block_len {
            return Err(OcfError::Corrupt(format!(
                "deflate block inflates past {} bytes",
                self.max_block_len
            )));
        }
        Ok(raw)
    }
}
