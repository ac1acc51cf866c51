mod deflate_codec;
mod null_codec;

pub use deflate_codec::{DeflateCodec, DEFAULT_MAX_BLOCK_LEN};
pub use null_codec::NullCodec;

use ocf_core::format::{CODEC_DEFLATE, CODEC_NULL};
use ocf_core::{Codec, OcfError, Result};

/// Resolve a codec from its `avro.codec` identifier.
///
/// Called before any byte of a file is written, so an unknown identifier
/// fails with [`OcfError::UnsupportedCodec`] and never downgrades to `null`.
pub fn codec_by_name(name: &str) -> Result<Box<dyn Codec>> {
    match name {
        CODEC_NULL => Ok(Box::new(NullCodec)),
        CODEC_DEFLATE => Ok(Box::new(DeflateCodec::default())),
        other => Err(OcfError::UnsupportedCodec(other.to_string())),
    }
}

/// Like [`codec_by_name`], with an explicit deflate level (ignored by `null`).
pub fn codec_with_level(name: &str, deflate_level: u32) -> Result<Box<dyn Codec>> {
    match name {
        CODEC_DEFLATE => Ok(Box::new(DeflateCodec::new(deflate_level))),
        other => codec_by_name(other),
    }
}
