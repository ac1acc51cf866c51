use ocf_core::codec::Codec;
use ocf_core::format::CODEC_NULL;
use ocf_core::Result;

/// `"null"` codec: blocks are stored verbatim.
///
/// The stored payload is exactly the concatenation of the encoded records,
/// which makes it the codec to reach for when checking framing by eye.
pub struct NullCodec;

impl Codec for NullCodec {
    fn name(&self) -> &'static str {
        CODEC_NULL
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
