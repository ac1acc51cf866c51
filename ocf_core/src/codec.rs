use crate::error::Result;

/// Core compression abstraction for container blocks.
///
/// Each `Codec` implementation:
/// - Is identified by the stable string `name()` stored under `avro.codec`
///   in the file header.
/// - Must compress/decompress individual blocks independently. No state is
///   carried from one block to the next, so any block can be decoded after
///   resynchronizing on its sync marker.
pub trait Codec: Send + Sync {
    /// Codec identifier written to the header metadata (`"null"`, `"deflate"`).
    fn name(&self) -> &'static str;

    /// Compress the concatenated encoded records of a single block.
    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a single block payload back to its concatenated records.
    fn decompress_block(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}
