use std::io::Write;

use tracing::{debug, trace};

use crate::codec::Codec;
use crate::error::{OcfError, Result};
use crate::format::{write_block, Header, SyncMarker, RESERVED_META_PREFIX};

/// Running totals for everything a finalizer has put on the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub blocks_written: u64,
    pub records_written: u64,
    /// Header and framed blocks, as handed to the sink.
    pub bytes_written: u64,
}

/// Header state, codec, and block framing shared by every buffering strategy.
///
/// The finalizer never buffers records itself: callers hand it a complete
/// raw block (`raw`, `count`) and keep ownership of their buffer, resetting
/// it only once [`finalize_block`](Self::finalize_block) returned `Ok`.
pub struct BlockFinalizer<W: Write> {
    sink: W,
    codec: Box<dyn Codec>,
    header: Header,
    header_written: bool,
    /// Set when the sink rejected a write or flush; it may hold a partial
    /// header or frame, so nothing more is written until cleared.
    poisoned: bool,
    stats: WriterStats,
    /// Scratch space for one framed block, reused across blocks.
    frame: Vec<u8>,
}

impl<W: Write> BlockFinalizer<W> {
    /// Prepare a finalizer with a freshly generated sync marker.
    ///
    /// Nothing is written until the first non-empty block or an explicit
    /// [`write_header`](Self::write_header).
    pub fn new(sink: W, schema: &str, codec: Box<dyn Codec>) -> Self {
        Self::with_sync_marker(sink, schema, codec, SyncMarker::random())
    }

    /// Prepare a finalizer with a caller-chosen sync marker.
    pub fn with_sync_marker(
        sink: W,
        schema: &str,
        codec: Box<dyn Codec>,
        sync: SyncMarker,
    ) -> Self {
        let header = Header::new(schema, codec.name(), sync);
        Self {
            sink,
            codec,
            header,
            header_written: false,
            poisoned: false,
            stats: WriterStats::default(),
            frame: Vec::new(),
        }
    }

    /// Attach a user metadata entry to the header.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        if key.starts_with(RESERVED_META_PREFIX) {
            return Err(OcfError::ReservedMetadataKey(key.to_string()));
        }
        if self.header_written {
            return Err(OcfError::HeaderAlreadyWritten);
        }
        self.header.metadata.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Write magic, metadata, and sync marker. No-op once written.
    pub fn write_header(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if self.header_written {
            return Ok(());
        }
        let bytes = self.header.to_bytes();
        if let Err(e) = self.sink.write_all(&bytes) {
            self.poisoned = true;
            return Err(e.into());
        }
        self.header_written = true;
        self.stats.bytes_written += bytes.len() as u64;
        trace!(
            codec = self.codec.name(),
            sync = %self.header.sync,
            bytes = bytes.len(),
            "container header written"
        );
        Ok(())
    }

    /// Compress `raw` and write it as one block holding `count` records.
    ///
    /// A zero `count` writes nothing, not even the header. The whole frame is
    /// assembled before the first byte reaches the sink, so a codec failure
    /// leaves the sink untouched. A sink failure poisons the finalizer.
    pub fn finalize_block(&mut self, raw: &[u8], count: u64) -> Result<()> {
        self.check_poisoned()?;
        if count == 0 {
            return Ok(());
        }
        let stored = self.codec.compress_block(raw)?;

        self.frame.clear();
        write_block(&mut self.frame, count as i64, &stored, &self.header.sync);

        self.write_header()?;
        if let Err(e) = self.sink.write_all(&self.frame) {
            self.poisoned = true;
            return Err(e.into());
        }

        self.stats.blocks_written += 1;
        self.stats.records_written += count;
        self.stats.bytes_written += self.frame.len() as u64;
        debug!(
            block = self.stats.blocks_written - 1,
            count,
            raw_len = raw.len(),
            stored_len = stored.len(),
            "block finalized"
        );
        Ok(())
    }

    /// Flush the underlying sink.
    pub fn flush_sink(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if let Err(e) = self.sink.flush() {
            self.poisoned = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether an earlier sink failure blocks further writes.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Accept writes again after a sink failure.
    ///
    /// The caller vouches that the sink is back at a usable position. The
    /// header is written again if it never completed.
    pub fn clear_poison(&mut self) {
        self.poisoned = false;
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(OcfError::Poisoned);
        }
        Ok(())
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn sync_marker(&self) -> &SyncMarker {
        &self.header.sync
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Release the sink. Pending caller buffers are not consulted.
    pub fn into_inner(self) -> W {
        self.sink
    }
}
