use std::io::Write;

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::{OcfError, Result};
use crate::finalizer::{BlockFinalizer, WriterStats};
use crate::format::{SyncMarker, DEFAULT_SYNC_INTERVAL};

/// Streaming writer for records that were encoded upstream.
///
/// # Write contract
/// Call [`append_encoded`] with one already-encoded record per call. The bytes
/// are never parsed: they are concatenated into the pending block exactly as
/// given, so the caller guarantees they match the schema the writer was built
/// with. Once `sync_interval` records are pending the block is compressed,
/// framed, and written. Call [`close`] (or [`into_inner`]) to finalize any
/// partial trailing block.
///
/// # Format layout written
/// ```text
/// [HEADER: magic, metadata map, sync]     ← once, before the first block
/// [BLOCK 0] [BLOCK 1] ... [BLOCK N-1]      ← count, length, payload, sync
/// ```
///
/// # Sink failures
/// If the sink rejects a write or flush, the pending records stay buffered
/// and the writer is poisoned: `append_encoded`, `flush` and `close` fail with
/// [`OcfError::Poisoned`], and dropping the writer writes nothing. The sink
/// may hold a partial header or frame, so the caller either repairs it and
/// calls [`retry_pending`], or takes the sink and the unwritten records back
/// with [`abandon`].
///
/// [`append_encoded`]: Self::append_encoded
/// [`close`]: Self::close
/// [`into_inner`]: Self::into_inner
/// [`retry_pending`]: Self::retry_pending
/// [`abandon`]: Self::abandon
pub struct DirectBlockWriter<W: Write> {
    /// `None` once the writer is closed and the sink released.
    finalizer: Option<BlockFinalizer<W>>,
    /// Concatenated encoded records not yet written as a block.
    pending: Vec<u8>,
    pending_count: u64,
    sync_interval: u64,
}

/// What [`DirectBlockWriter::abandon`] hands back.
pub struct Abandoned<W> {
    pub sink: W,
    /// Concatenated encoded records that never reached a block.
    pub pending: Vec<u8>,
    pub pending_count: u64,
}

impl<W: Write> DirectBlockWriter<W> {
    /// Create a writer over `sink` with a random sync marker.
    pub fn new(sink: W, schema: &str, codec: Box<dyn Codec>) -> Self {
        Self::from_finalizer(BlockFinalizer::new(sink, schema, codec))
    }

    /// Create a writer with a caller-chosen sync marker.
    pub fn with_sync_marker(
        sink: W,
        schema: &str,
        codec: Box<dyn Codec>,
        sync: SyncMarker,
    ) -> Self {
        Self::from_finalizer(BlockFinalizer::with_sync_marker(sink, schema, codec, sync))
    }

    fn from_finalizer(finalizer: BlockFinalizer<W>) -> Self {
        Self {
            finalizer: Some(finalizer),
            pending: Vec::new(),
            pending_count: 0,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    /// Set the records-per-block threshold used by [`append`](Self::append).
    pub fn set_sync_interval(&mut self, sync_interval: u64) -> Result<()> {
        if sync_interval == 0 {
            return Err(OcfError::InvalidSyncInterval(sync_interval));
        }
        self.sync_interval = sync_interval;
        Ok(())
    }

    pub fn sync_interval(&self) -> u64 {
        self.sync_interval
    }

    /// Attach a user metadata entry. Only allowed before the header is written.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        self.finalizer_mut()?.set_metadata(key, value)
    }

    /// Append one pre-encoded record, using the configured sync interval.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        self.append_encoded(payload, self.sync_interval)
    }

    /// Append one pre-encoded record and finalize the block once
    /// `sync_interval` records are pending.
    ///
    /// A poisoned writer refuses the record, so a block that failed to write
    /// never grows past `sync_interval`.
    pub fn append_encoded(&mut self, payload: &[u8], sync_interval: u64) -> Result<()> {
        let finalizer = self.finalizer.as_ref().ok_or(OcfError::WriteAfterClose)?;
        if sync_interval == 0 {
            return Err(OcfError::InvalidSyncInterval(sync_interval));
        }
        if finalizer.is_poisoned() {
            return Err(OcfError::Poisoned);
        }
        self.pending.extend_from_slice(payload);
        self.pending_count += 1;

        if self.pending_count >= sync_interval {
            self.write_pending_block()?;
        }
        Ok(())
    }

    /// Finalize the current block, even if partial, and flush the sink.
    ///
    /// The header is written if it has not been yet, so a flushed file is
    /// always readable. With nothing pending this only flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.write_pending_block()?;
        let finalizer = self.finalizer_mut()?;
        finalizer.write_header()?;
        finalizer.flush_sink()
    }

    /// Flush everything and release the sink. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.finalizer.is_none() {
            return Ok(());
        }
        self.flush()?;
        if let Some(finalizer) = self.finalizer.take() {
            debug!(
                blocks = finalizer.stats().blocks_written,
                records = finalizer.stats().records_written,
                "direct writer closed"
            );
        }
        Ok(())
    }

    /// Clear a sink failure and write the buffered records as one block.
    ///
    /// Call only once the sink is back at a usable position, e.g. truncated
    /// to the last complete block. If the header never completed it is
    /// written again first.
    pub fn retry_pending(&mut self) -> Result<()> {
        let finalizer = self.finalizer_mut()?;
        finalizer.clear_poison();
        self.write_pending_block()?;
        self.finalizer_mut()?.flush_sink()
    }

    /// Give up on the file without writing anything further.
    ///
    /// Returns the sink as it is and the records that were never written.
    pub fn abandon(mut self) -> Result<Abandoned<W>> {
        let finalizer = self.finalizer.take().ok_or(OcfError::WriteAfterClose)?;
        warn!(
            pending = self.pending_count,
            poisoned = finalizer.is_poisoned(),
            "direct writer abandoned"
        );
        Ok(Abandoned {
            sink: finalizer.into_inner(),
            pending: std::mem::take(&mut self.pending),
            pending_count: std::mem::replace(&mut self.pending_count, 0),
        })
    }

    /// Whether a sink failure is blocking further writes.
    pub fn is_poisoned(&self) -> bool {
        self.finalizer
            .as_ref()
            .map_or(false, BlockFinalizer::is_poisoned)
    }

    /// Flush everything and return the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        let finalizer = self.finalizer.take().ok_or(OcfError::WriteAfterClose)?;
        Ok(finalizer.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.finalizer.is_none()
    }

    /// Records appended but not yet written as a block.
    pub fn pending_count(&self) -> u64 {
        self.pending_count
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn sync_marker(&self) -> Option<&SyncMarker> {
        self.finalizer.as_ref().map(BlockFinalizer::sync_marker)
    }

    pub fn stats(&self) -> Option<WriterStats> {
        self.finalizer.as_ref().map(BlockFinalizer::stats)
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.finalizer.as_ref().map(BlockFinalizer::get_ref)
    }

    fn finalizer_mut(&mut self) -> Result<&mut BlockFinalizer<W>> {
        self.finalizer.as_mut().ok_or(OcfError::WriteAfterClose)
    }

    /// Hand the pending block to the finalizer; reset only on success.
    fn write_pending_block(&mut self) -> Result<()> {
        let finalizer = self.finalizer.as_mut().ok_or(OcfError::WriteAfterClose)?;
        finalizer.finalize_block(&self.pending, self.pending_count)?;
        self.pending.clear();
        self.pending_count = 0;
        Ok(())
    }
}

impl<W: Write> Drop for DirectBlockWriter<W> {
    fn drop(&mut self) {
        if self.is_poisoned() {
            warn!(
                pending = self.pending_count,
                "dropping poisoned direct writer; pending records were not written"
            );
            return;
        }
        if self.finalizer.is_some() {
            if let Err(e) = self.close() {
                warn!(
                    error = %e,
                    pending = self.pending_count,
                    "failed to close direct writer on drop"
                );
            }
        }
    }
}
