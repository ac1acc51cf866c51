use std::io::Write;

use tracing::warn;

use crate::codec::Codec;
use crate::error::{OcfError, Result};
use crate::finalizer::{BlockFinalizer, WriterStats};
use crate::format::{SyncMarker, DEFAULT_BLOCK_SIZE};

/// Turns an in-memory datum into its binary encoding.
///
/// The crate ships no implementation: encoding values against a schema is
/// the job of a datum library, plugged in here by the caller.
pub trait DatumEncoder {
    type Datum: ?Sized;

    /// Append the encoding of `datum` to `out`.
    fn encode(&self, datum: &Self::Datum, out: &mut Vec<u8>) -> Result<()>;
}

/// Encode-then-append writer: the conventional path that encodes every
/// record before buffering it.
///
/// Blocks are cut by size: once `block_size` raw bytes are pending the block
/// is finalized through the same [`BlockFinalizer`] the direct writer uses.
pub struct RecordWriter<W: Write, E: DatumEncoder> {
    finalizer: Option<BlockFinalizer<W>>,
    encoder: E,
    pending: Vec<u8>,
    pending_count: u64,
    block_size: usize,
}

impl<W: Write, E: DatumEncoder> RecordWriter<W, E> {
    pub fn new(sink: W, schema: &str, codec: Box<dyn Codec>, encoder: E) -> Self {
        Self::from_finalizer(BlockFinalizer::new(sink, schema, codec), encoder)
    }

    pub fn with_sync_marker(
        sink: W,
        schema: &str,
        codec: Box<dyn Codec>,
        encoder: E,
        sync: SyncMarker,
    ) -> Self {
        Self::from_finalizer(
            BlockFinalizer::with_sync_marker(sink, schema, codec, sync),
            encoder,
        )
    }

    fn from_finalizer(finalizer: BlockFinalizer<W>, encoder: E) -> Self {
        Self {
            finalizer: Some(finalizer),
            encoder,
            pending: Vec::with_capacity(DEFAULT_BLOCK_SIZE),
            pending_count: 0,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Raw bytes per block; a block is cut as soon as the buffer reaches it.
    pub fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size.max(1);
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        self.finalizer
            .as_mut()
            .ok_or(OcfError::WriteAfterClose)?
            .set_metadata(key, value)
    }

    /// Encode `datum` into the pending block.
    ///
    /// An encoder failure leaves the pending block as it was. After a sink
    /// failure nothing is encoded until [`retry_pending`](Self::retry_pending).
    pub fn append(&mut self, datum: &E::Datum) -> Result<()> {
        let finalizer = self.finalizer.as_ref().ok_or(OcfError::WriteAfterClose)?;
        if finalizer.is_poisoned() {
            return Err(OcfError::Poisoned);
        }
        let mark = self.pending.len();
        if let Err(e) = self.encoder.encode(datum, &mut self.pending) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_count += 1;

        if self.pending.len() >= self.block_size {
            self.write_pending_block()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.write_pending_block()?;
        let finalizer = self.finalizer.as_mut().ok_or(OcfError::WriteAfterClose)?;
        finalizer.write_header()?;
        finalizer.flush_sink()
    }

    pub fn close(&mut self) -> Result<()> {
        if self.finalizer.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.finalizer = None;
        Ok(())
    }

    /// Clear a sink failure and write the buffered records as one block.
    pub fn retry_pending(&mut self) -> Result<()> {
        self.finalizer
            .as_mut()
            .ok_or(OcfError::WriteAfterClose)?
            .clear_poison();
        self.flush()
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        let finalizer = self.finalizer.take().ok_or(OcfError::WriteAfterClose)?;
        Ok(finalizer.into_inner())
    }

    pub fn stats(&self) -> Option<WriterStats> {
        self.finalizer.as_ref().map(BlockFinalizer::stats)
    }

    fn write_pending_block(&mut self) -> Result<()> {
        let finalizer = self.finalizer.as_mut().ok_or(OcfError::WriteAfterClose)?;
        finalizer.finalize_block(&self.pending, self.pending_count)?;
        self.pending.clear();
        self.pending_count = 0;
        Ok(())
    }
}

impl<W: Write, E: DatumEncoder> Drop for RecordWriter<W, E> {
    fn drop(&mut self) {
        if let Some(finalizer) = &self.finalizer {
            if finalizer.is_poisoned() {
                warn!(
                    pending = self.pending_count,
                    "dropping poisoned record writer; pending records were not written"
                );
                return;
            }
            if let Err(e) = self.close() {
                warn!(error = %e, "failed to close record writer on drop");
            }
        }
    }
}
