//! Error types for container file reading and writing.

use thiserror::Error;

/// Result type alias using [`OcfError`].
pub type Result<T> = std::result::Result<T, OcfError>;

/// Unified error type for `ocf_core` operations.
#[derive(Debug, Error)]
pub enum OcfError {
    // -------------------------------------------------------------------------
    // Sink / source I/O
    // -------------------------------------------------------------------------
    /// Underlying storage failure, propagated verbatim. Never retried.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Writer errors
    // -------------------------------------------------------------------------
    #[error("\"{0}\" codec is not supported")]
    UnsupportedCodec(String),

    #[error("writer is closed")]
    WriteAfterClose,

    #[error("an earlier sink failure left the output unusable; retry the pending block or abandon the file")]
    Poisoned,

    #[error("sync interval must be at least 1, got {0}")]
    InvalidSyncInterval(u64),

    #[error("metadata key \"{0}\" uses the reserved \"avro.\" prefix")]
    ReservedMetadataKey(String),

    #[error("header already written; metadata can no longer change")]
    HeaderAlreadyWritten,

    #[error("{codec} codec failed: {source}")]
    Codec {
        codec: &'static str,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Reader errors
    // -------------------------------------------------------------------------
    #[error("invalid magic bytes: not an object container file")]
    InvalidMagic,

    #[error("codec mismatch: file uses \"{file}\" but provided codec is \"{provided}\"")]
    CodecMismatch { file: String, provided: String },

    #[error("block {block} sync marker does not match the header")]
    SyncMismatch { block: u64 },

    #[error("unexpected end of input inside a header or block")]
    Truncated,

    #[error("corrupt container data: {0}")]
    Corrupt(String),
}
