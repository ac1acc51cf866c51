use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use rand::Rng;

use crate::error::{OcfError, Result};

/// Magic bytes for object container files, version 1: `"Obj"` followed by 0x01.
pub const MAGIC: &[u8; 4] = b"Obj\x01";

/// Length of the per-file sync marker in bytes.
pub const SYNC_SIZE: usize = 16;

/// Default records per block for the direct writer.
pub const DEFAULT_SYNC_INTERVAL: u64 = 1000;

/// Default raw bytes per block for the record writer: 1000 × sync size.
pub const DEFAULT_BLOCK_SIZE: usize = 1000 * SYNC_SIZE;

// ── Metadata keys ───────────────────────────────────────────────────────────

pub const META_SCHEMA: &str = "avro.schema";
pub const META_CODEC: &str = "avro.codec";

/// Keys with this prefix belong to the format and cannot be set by users.
pub const RESERVED_META_PREFIX: &str = "avro.";

// ── Codec identifiers ───────────────────────────────────────────────────────

pub const CODEC_NULL: &str = "null";
pub const CODEC_DEFLATE: &str = "deflate";

// ── Zig-zag longs ───────────────────────────────────────────────────────────

/// Longest varint a 64-bit value can occupy.
const MAX_VARINT_LEN: usize = 10;

/// Append `n` as a zig-zag variable-length long.
pub fn write_long(out: &mut Vec<u8>, n: i64) {
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    while z >= 0x80 {
        out.push((z as u8 & 0x7f) | 0x80);
        z >>= 7;
    }
    out.push(z as u8);
}

/// Append a length-prefixed byte string.
pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_long(out, bytes.len() as i64);
    out.extend_from_slice(bytes);
}

/// Read a zig-zag long, returning `None` on a clean EOF before its first byte.
pub fn read_long_opt<R: Read>(r: &mut R) -> Result<Option<i64>> {
    let mut z: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        if r.read(&mut byte)? == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(OcfError::Truncated);
        }
        z |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(((z >> 1) as i64) ^ -((z & 1) as i64)));
        }
    }
    Err(OcfError::Corrupt("varint longer than 10 bytes".to_string()))
}

/// Read a zig-zag long that must be present.
pub fn read_long<R: Read>(r: &mut R) -> Result<i64> {
    read_long_opt(r)?.ok_or(OcfError::Truncated)
}

/// Read exactly `len` bytes without trusting `len` for the allocation size.
pub fn read_fixed<R: Read>(r: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(OcfError::Truncated);
    }
    Ok(buf)
}

/// Read a length-prefixed byte string.
pub fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_long(r)?;
    if len < 0 {
        return Err(OcfError::Corrupt(format!("negative byte length {}", len)));
    }
    read_fixed(r, len as u64)
}

// ── Sync marker ─────────────────────────────────────────────────────────────

/// The 16 bytes written after the header and after every block of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncMarker([u8; SYNC_SIZE]);

impl SyncMarker {
    /// Generate a fresh marker from the thread-local RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SYNC_SIZE];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYNC_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYNC_SIZE] {
        &self.0
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut bytes = [0u8; SYNC_SIZE];
        r.read_exact(&mut bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => OcfError::Truncated,
            _ => OcfError::Io(e),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SyncMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

// ── Header ──────────────────────────────────────────────────────────────────

/// Decoded container header: metadata map plus sync marker.
///
/// A `BTreeMap` keeps the on-disk key order deterministic, so two writers
/// given the same metadata and marker emit identical headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub sync: SyncMarker,
}

impl Header {
    pub fn new(schema: &str, codec: &str, sync: SyncMarker) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_SCHEMA.to_string(), schema.as_bytes().to_vec());
        metadata.insert(META_CODEC.to_string(), codec.as_bytes().to_vec());
        Self { metadata, sync }
    }

    /// Schema JSON, if present and valid UTF-8.
    pub fn schema(&self) -> Option<&str> {
        self.metadata
            .get(META_SCHEMA)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Codec identifier. An absent key means `"null"`.
    pub fn codec_name(&self) -> Result<&str> {
        match self.metadata.get(META_CODEC) {
            None => Ok(CODEC_NULL),
            Some(v) => std::str::from_utf8(v)
                .map_err(|_| OcfError::Corrupt("avro.codec is not UTF-8".to_string())),
        }
    }

    /// Serialize as `MAGIC METADATA_MAP SYNC16`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            MAGIC.len()
                + SYNC_SIZE
                + self
                    .metadata
                    .iter()
                    .map(|(k, v)| k.len() + v.len() + 4)
                    .sum::<usize>()
                + 4,
        );
        buf.extend_from_slice(MAGIC);
        if !self.metadata.is_empty() {
            write_long(&mut buf, self.metadata.len() as i64);
            for (key, value) in &self.metadata {
                write_bytes(&mut buf, key.as_bytes());
                write_bytes(&mut buf, value);
            }
        }
        write_long(&mut buf, 0);
        buf.extend_from_slice(self.sync.as_bytes());
        buf
    }

    /// Deserialize a header, checking the magic.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => OcfError::InvalidMagic,
            _ => OcfError::Io(e),
        })?;
        if &magic != MAGIC {
            return Err(OcfError::InvalidMagic);
        }

        let mut metadata = BTreeMap::new();
        loop {
            let mut count = read_long(r)?;
            if count == 0 {
                break;
            }
            // A negative count is followed by the block's size in bytes.
            if count < 0 {
                count = count
                    .checked_neg()
                    .ok_or_else(|| OcfError::Corrupt("metadata block count overflow".to_string()))?;
                read_long(r)?;
            }
            for _ in 0..count {
                let key = String::from_utf8(read_bytes(r)?)
                    .map_err(|_| OcfError::Corrupt("metadata key is not UTF-8".to_string()))?;
                let value = read_bytes(r)?;
                metadata.insert(key, value);
            }
        }

        let sync = SyncMarker::read_from(r)?;
        Ok(Self { metadata, sync })
    }
}

/// Append one framed block: `LONG(count) LONG(length) PAYLOAD SYNC16`.
pub fn write_block(out: &mut Vec<u8>, count: i64, payload: &[u8], sync: &SyncMarker) {
    write_long(out, count);
    write_bytes(out, payload);
    out.extend_from_slice(sync.as_bytes());
}
