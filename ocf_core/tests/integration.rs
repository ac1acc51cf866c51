/// Integration tests: files written from pre-encoded records must read back
/// through the reference `apache-avro` reader exactly as if every record had
/// been encoded by the writer itself.
///
/// Framing is checked twice: once with the in-crate block `Reader`, which
/// exposes per-block counts and payloads, and once byte-for-byte against the
/// encode-then-append `RecordWriter`.
use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::rc::Rc;

use apache_avro::types::{Record, Value};
use apache_avro::{to_avro_datum, Schema};

use ocf_codecs::{codec_by_name, DeflateCodec, NullCodec};
use ocf_core::format::{CODEC_DEFLATE, CODEC_NULL, SYNC_SIZE};
use ocf_core::{
    DatumEncoder, DirectBlockWriter, Header, OcfError, Reader, RecordWriter, SyncMarker,
};

const SCHEMA: &str = r#"{
    "type": "record",
    "name": "Event",
    "fields": [
        {"name": "id", "type": "long"},
        {"name": "name", "type": "string"}
    ]
}"#;

const FIXED_SYNC: [u8; SYNC_SIZE] = *b"0123456789abcdef";

// ── helpers ───────────────────────────────────────────────────────────────

fn schema() -> Schema {
    Schema::parse_str(SCHEMA).unwrap()
}

fn event(id: i64) -> Value {
    Value::Record(vec![
        ("id".to_string(), Value::Long(id)),
        ("name".to_string(), Value::String(format!("event-{}", id))),
    ])
}

fn encoded_event(schema: &Schema, id: i64) -> Vec<u8> {
    let mut record = Record::new(schema).unwrap();
    record.put("id", id);
    record.put("name", format!("event-{}", id));
    to_avro_datum(schema, record).unwrap()
}

/// Read every record back with the reference reader.
fn read_with_reference(bytes: &[u8]) -> Vec<Value> {
    apache_avro::Reader::new(bytes)
        .unwrap()
        .map(|v| v.unwrap())
        .collect()
}

/// Block counts and decompressed payloads, via the in-crate reader.
fn read_blocks(bytes: &[u8], codec: &str) -> Vec<(u64, Vec<u8>)> {
    Reader::new(bytes, codec_by_name(codec).unwrap())
        .unwrap()
        .map(|b| {
            let b = b.unwrap();
            (b.count, b.payload)
        })
        .collect()
}

fn header_len(bytes: &[u8]) -> usize {
    let mut cursor = bytes;
    Header::read_from(&mut cursor).unwrap();
    bytes.len() - cursor.len()
}

/// Encodes `Value`s with the reference encoder, for the record writer.
struct AvroEncoder {
    schema: Schema,
}

impl DatumEncoder for AvroEncoder {
    type Datum = Value;

    fn encode(&self, datum: &Value, out: &mut Vec<u8>) -> ocf_core::Result<()> {
        let bytes = to_avro_datum(&self.schema, datum.clone())
            .map_err(|e| OcfError::Corrupt(e.to_string()))?;
        out.extend_from_slice(&bytes);
        Ok(())
    }
}

/// In-memory sink that fails every write while `failing` is set.
struct FlakySink {
    data: Vec<u8>,
    failing: Rc<Cell<bool>>,
}

impl Write for FlakySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failing.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.failing.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        Ok(())
    }
}

/// Sink that accepts `budget` more bytes, then fails; the written bytes stay
/// visible after the writer is gone.
struct ShortSink {
    data: Rc<RefCell<Vec<u8>>>,
    budget: Rc<Cell<usize>>,
}

impl Write for ShortSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.budget.get());
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
        }
        self.data.borrow_mut().extend_from_slice(&buf[..n]);
        self.budget.set(self.budget.get() - n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn short_sink(budget: usize) -> (ShortSink, Rc<RefCell<Vec<u8>>>, Rc<Cell<usize>>) {
    let data = Rc::new(RefCell::new(Vec::new()));
    let budget = Rc::new(Cell::new(budget));
    let sink = ShortSink {
        data: data.clone(),
        budget: budget.clone(),
    };
    (sink, data, budget)
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_null_through_reference_reader() {
    let schema = schema();
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    for id in 0..10 {
        w.append_encoded(&encoded_event(&schema, id), 3).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let expected: Vec<Value> = (0..10).map(event).collect();
    assert_eq!(read_with_reference(&bytes), expected);

    let counts: Vec<u64> = read_blocks(&bytes, CODEC_NULL).iter().map(|b| b.0).collect();
    assert_eq!(counts, vec![3, 3, 3, 1]);
}

#[test]
fn test_roundtrip_deflate_through_reference_reader() {
    let schema = schema();
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(DeflateCodec::default()));
    for id in 0..250 {
        w.append_encoded(&encoded_event(&schema, id), 100).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let expected: Vec<Value> = (0..250).map(event).collect();
    assert_eq!(read_with_reference(&bytes), expected);
}

#[test]
fn test_threshold_exactness() {
    let payload = [0x02u8, 0x00];
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));

    for _ in 0..3 {
        w.append_encoded(&payload, 4).unwrap();
    }
    assert_eq!(w.stats().unwrap().blocks_written, 0);
    assert!(w.get_ref().unwrap().is_empty(), "header must stay pending");
    assert_eq!(w.pending_count(), 3);

    w.append_encoded(&payload, 4).unwrap();
    assert_eq!(w.stats().unwrap().blocks_written, 1);
    assert_eq!(w.pending_count(), 0);
    assert_eq!(w.pending_bytes(), 0);

    let bytes = w.into_inner().unwrap();
    let blocks = read_blocks(&bytes, CODEC_NULL);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].0, 4);
    assert_eq!(blocks[0].1, payload.repeat(4));
}

/// Three 10-byte payloads with an interval of 2: one full block, then the
/// trailing partial block on close.
#[test]
fn test_example_scenario_exact_layout() {
    let p1 = [0x11u8; 10];
    let p2 = [0x22u8; 10];
    let p3 = [0x33u8; 10];
    let sync = SyncMarker::from_bytes(FIXED_SYNC);

    let mut w =
        DirectBlockWriter::with_sync_marker(Vec::new(), SCHEMA, Box::new(NullCodec), sync);
    w.append_encoded(&p1, 2).unwrap();
    w.append_encoded(&p2, 2).unwrap();
    w.append_encoded(&p3, 2).unwrap();
    assert_eq!(w.stats().unwrap().blocks_written, 1);
    let bytes = w.into_inner().unwrap();

    let header = Header::new(SCHEMA, CODEC_NULL, sync).to_bytes();
    let mut expected = header.clone();
    expected.extend_from_slice(&[0x04, 0x28]); // count 2, length 20
    expected.extend_from_slice(&p1);
    expected.extend_from_slice(&p2);
    expected.extend_from_slice(&FIXED_SYNC);
    expected.extend_from_slice(&[0x02, 0x14]); // count 1, length 10
    expected.extend_from_slice(&p3);
    expected.extend_from_slice(&FIXED_SYNC);

    assert_eq!(bytes, expected);
    assert_eq!(header_len(&bytes), header.len());
}

#[test]
fn test_deflate_blocks_inflate_independently() {
    let schema = schema();
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(DeflateCodec::default()));
    let records: Vec<Vec<u8>> = (0..40).map(|id| encoded_event(&schema, id)).collect();
    for r in &records {
        w.append_encoded(r, 8).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let mut reader = Reader::new(bytes.as_slice(), Box::new(DeflateCodec::default())).unwrap();
    let mut idx = 0;
    while let Some(block) = reader.next_block().unwrap() {
        let expected = records[idx..idx + 8].concat();
        assert_eq!(block.count, 8);
        assert_eq!(block.payload, expected, "block {} payload", idx / 8);
        assert!(
            block.stored_len < expected.len() as u64,
            "repetitive records should shrink: stored={} raw={}",
            block.stored_len,
            expected.len()
        );
        idx += 8;
    }
    assert_eq!(idx, 40);
}

#[test]
fn test_flush_is_idempotent() {
    let schema = schema();
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    w.append_encoded(&encoded_event(&schema, 1), 10).unwrap();
    w.append_encoded(&encoded_event(&schema, 2), 10).unwrap();

    w.flush().unwrap();
    let after_first = w.get_ref().unwrap().len();
    w.flush().unwrap();
    assert_eq!(w.get_ref().unwrap().len(), after_first);
    assert_eq!(w.stats().unwrap().blocks_written, 1);

    let bytes = w.into_inner().unwrap();
    assert_eq!(bytes.len(), after_first);
    assert_eq!(read_with_reference(&bytes), vec![event(1), event(2)]);
}

#[test]
fn test_partial_trailing_block_on_close() {
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    for _ in 0..3 {
        w.append_encoded(b"\x02\x00", 5).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let blocks = read_blocks(&bytes, CODEC_NULL);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].0, 3);
}

#[test]
fn test_sync_marker_identical_in_header_and_blocks() {
    let schema = schema();
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    let marker = *w.sync_marker().unwrap();
    for id in 0..7 {
        w.append_encoded(&encoded_event(&schema, id), 2).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let reader = Reader::new(bytes.as_slice(), Box::new(NullCodec)).unwrap();
    assert_eq!(*reader.sync_marker(), marker);
    // Every block's trailing marker is compared against the header's.
    assert_eq!(reader.map(|b| b.unwrap()).count(), 4);

    // Each block ends in the marker; the last 16 bytes of the file are one.
    assert_eq!(&bytes[bytes.len() - SYNC_SIZE..], marker.as_bytes());
}

#[test]
fn test_direct_and_record_writers_are_byte_identical() {
    let schema = schema();
    let sync = SyncMarker::from_bytes(FIXED_SYNC);
    let values: Vec<Value> = (0..25).map(event).collect();

    for codec in [CODEC_NULL, CODEC_DEFLATE] {
        let mut direct = DirectBlockWriter::with_sync_marker(
            Vec::new(),
            SCHEMA,
            codec_by_name(codec).unwrap(),
            sync,
        );
        for id in 0..25 {
            direct.append_encoded(&encoded_event(&schema, id), 1).unwrap();
        }
        let direct_bytes = direct.into_inner().unwrap();

        let mut encoded = RecordWriter::with_sync_marker(
            Vec::new(),
            SCHEMA,
            codec_by_name(codec).unwrap(),
            AvroEncoder {
                schema: schema.clone(),
            },
            sync,
        );
        // A one-byte block size cuts a block after every record.
        encoded.set_block_size(1);
        for v in &values {
            encoded.append(v).unwrap();
        }
        let encoded_bytes = encoded.into_inner().unwrap();

        assert_eq!(direct_bytes, encoded_bytes, "codec {}", codec);
    }
}

#[test]
fn test_record_writer_cuts_blocks_by_size() {
    let schema = schema();
    let mut w = RecordWriter::new(
        Vec::new(),
        SCHEMA,
        Box::new(NullCodec),
        AvroEncoder {
            schema: schema.clone(),
        },
    );
    w.set_block_size(64);
    let values: Vec<Value> = (0..30).map(event).collect();
    for v in &values {
        w.append(v).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let blocks = read_blocks(&bytes, CODEC_NULL);
    assert!(blocks.len() > 1);
    for (_, payload) in &blocks[..blocks.len() - 1] {
        assert!(payload.len() >= 64);
    }
    assert_eq!(blocks.iter().map(|b| b.0).sum::<u64>(), 30);
    assert_eq!(read_with_reference(&bytes), values);
}

#[test]
fn test_failed_finalize_preserves_buffer() {
    let failing = Rc::new(Cell::new(true));
    let sink = FlakySink {
        data: Vec::new(),
        failing: failing.clone(),
    };
    let schema = schema();
    let mut w = DirectBlockWriter::new(sink, SCHEMA, Box::new(NullCodec));

    w.append_encoded(&encoded_event(&schema, 1), 2).unwrap();
    let err = w.append_encoded(&encoded_event(&schema, 2), 2).unwrap_err();
    assert!(matches!(err, OcfError::Io(_)), "got {err:?}");
    assert_eq!(w.pending_count(), 2, "failed block must stay buffered");
    assert_eq!(w.stats().unwrap().blocks_written, 0);
    assert!(w.is_poisoned());

    // Nothing joins the failed block, and nothing reaches the sink.
    failing.set(false);
    let err = w.append_encoded(&encoded_event(&schema, 3), 2).unwrap_err();
    assert!(matches!(err, OcfError::Poisoned), "got {err:?}");
    assert!(matches!(w.flush(), Err(OcfError::Poisoned)));
    assert!(matches!(w.close(), Err(OcfError::Poisoned)));
    assert_eq!(w.pending_count(), 2);
    assert!(w.get_ref().unwrap().data.is_empty());

    w.retry_pending().unwrap();
    assert_eq!(w.pending_count(), 0);
    assert!(!w.is_poisoned());
    w.append_encoded(&encoded_event(&schema, 3), 2).unwrap();

    let sink = w.into_inner().unwrap();
    let counts: Vec<u64> = read_blocks(&sink.data, CODEC_NULL).iter().map(|b| b.0).collect();
    assert_eq!(counts, vec![2, 1]);
    assert_eq!(
        read_with_reference(&sink.data),
        vec![event(1), event(2), event(3)]
    );
}

/// After a short write leaves half a header in the sink, dropping the writer
/// must not append anything behind it.
#[test]
fn test_drop_after_partial_write_leaves_sink_untouched() {
    let (sink, data, budget) = short_sink(10);
    let mut w = DirectBlockWriter::new(sink, SCHEMA, Box::new(NullCodec));

    let err = w.append_encoded(b"\x02", 1).unwrap_err();
    assert!(matches!(err, OcfError::Io(_)), "got {err:?}");
    assert_eq!(data.borrow().len(), 10);
    assert!(w.is_poisoned());

    budget.set(usize::MAX);
    drop(w);
    assert_eq!(data.borrow().len(), 10, "drop wrote into a poisoned sink");
}

#[test]
fn test_abandon_returns_sink_and_unwritten_records() {
    let (sink, data, _budget) = short_sink(10);
    let mut w = DirectBlockWriter::new(sink, SCHEMA, Box::new(NullCodec));
    assert!(w.append_encoded(b"\x02", 1).is_err());

    let abandoned = w.abandon().unwrap();
    assert_eq!(abandoned.pending, b"\x02".to_vec());
    assert_eq!(abandoned.pending_count, 1);
    assert_eq!(abandoned.sink.data.borrow().len(), 10);
    assert_eq!(data.borrow().len(), 10);
}

#[test]
fn test_record_writer_stops_after_sink_failure() {
    let failing = Rc::new(Cell::new(true));
    let sink = FlakySink {
        data: Vec::new(),
        failing: failing.clone(),
    };
    let encoder = AvroEncoder { schema: schema() };
    let mut w = RecordWriter::new(sink, SCHEMA, Box::new(NullCodec), encoder);
    w.set_block_size(1);

    assert!(matches!(w.append(&event(1)), Err(OcfError::Io(_))));
    failing.set(false);
    assert!(matches!(w.append(&event(2)), Err(OcfError::Poisoned)));

    w.retry_pending().unwrap();
    w.append(&event(2)).unwrap();
    let sink = w.into_inner().unwrap();
    assert_eq!(read_with_reference(&sink.data), vec![event(1), event(2)]);
}

#[test]
fn test_write_after_close_fails() {
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    w.append_encoded(b"\x02\x00", 10).unwrap();
    w.close().unwrap();
    assert!(w.is_closed());

    assert!(matches!(
        w.append_encoded(b"\x02\x00", 10),
        Err(OcfError::WriteAfterClose)
    ));
    assert!(matches!(w.flush(), Err(OcfError::WriteAfterClose)));
    // A closed writer reports closure, whatever the interval.
    assert!(matches!(
        w.append_encoded(b"\x02\x00", 0),
        Err(OcfError::WriteAfterClose)
    ));
    w.close().unwrap();
}

#[test]
fn test_zero_sync_interval_rejected() {
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    let err = w.append_encoded(b"\x02\x00", 0).unwrap_err();
    assert!(matches!(err, OcfError::InvalidSyncInterval(0)));
    assert_eq!(w.pending_count(), 0);
    assert!(w.set_sync_interval(0).is_err());
}

#[test]
fn test_unsupported_codec_rejected_by_name() {
    for name in ["snappy", "zstandard", "Deflate", ""] {
        let err = codec_by_name(name).err().unwrap();
        assert!(matches!(&err, OcfError::UnsupportedCodec(n) if n == name));
        assert!(err.to_string().contains(&format!("\"{}\"", name)));
    }
}

#[test]
fn test_empty_writer_produces_header_only_file() {
    let w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(DeflateCodec::default()));
    let bytes = w.into_inner().unwrap();

    assert_eq!(header_len(&bytes), bytes.len());
    assert!(read_with_reference(&bytes).is_empty());
}

#[test]
fn test_user_metadata() {
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    w.set_metadata("source.topic", "clicks").unwrap();
    assert!(matches!(
        w.set_metadata("avro.codec", "deflate"),
        Err(OcfError::ReservedMetadataKey(_))
    ));
    w.append_encoded(&encoded_event(&schema(), 1), 1).unwrap();
    assert!(matches!(
        w.set_metadata("late", "value"),
        Err(OcfError::HeaderAlreadyWritten)
    ));
    let bytes = w.into_inner().unwrap();

    let reader = Reader::new(bytes.as_slice(), Box::new(NullCodec)).unwrap();
    assert_eq!(
        reader.header().metadata.get("source.topic").map(Vec::as_slice),
        Some(b"clicks".as_slice())
    );
    assert_eq!(reader.schema(), Some(SCHEMA));
    assert_eq!(read_with_reference(&bytes), vec![event(1)]);
}

#[test]
fn test_reader_codec_mismatch_error() {
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(DeflateCodec::default()));
    w.append_encoded(b"\x02\x00", 1).unwrap();
    let bytes = w.into_inner().unwrap();

    let err = Reader::new(bytes.as_slice(), Box::new(NullCodec)).err().unwrap();
    assert!(
        err.to_string().contains("codec mismatch"),
        "error message should mention codec mismatch, got: {err}"
    );
}

/// A file cut inside the last block still yields every complete block.
#[test]
fn test_truncated_file_readable_up_to_last_block() {
    let mut w = DirectBlockWriter::new(Vec::new(), SCHEMA, Box::new(NullCodec));
    for _ in 0..6 {
        w.append_encoded(b"\x02\x00", 2).unwrap();
    }
    let mut bytes = w.into_inner().unwrap();
    bytes.truncate(bytes.len() - 5);

    let mut reader = Reader::new(bytes.as_slice(), Box::new(NullCodec)).unwrap();
    assert_eq!(reader.next_block().unwrap().unwrap().count, 2);
    assert_eq!(reader.next_block().unwrap().unwrap().count, 2);
    assert!(matches!(reader.next_block(), Err(OcfError::Truncated)));
}

#[test]
fn test_drop_finalizes_pending_block_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drop.avro");
    let schema = schema();
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut w = DirectBlockWriter::new(
            io::BufWriter::new(file),
            SCHEMA,
            Box::new(DeflateCodec::default()),
        );
        for id in 0..3 {
            w.append_encoded(&encoded_event(&schema, id), 10).unwrap();
        }
    }

    let mut reader = Reader::open(&path, Box::new(DeflateCodec::default())).unwrap();
    let block = reader.next_block().unwrap().unwrap();
    assert_eq!(block.count, 3);
    assert!(reader.next_block().unwrap().is_none());

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(read_with_reference(&bytes), (0..3).map(event).collect::<Vec<_>>());
}
