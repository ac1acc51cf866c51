use std::io::{ErrorKind, Read};

/// Largest single record accepted from the input stream.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Reads `[len: u32 BE][len bytes]` frames, each one pre-encoded record.
pub struct FrameReader<R: Read> {
    inner: R,
    frames_read: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames_read: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Next record, or `None` on a clean end of input between frames.
    pub fn next_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.inner.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => anyhow::bail!(
                    "input ends inside the length prefix of frame {}",
                    self.frames_read
                ),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            anyhow::bail!(
                "frame {} declares {} bytes (limit {})",
                self.frames_read,
                len,
                MAX_FRAME_LEN
            );
        }
        let mut record = vec![0u8; len as usize];
        self.inner.read_exact(&mut record).map_err(|e| {
            anyhow::anyhow!("reading {} bytes of frame {}: {}", len, self.frames_read, e)
        })?;
        self.frames_read += 1;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn reads_frames_until_eof() {
        let mut input = frame(b"abc");
        input.extend(frame(b""));
        input.extend(frame(&[0u8; 300]));

        let mut frames = FrameReader::new(input.as_slice());
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"abc");
        assert!(frames.next_frame().unwrap().unwrap().is_empty());
        assert_eq!(frames.next_frame().unwrap().unwrap().len(), 300);
        assert!(frames.next_frame().unwrap().is_none());
        assert_eq!(frames.frames_read(), 3);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut input = frame(b"abcdef");
        input.truncate(7);
        let mut frames = FrameReader::new(input.as_slice());
        assert!(frames.next_frame().is_err());
    }

    #[test]
    fn truncated_prefix_is_an_error() {
        let mut frames = FrameReader::new([0u8, 0].as_slice());
        let err = frames.next_frame().unwrap_err();
        assert!(err.to_string().contains("length prefix"));
    }

    #[test]
    fn oversized_frame_rejected() {
        let input = u32::MAX.to_be_bytes();
        let mut frames = FrameReader::new(input.as_slice());
        assert!(frames.next_frame().is_err());
    }
}
