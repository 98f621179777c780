//! Trigno SDK server protocol
//!
//! Command channel: ASCII commands terminated by `\r\n`; a command batch is
//! terminated by one extra blank `\r\n`, and the server replies with one line
//! per command in issue order. Data channel: frames of 16 little-endian f32
//! (one slot per possible sensor), no delimiters; framing is purely by byte
//! count.

use crate::error::{Error, Result};
use std::io::Read;

/// Command channel port on the base station
pub const COMMAND_PORT: u16 = 50040;
/// EMG data channel port
pub const EMG_DATA_PORT: u16 = 50043;
/// Auxiliary (IMU/accelerometer) data channel port
pub const AUX_DATA_PORT: u16 = 50044;

/// Sensor slots on the base station (1-based on the wire)
pub const EMG_SLOT_COUNT: usize = 16;
/// Floats per data frame, one per slot
pub const FRAME_FLOATS: usize = EMG_SLOT_COUNT;
/// Bytes per data frame
pub const FRAME_LEN: usize = FRAME_FLOATS * 4;

/// Encode one command as its own batch: `CMD\r\n\r\n`
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(cmd.len() + 4);
    out.extend_from_slice(cmd.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// Encode a multi-command batch: each command `\r\n`-terminated, then the
/// blank `\r\n` that tells the server to process the batch.
pub fn encode_batch(cmds: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for cmd in cmds {
        out.extend_from_slice(cmd.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Decode one complete data frame into per-slot readings
pub fn decode_frame(buf: &[u8; FRAME_LEN]) -> [f32; FRAME_FLOATS] {
    let mut out = [0.0f32; FRAME_FLOATS];
    for (i, value) in out.iter_mut().enumerate() {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&buf[i * 4..i * 4 + 4]);
        *value = f32::from_le_bytes(raw);
    }
    out
}

/// Accumulates bytes from the data channel until a whole frame is present.
///
/// A short read never produces values: partial bytes are carried across
/// calls and a frame is only decoded once all [`FRAME_LEN`] bytes arrived.
pub struct FrameReader {
    buf: [u8; FRAME_LEN],
    filled: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: [0u8; FRAME_LEN],
            filled: 0,
        }
    }

    /// Bytes currently buffered toward the next frame
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Pull bytes from `reader` until one frame completes or the read blocks.
    ///
    /// Returns `Ok(None)` when the reader timed out mid-frame; the partial
    /// bytes stay buffered for the next call. A clean EOF is a transport
    /// error: the data channel never closes mid-session.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<[f32; FRAME_FLOATS]>> {
        while self.filled < FRAME_LEN {
            match reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    return Err(Error::InvalidFrame(
                        "data channel closed mid-stream".into(),
                    ))
                }
                Ok(n) => self.filled += n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        self.filled = 0;
        Ok(Some(decode_frame(&self.buf)))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader that hands out scripted chunks, blocking in between
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Err(std::io::Error::from(std::io::ErrorKind::WouldBlock)),
            }
        }
    }

    fn frame_bytes(values: [f32; FRAME_FLOATS]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_encode_command_terminators() {
        assert_eq!(encode_command("START"), b"START\r\n\r\n");
    }

    #[test]
    fn test_encode_batch_blank_line_terminator() {
        let batch = encode_batch(&["ENDIAN LITTLE", "SENSOR 1 PAIRED?"]);
        assert_eq!(batch, b"ENDIAN LITTLE\r\nSENSOR 1 PAIRED?\r\n\r\n");
    }

    #[test]
    fn test_decode_frame_little_endian() {
        let mut values = [0.0f32; FRAME_FLOATS];
        values[0] = 1.5;
        values[4] = -2.25;
        values[15] = 1e-3;
        let raw = frame_bytes(values);
        let mut buf = [0u8; FRAME_LEN];
        buf.copy_from_slice(&raw);

        let decoded = decode_frame(&buf);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_frame_reader_completes_short_reads() {
        let mut values = [0.0f32; FRAME_FLOATS];
        values[2] = 42.0;
        let raw = frame_bytes(values);

        // frame split across three reads with a stall in the middle
        let mut reader = ChunkedReader {
            chunks: VecDeque::from(vec![raw[..10].to_vec()]),
        };
        let mut fr = FrameReader::new();

        // stalls mid-frame: no sample, bytes retained
        assert!(fr.read_frame(&mut reader).unwrap().is_none());
        assert_eq!(fr.pending(), 10);

        reader.chunks.push_back(raw[10..40].to_vec());
        reader.chunks.push_back(raw[40..].to_vec());
        let decoded = fr.read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(decoded, values);
        assert_eq!(fr.pending(), 0);
    }

    #[test]
    fn test_frame_reader_eof_is_an_error() {
        let data = vec![0u8; 10];
        let mut cursor = std::io::Cursor::new(data);
        let mut fr = FrameReader::new();
        assert!(fr.read_frame(&mut cursor).is_err());
    }
}
