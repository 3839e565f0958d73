use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Terminates every frame on the wire.
pub const DELIMITER: [u8; 2] = *b"\r\n";

/// Default escape sequence.
pub const DEFAULT_ESCAPE: [u8; 2] = *b"/&";

/// Default read and write buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default maximum decoded frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Configuration for the delimited codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Two-byte escape sequence. Default: `/&`.
    pub escape: [u8; 2],
    /// Bytes requested from the stream per read. Default: 4096.
    pub read_buffer_size: usize,
    /// Escaped bytes buffered before a write hits the stream. Default: 4096.
    pub write_buffer_size: usize,
    /// Largest decoded frame accepted by whole-frame reads. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            escape: DEFAULT_ESCAPE,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME,
        }
    }
}

impl FrameConfig {
    pub fn with_escape(mut self, escape: [u8; 2]) -> Self {
        self.escape = escape;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Check that the escape sequence keeps the framing unambiguous.
    ///
    /// The escape must differ from the delimiter, its two bytes must
    /// differ, and it must not overlap the delimiter (`e0 != '\n'`,
    /// `e1 != '\r'`). Buffer sizes must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let [e0, e1] = self.escape;
        if self.escape == DELIMITER {
            return Err(FrameError::InvalidConfig(
                "escape sequence equals the delimiter".to_string(),
            ));
        }
        if e0 == e1 {
            return Err(FrameError::InvalidConfig(
                "escape sequence bytes must differ".to_string(),
            ));
        }
        if e0 == DELIMITER[1] || e1 == DELIMITER[0] {
            return Err(FrameError::InvalidConfig(
                "escape sequence overlaps the delimiter".to_string(),
            ));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(FrameError::InvalidConfig(
                "buffer sizes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Escape `src` into `dst`, scanning left to right.
///
/// An occurrence of `escape` becomes `escape escape`; an occurrence of
/// [`DELIMITER`] becomes `escape DELIMITER`. Returns the number of bytes of
/// `src` consumed. When `last` is false, a trailing byte that may start a
/// pattern completed by the next chunk is left unconsumed.
pub fn escape_into(src: &[u8], escape: [u8; 2], last: bool, dst: &mut BytesMut) -> usize {
    dst.reserve(src.len());
    let mut run_start = 0;
    let mut i = 0;
    while i < src.len() {
        let b = src[i];
        if b != escape[0] && b != DELIMITER[0] {
            i += 1;
            continue;
        }
        if i + 1 == src.len() {
            if !last {
                break;
            }
            i += 1;
            continue;
        }
        let pair = [b, src[i + 1]];
        if pair == escape || pair == DELIMITER {
            dst.extend_from_slice(&src[run_start..i]);
            dst.extend_from_slice(&escape);
            dst.extend_from_slice(&pair);
            i += 2;
            run_start = i;
        } else {
            i += 1;
        }
    }
    dst.extend_from_slice(&src[run_start..i]);
    i
}

/// Outcome of one [`unescape_into`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unescape {
    /// Input exhausted (or ends in an incomplete pattern) before a delimiter.
    NeedMore,
    /// A delimiter was consumed; the frame is complete.
    End,
}

/// Reverse [`escape_into`] over `src`, appending decoded bytes to `dst`.
///
/// Stops right after the first unescaped delimiter. Returns how many bytes
/// of `src` were consumed; unconsumed bytes are either part of an
/// incomplete pattern or belong to the next frame.
pub fn unescape_into(src: &[u8], escape: [u8; 2], dst: &mut BytesMut) -> Result<(usize, Unescape)> {
    let mut run_start = 0;
    let mut i = 0;
    loop {
        if i >= src.len() {
            break;
        }
        let b = src[i];
        if b != escape[0] && b != DELIMITER[0] {
            i += 1;
            continue;
        }
        if i + 1 >= src.len() {
            break;
        }
        let pair = [b, src[i + 1]];
        if pair == DELIMITER {
            dst.extend_from_slice(&src[run_start..i]);
            return Ok((i + 2, Unescape::End));
        }
        if pair == escape {
            if i + 4 > src.len() {
                break;
            }
            let literal = [src[i + 2], src[i + 3]];
            if literal != escape && literal != DELIMITER {
                return Err(FrameError::InvalidEscape { found: literal });
            }
            dst.extend_from_slice(&src[run_start..i]);
            dst.extend_from_slice(&literal);
            i += 4;
            run_start = i;
            continue;
        }
        i += 1;
    }
    dst.extend_from_slice(&src[run_start..i]);
    Ok((i, Unescape::NeedMore))
}

/// Encode one complete frame: escaped payload followed by the delimiter.
pub fn encode_frame(payload: &[u8], escape: [u8; 2], dst: &mut BytesMut) {
    escape_into(payload, escape, true, dst);
    dst.extend_from_slice(&DELIMITER);
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if `src` doesn't contain a complete frame yet; `src`
/// is only consumed when a frame is returned.
pub fn decode_frame(src: &mut BytesMut, escape: [u8; 2], max_frame: usize) -> Result<Option<Bytes>> {
    let mut out = BytesMut::new();
    let (consumed, outcome) = unescape_into(src, escape, &mut out)?;
    if out.len() > max_frame {
        return Err(FrameError::FrameTooLarge {
            size: out.len(),
            max: max_frame,
        });
    }
    match outcome {
        Unescape::End => {
            src.advance(consumed);
            Ok(Some(out.freeze()))
        }
        Unescape::NeedMore => Ok(None),
    }
}

/// Delimited framing as a `tokio_util` codec.
///
/// Decoding is incremental: bytes are unescaped as they arrive and kept in
/// an internal buffer until the delimiter shows up.
#[derive(Debug)]
pub struct DelimitedCodec {
    escape: [u8; 2],
    max_frame_size: usize,
    partial: BytesMut,
}

impl DelimitedCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            escape: config.escape,
            max_frame_size: config.max_frame_size,
            partial: BytesMut::new(),
        }
    }
}

impl Default for DelimitedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DelimitedCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let (consumed, outcome) = unescape_into(src, self.escape, &mut self.partial)?;
        src.advance(consumed);
        if self.partial.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: self.partial.len(),
                max: self.max_frame_size,
            });
        }
        match outcome {
            Unescape::End => Ok(Some(self.partial.split().freeze())),
            Unescape::NeedMore => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.partial.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for DelimitedCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.as_ref(), self.escape, dst);
        Ok(())
    }
}
