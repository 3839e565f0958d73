use std::io::ErrorKind;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{unescape_into, FrameConfig, Unescape};
use crate::error::{FrameError, Result};
use crate::marker::Marker;

/// Result of one [`DelimitedReader::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// `n` decoded bytes of the current frame were appended.
    Data(usize),
    /// The current frame's delimiter was consumed. This is the normal end
    /// of one frame, not a fault.
    End,
}

/// Reads delimited frames from any `AsyncRead` stream.
///
/// Raw bytes past the end of a frame stay buffered for the next one.
/// [`read`](Self::read) and [`read_frame`](Self::read_frame) keep all
/// progress inside the reader, so a call dropped at an await point (for
/// example by a deadline) can simply be issued again.
pub struct DelimitedReader<R> {
    inner: R,
    raw: BytesMut,
    frame: BytesMut,
    pending_end: bool,
    /// Bytes handed out by `read` for the current frame.
    frame_len: usize,
    /// Control line of a marker whose blank line has not arrived yet.
    marker_line: Option<Bytes>,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> DelimitedReader<R> {
    /// Create a new reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new reader with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner,
            raw: BytesMut::with_capacity(config.read_buffer_size),
            frame: BytesMut::new(),
            pending_end: false,
            frame_len: 0,
            marker_line: None,
            config,
        }
    }

    /// Decode the next piece of the current frame into `dst`.
    ///
    /// Returns [`Segment::Data`] with the number of bytes appended, or
    /// [`Segment::End`] once the delimiter has been consumed. Bytes decoded
    /// in the same pass as the delimiter are returned as `Data` first.
    ///
    /// A frame whose decoded length passes `max_frame_size` fails with
    /// [`FrameError::FrameTooLarge`], counted across calls.
    pub async fn read(&mut self, dst: &mut BytesMut) -> Result<Segment> {
        if self.pending_end {
            self.pending_end = false;
            self.frame_len = 0;
            return Ok(Segment::End);
        }

        loop {
            let before = dst.len();
            let (consumed, outcome) = unescape_into(&self.raw, self.config.escape, dst)?;
            self.raw.advance(consumed);
            let decoded = dst.len() - before;

            self.frame_len += decoded;
            if self.frame_len > self.config.max_frame_size {
                let size = self.frame_len;
                self.frame_len = 0;
                return Err(FrameError::FrameTooLarge {
                    size,
                    max: self.config.max_frame_size,
                });
            }

            match outcome {
                Unescape::End if decoded > 0 => {
                    self.pending_end = true;
                    return Ok(Segment::Data(decoded));
                }
                Unescape::End => {
                    self.frame_len = 0;
                    return Ok(Segment::End);
                }
                Unescape::NeedMore if decoded > 0 => return Ok(Segment::Data(decoded)),
                Unescape::NeedMore => {}
            }

            self.fill().await?;
        }
    }

    /// Read one whole frame (bounded by `max_frame_size`).
    ///
    /// After a partial [`read`](Self::read), returns what is left of the
    /// current frame.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        if self.pending_end {
            self.pending_end = false;
            self.frame_len = 0;
            return Ok(self.frame.split().freeze());
        }

        loop {
            let (consumed, outcome) = unescape_into(&self.raw, self.config.escape, &mut self.frame)?;
            self.raw.advance(consumed);

            if self.frame.len() > self.config.max_frame_size {
                let size = self.frame.len();
                self.frame.clear();
                return Err(FrameError::FrameTooLarge {
                    size,
                    max: self.config.max_frame_size,
                });
            }
            if outcome == Unescape::End {
                self.frame_len = 0;
                return Ok(self.frame.split().freeze());
            }

            self.fill().await?;
        }
    }

    /// Read an `NX` / `DX` marker: its control line followed by the blank
    /// line that completes the `\r\n\r\n` terminator.
    ///
    /// Resumable like [`read_frame`](Self::read_frame).
    pub async fn read_marker(&mut self) -> Result<Marker> {
        if self.marker_line.is_none() {
            let line = self.read_frame().await?;
            self.marker_line = Some(line);
        }

        let blank = match self.read_frame().await {
            Ok(blank) => blank,
            Err(err) => {
                self.marker_line = None;
                return Err(err);
            }
        };
        let line = self.marker_line.take().unwrap_or_default();
        if !blank.is_empty() {
            return Err(FrameError::InvalidMarker(
                "control line is not followed by a blank line".to_string(),
            ));
        }
        Marker::decode(&line)
    }

    /// Copy the rest of the current frame into `sink`, returning the
    /// number of decoded bytes written.
    ///
    /// Unlike [`read_frame`](Self::read_frame) this is not resumable: bytes
    /// decoded but not yet written are lost if the future is dropped.
    pub async fn copy_frame_to<W: AsyncWrite + Unpin>(&mut self, sink: &mut W) -> Result<u64> {
        let mut chunk = BytesMut::with_capacity(self.config.read_buffer_size);
        let mut total = 0u64;
        loop {
            match self.read(&mut chunk).await? {
                Segment::Data(n) => {
                    sink.write_all(&chunk).await?;
                    chunk.clear();
                    total += n as u64;
                }
                Segment::End => {
                    sink.flush().await?;
                    return Ok(total);
                }
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.raw.reserve(self.config.read_buffer_size);
        loop {
            match self.inner.read_buf(&mut self.raw).await {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    trace!(bytes = n, "read raw bytes");
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Raw bytes received but not decoded yet.
    pub fn buffered(&self) -> &[u8] {
        &self.raw
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use bytes::BytesMut;
    use tokio::io::ReadBuf;

    use super::*;
    use crate::codec::{encode_frame, DEFAULT_ESCAPE};

    fn wire(frames: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, DEFAULT_ESCAPE, &mut buf);
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn read_single_frame() {
        let mut reader = DelimitedReader::new(Cursor::new(wire(&[b"hello"])));
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn read_multiple_frames_keeps_trailing_bytes() {
        let mut reader =
            DelimitedReader::new(Cursor::new(wire(&[b"one", b"t\r\nwo", b"", b"three"])));

        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"one");
        assert!(!reader.buffered().is_empty());
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"t\r\nwo");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"three");
    }

    #[tokio::test]
    async fn read_reports_data_then_end() {
        let mut reader = DelimitedReader::new(Cursor::new(wire(&[b"abc"])));
        let mut dst = BytesMut::new();
        assert_eq!(reader.read(&mut dst).await.unwrap(), Segment::Data(3));
        assert_eq!(reader.read(&mut dst).await.unwrap(), Segment::End);
        assert_eq!(dst.as_ref(), b"abc");
    }

    #[tokio::test]
    async fn byte_by_byte_stream() {
        let payload = b"/&x\r\ny\r/\n";
        let reader = ByteByByteReader {
            bytes: wire(&[payload]),
            pos: 0,
        };
        let mut reader = DelimitedReader::new(reader);
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), payload);
    }

    #[tokio::test]
    async fn small_read_buffer() {
        let payload = vec![b'\r'; 1000];
        let cfg = FrameConfig::default().with_read_buffer_size(3);
        let mut reader = DelimitedReader::with_config(Cursor::new(wire(&[&payload])), cfg);
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn connection_closed_cleanly() {
        let mut reader = DelimitedReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_frame() {
        let mut reader = DelimitedReader::new(Cursor::new(b"no-delimiter".to_vec()));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_frame_in_stream() {
        let cfg = FrameConfig::default().with_max_frame_size(8);
        let mut reader =
            DelimitedReader::with_config(Cursor::new(wire(&[b"way too long for this"])), cfg);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { max: 8, .. }));
    }

    #[tokio::test]
    async fn read_counts_frame_length_across_calls() {
        let cfg = FrameConfig::default()
            .with_read_buffer_size(4)
            .with_max_frame_size(8);
        let mut reader =
            DelimitedReader::with_config(Cursor::new(b"aaaaaaaaaaaa\r\n".to_vec()), cfg);
        let mut dst = BytesMut::new();

        let err = loop {
            match reader.read(&mut dst).await {
                Ok(Segment::Data(_)) => {
                    dst.clear();
                }
                Ok(Segment::End) => panic!("oversized frame should not complete"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, FrameError::FrameTooLarge { max: 8, .. }));
    }

    #[tokio::test]
    async fn frame_length_limit_resets_between_frames() {
        let cfg = FrameConfig::default().with_max_frame_size(4);
        let mut reader = DelimitedReader::with_config(Cursor::new(wire(&[b"abcd", b"efgh"])), cfg);
        let mut dst = BytesMut::new();
        for _ in 0..2 {
            assert_eq!(reader.read(&mut dst).await.unwrap(), Segment::Data(4));
            assert_eq!(reader.read(&mut dst).await.unwrap(), Segment::End);
        }
        assert_eq!(dst.as_ref(), b"abcdefgh");
    }

    #[tokio::test]
    async fn read_marker_from_exact_wire_bytes() {
        let wire = b"NX 5\r\n\r\nDX h d\r\n\r\nafter\r\n".to_vec();
        let mut reader = DelimitedReader::new(Cursor::new(wire));
        assert_eq!(reader.read_marker().await.unwrap(), Marker::Next { len: 5 });
        assert_eq!(
            reader.read_marker().await.unwrap(),
            Marker::data("h", "d").unwrap()
        );
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"after");
    }

    #[tokio::test]
    async fn marker_without_blank_line_is_rejected() {
        let mut reader = DelimitedReader::new(Cursor::new(b"NX 5\r\nbody\r\n".to_vec()));
        let err = reader.read_marker().await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidMarker(_)));
    }

    #[tokio::test]
    async fn read_marker_resumes_after_cancellation() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = DelimitedReader::new(rx);

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"NX 42\r\n").await.unwrap();
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.read_marker()).await;
        assert!(timed_out.is_err());

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"\r\n").await.unwrap();
        assert_eq!(reader.read_marker().await.unwrap(), Marker::Next { len: 42 });
    }

    #[tokio::test]
    async fn copy_frame_into_sink() {
        let mut reader = DelimitedReader::new(Cursor::new(wire(&[b"copy\r\nme", b"next"])));
        let mut sink = Vec::new();
        let copied = reader.copy_frame_to(&mut sink).await.unwrap();
        assert_eq!(copied, 8);
        assert_eq!(sink, b"copy\r\nme");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"next");
    }

    #[tokio::test]
    async fn read_frame_resumes_after_cancellation() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = DelimitedReader::new(rx);

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"par").await.unwrap();
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.read_frame()).await;
        assert!(timed_out.is_err());

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"tial\r\n").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"partial");
    }

    #[tokio::test]
    async fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[b"ok"])),
        };
        let mut framed = DelimitedReader::new(reader);
        assert_eq!(framed.read_frame().await.unwrap().as_ref(), b"ok");
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for ByteByByteReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos < self.bytes.len() && buf.remaining() > 0 {
                let byte = self.bytes[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl AsyncRead for InterruptedThenData {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if !self.interrupted {
                self.interrupted = true;
                return Poll::Ready(Err(std::io::Error::from(ErrorKind::Interrupted)));
            }
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }
}
