use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{escape_into, FrameConfig, DELIMITER};
use crate::error::{FrameError, Result};
use crate::marker::Marker;

/// Writes delimited frames to any `AsyncWrite` stream.
///
/// Payload bytes are escaped into an internal buffer as they are handed
/// in and hit the stream once `write_buffer_size` bytes are pending or the
/// frame is ended. Every await point leaves the writer in a state where
/// the interrupted call can be issued again without losing or repeating
/// bytes.
pub struct DelimitedWriter<W> {
    inner: W,
    buf: BytesMut,
    scratch: BytesMut,
    /// Last payload byte, held back when it may start an escaped pattern.
    held: Option<u8>,
    /// The delimiter for the current frame is already in `buf`.
    terminated: bool,
    config: FrameConfig,
}

impl<W: AsyncWrite + Unpin> DelimitedWriter<W> {
    /// Create a new writer with default configuration.
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new writer with explicit configuration.
    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(config.write_buffer_size),
            scratch: BytesMut::new(),
            held: None,
            terminated: false,
            config,
        }
    }

    /// Append payload bytes to the current frame.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.push(chunk);
        if self.buf.len() >= self.config.write_buffer_size {
            self.drain().await?;
        }
        Ok(())
    }

    /// Copy `src` to EOF into the current frame, returning the number of
    /// payload bytes read from it.
    pub async fn copy_from<R: AsyncRead + Unpin>(&mut self, src: &mut R) -> Result<u64> {
        let mut total = 0u64;
        loop {
            self.scratch.reserve(self.config.write_buffer_size);
            let n = src.read_buf(&mut self.scratch).await?;
            if n == 0 {
                return Ok(total);
            }
            let chunk = self.scratch.split();
            self.push(&chunk);
            total += n as u64;
            if self.buf.len() >= self.config.write_buffer_size {
                self.drain().await?;
            }
        }
    }

    /// Finish the current frame: flush the buffer, append the unescaped
    /// delimiter, and flush the stream.
    ///
    /// Returns the number of bytes written to the stream by this call.
    pub async fn end(&mut self) -> Result<usize> {
        if !self.terminated {
            if let Some(b) = self.held.take() {
                self.buf.extend_from_slice(&[b]);
            }
            self.buf.extend_from_slice(&DELIMITER);
            self.terminated = true;
        }

        let written = self.drain().await?;
        self.flush().await?;
        self.terminated = false;
        trace!(bytes = written, "frame flushed");
        Ok(written)
    }

    /// Write one complete frame.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<usize> {
        self.write_chunk(payload).await?;
        self.end().await
    }

    /// Write a marker between frames: its escaped control line and an
    /// unescaped `\r\n\r\n`.
    ///
    /// Resumable like [`end`](Self::end). Returns the number of bytes
    /// written to the stream by this call.
    pub async fn write_marker(&mut self, marker: &Marker) -> Result<usize> {
        if !self.terminated {
            self.push(&marker.line());
            if let Some(b) = self.held.take() {
                self.buf.extend_from_slice(&[b]);
            }
            self.buf.extend_from_slice(&DELIMITER);
            self.buf.extend_from_slice(&DELIMITER);
            self.terminated = true;
        }

        let written = self.drain().await?;
        self.flush().await?;
        self.terminated = false;
        trace!(bytes = written, "marker flushed");
        Ok(written)
    }

    /// Flush the underlying stream without ending the frame.
    pub async fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush().await {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.terminated = false;
        let escape = self.config.escape;

        let rest = match self.held.take() {
            Some(b) => {
                let pair = [b, chunk[0]];
                if pair == escape || pair == DELIMITER {
                    self.buf.extend_from_slice(&escape);
                    self.buf.extend_from_slice(&pair);
                    &chunk[1..]
                } else {
                    self.buf.extend_from_slice(&[b]);
                    chunk
                }
            }
            None => chunk,
        };

        let consumed = escape_into(rest, escape, false, &mut self.buf);
        if consumed < rest.len() {
            self.held = Some(rest[consumed]);
        }
    }

    async fn drain(&mut self) -> Result<usize> {
        let mut written = 0usize;
        while !self.buf.is_empty() {
            // `write` is cancel safe: a dropped call wrote nothing.
            match self.inner.write(&self.buf).await {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.advance(n);
                    written += n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(written)
    }

    /// Escaped bytes waiting to be written.
    pub fn pending(&self) -> usize {
        self.buf.len() + usize::from(self.held.is_some())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream. Pending bytes are
    /// discarded.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
