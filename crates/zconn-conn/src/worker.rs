use tokio::io::{AsyncRead, AsyncWrite};
use zconn_frame::{DelimitedReader, DelimitedWriter, Segment};
use zconn_transport::TransportKind;

use crate::error::{ConnError, Result};
use crate::payload::Payload;

/// How one operation moves bytes between a payload and the codec.
///
/// Picked once per connection from the stream's [`TransportKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    /// One frame per operation over a reliable byte stream.
    Stream,
    /// Placeholder: every operation fails with `ConnError::Unsupported`.
    Datagram,
}

impl Worker {
    pub fn for_kind(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Stream => Worker::Stream,
            TransportKind::Datagram => Worker::Datagram,
        }
    }

    /// Decode the next frame into the payload's data stream.
    ///
    /// Decoded bytes land in the data stream as they arrive, so a call
    /// dropped by a deadline can be repeated with the same payload.
    pub async fn serve_read<R>(self, reader: &mut DelimitedReader<R>, payload: &mut Payload) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        match self {
            Worker::Stream => {
                let sink = payload.data_mut()?.sink()?;
                loop {
                    if reader.read(sink).await? == Segment::End {
                        return Ok(());
                    }
                }
            }
            Worker::Datagram => Err(ConnError::Unsupported(TransportKind::Datagram)),
        }
    }

    /// Copy the payload's data stream into the current frame and close
    /// the source. The caller ends the frame.
    pub async fn serve_write<W>(self, writer: &mut DelimitedWriter<W>, payload: &mut Payload) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            Worker::Stream => {
                let source = payload.data_mut()?;
                writer.copy_from(source).await?;
                source.close();
                Ok(())
            }
            Worker::Datagram => Err(ConnError::Unsupported(TransportKind::Datagram)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::payload::DataStream;

    #[test]
    fn selection_follows_transport_kind() {
        assert_eq!(Worker::for_kind(TransportKind::Stream), Worker::Stream);
        assert_eq!(Worker::for_kind(TransportKind::Datagram), Worker::Datagram);
    }

    #[tokio::test]
    async fn stream_read_fills_payload() {
        let mut reader = DelimitedReader::new(Cursor::new(b"a/&\r\nb\r\nnext\r\n".to_vec()));
        let (mut payload, _receipt) = Payload::new();

        Worker::Stream.serve_read(&mut reader, &mut payload).await.unwrap();
        assert_eq!(payload.data().unwrap().as_bytes(), b"a\r\nb");
    }

    #[tokio::test]
    async fn stream_write_drains_and_closes_source() {
        let mut writer = DelimitedWriter::new(Vec::new());
        let (mut payload, _receipt) = Payload::new();
        payload.set_data(DataStream::from(&b"x\r\ny"[..]));

        Worker::Stream.serve_write(&mut writer, &mut payload).await.unwrap();
        writer.end().await.unwrap();

        let data = payload.data().unwrap();
        assert!(data.is_empty());
        assert!(data.is_closed());
        assert_eq!(writer.into_inner(), b"x/&\r\ny\r\n");
    }

    #[tokio::test]
    async fn datagram_is_unsupported() {
        let mut reader = DelimitedReader::new(Cursor::new(Vec::new()));
        let mut writer = DelimitedWriter::new(Vec::new());
        let (mut payload, _receipt) = Payload::new();

        let read = Worker::Datagram.serve_read(&mut reader, &mut payload).await;
        assert!(matches!(read, Err(ConnError::Unsupported(TransportKind::Datagram))));
        let write = Worker::Datagram.serve_write(&mut writer, &mut payload).await;
        assert!(matches!(write, Err(ConnError::Unsupported(TransportKind::Datagram))));
    }
}
