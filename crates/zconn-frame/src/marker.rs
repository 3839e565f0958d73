//! `NX` / `DX` control lines.
//!
//! On the wire a marker is its control line followed by an unescaped
//! `\r\n\r\n`: the line is one frame, and the second delimiter closes an
//! empty frame. Bytes inside the line that collide with the delimiter or
//! the escape sequence are escaped like any frame payload, so a marker
//! whose data is plain text appears byte for byte as `DX {HEADER} {DATA}\r\n\r\n`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{encode_frame, DEFAULT_ESCAPE, DELIMITER};
use crate::error::{FrameError, Result};

const NEXT_TAG: &[u8] = b"NX ";
const DATA_TAG: &[u8] = b"DX ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Declares the byte length of the message that follows.
    Next { len: u64 },
    /// A payload carried together with a header field.
    Data { header: Bytes, data: Bytes },
}

impl Marker {
    /// Build a `DX` marker, rejecting headers that could not be parsed back.
    pub fn data(header: impl Into<Bytes>, data: impl Into<Bytes>) -> Result<Self> {
        let header = header.into();
        check_header(&header)?;
        Ok(Self::Data {
            header,
            data: data.into(),
        })
    }

    /// Append the control line, without its terminator.
    pub fn encode_line(&self, dst: &mut BytesMut) {
        match self {
            Marker::Next { len } => {
                dst.put_slice(NEXT_TAG);
                dst.put_slice(len.to_string().as_bytes());
            }
            Marker::Data { header, data } => {
                dst.reserve(DATA_TAG.len() + header.len() + 1 + data.len());
                dst.put_slice(DATA_TAG);
                dst.put_slice(header);
                dst.put_u8(b' ');
                dst.put_slice(data);
            }
        }
    }

    pub fn line(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_line(&mut buf);
        buf.freeze()
    }

    /// Append the wire form: the escaped line and `\r\n\r\n`.
    pub fn encode(&self, escape: [u8; 2], dst: &mut BytesMut) {
        encode_frame(&self.line(), escape, dst);
        dst.extend_from_slice(&DELIMITER);
    }

    /// Wire form under the default escape sequence.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(DEFAULT_ESCAPE, &mut buf);
        buf.freeze()
    }

    /// Parse a decoded control line.
    pub fn decode(line: &[u8]) -> Result<Self> {
        if let Some(len) = line.strip_prefix(NEXT_TAG) {
            let text = std::str::from_utf8(len).map_err(|_| invalid("NX length is not ASCII"))?;
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("NX length is not a decimal integer"));
            }
            let len = text
                .parse::<u64>()
                .map_err(|_| invalid("NX length overflows u64"))?;
            return Ok(Marker::Next { len });
        }

        if let Some(rest) = line.strip_prefix(DATA_TAG) {
            let split = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| invalid("DX header is not followed by a space"))?;
            let header = &rest[..split];
            check_header(header)?;
            return Ok(Marker::Data {
                header: Bytes::copy_from_slice(header),
                data: Bytes::copy_from_slice(&rest[split + 1..]),
            });
        }

        Err(invalid("unknown marker tag"))
    }
}

fn check_header(header: &[u8]) -> Result<()> {
    if header.is_empty() {
        return Err(invalid("DX header is empty"));
    }
    if header.iter().any(|&b| b == b' ' || b == b'\r' || b == b'\n') {
        return Err(invalid("DX header contains whitespace"));
    }
    Ok(())
}

fn invalid(reason: &str) -> FrameError {
    FrameError::InvalidMarker(reason.to_string())
}
