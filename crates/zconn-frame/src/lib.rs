//! Self-delimiting message framing over an unbounded byte stream.
//!
//! Every frame is the escaped payload followed by the unescaped delimiter
//! `\r\n`. Payload bytes that would collide with the delimiter or the
//! escape sequence (default `/&`) are prefixed with the escape sequence,
//! so any byte string survives a round trip.
//!
//! - [`DelimitedWriter`] / [`DelimitedReader`]: incremental async I/O used
//!   by the connection loops
//! - [`DelimitedCodec`]: the same framing as a `tokio_util` codec
//! - [`Marker`]: `NX` / `DX` control lines terminated by `\r\n\r\n`

pub mod codec;
pub mod error;
pub mod marker;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, escape_into, unescape_into, DelimitedCodec, FrameConfig,
    Unescape, DEFAULT_BUFFER_SIZE, DEFAULT_ESCAPE, DEFAULT_MAX_FRAME, DELIMITER,
};
pub use error::{FrameError, Result};
pub use marker::Marker;
pub use reader::{DelimitedReader, Segment};
pub use writer::DelimitedWriter;
