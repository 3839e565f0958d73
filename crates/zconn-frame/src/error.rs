/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An escape sequence was followed by something other than the
    /// escape sequence or the delimiter.
    #[error("invalid escape (escaped bytes {found:02x?} are neither escape nor delimiter)")]
    InvalidEscape { found: [u8; 2] },

    /// A frame grew beyond the configured maximum before its delimiter arrived.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame payload is not a well-formed NX/DX marker.
    #[error("invalid marker: {0}")]
    InvalidMarker(String),

    /// The framing configuration cannot round-trip arbitrary payloads.
    #[error("invalid frame config: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete frame was received or written.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
