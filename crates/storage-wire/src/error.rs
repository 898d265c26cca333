use thiserror::Error;

/// Errors that can occur while framing requests/responses on a connection.
///
/// A `WireError` never distinguishes which side of the connection failed —
/// by the time one is produced the handler has already lost the ability to
/// tell the client anything, and the only useful reaction is to treat the
/// connection as gone.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireError {
    /// The underlying transport failed outright (not EOF — a real OS error).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// EOF was observed before a frame finished, or a write hit a broken pipe.
    /// Both conditions mean the same thing to a handler: the peer is gone.
    #[error("connection lost mid-frame")]
    Disconnected,

    /// A path field decoded to bytes that are not valid UTF-8.
    #[error("path is not valid UTF-8")]
    InvalidPathEncoding,

    /// A path field was missing its NUL terminator where the protocol requires one.
    #[error("path field missing NUL terminator")]
    MissingPathTerminator,

    /// First byte of a request frame did not match any known opcode.
    #[error("unrecognized opcode byte {0}")]
    UnrecognizedOpcode(u8),

    /// First byte of a response frame did not match any known response code.
    #[error("unrecognized response code byte {0}")]
    UnrecognizedResponseCode(u8),

    /// A size-prefixed field declared a length past [`crate::codec::MAX_FRAME_LEN`].
    ///
    /// This is a framing-level safety bound, independent of and much larger than
    /// the storage engine's own `max_bytes`/path-length policy checks — it exists
    /// only to stop a single bogus size prefix from triggering a multi-gigabyte
    /// allocation before business logic ever sees the request.
    #[error("declared frame length {0} exceeds the safety bound")]
    FrameTooLarge(u64),
}

pub type WireResult<T> = std::result::Result<T, WireError>;
