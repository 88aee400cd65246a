use std::io;
use thiserror::Error;

/// Errors that can occur while encoding, sending or receiving a [`crate::Message`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying stream returned an I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A send or receive completed with fewer bytes than the framing promised.
    #[error("short {0}: expected {expected} bytes, got {actual}", expected = .1, actual = .2)]
    ShortTransfer(&'static str, usize, usize),

    /// The header declared a protocol version this build does not understand.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The header declared a message kind this build does not understand.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 in wire string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A reply's sub-operation count did not match what the request promised.
    #[error("reply sub-operation count {reply} does not match request count {request}")]
    SubOperationMismatch { request: u32, reply: u32 },
}
