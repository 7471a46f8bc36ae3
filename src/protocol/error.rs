//! Codec errors for the PostgreSQL wire protocol.
//!
//! Shared by `PgEncoder` and `BackendMessage::decode`.

use thiserror::Error;

/// Errors that can occur while encoding a frontend message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A string value contains a literal NUL byte (0x00).
    #[error("Value contains NULL byte (0x00) which is invalid in PostgreSQL")]
    NullByte,
    /// The message body does not fit in the i32 length field.
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),
}

/// Errors that can occur while decoding a backend message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame header carries a length smaller than the length field itself.
    #[error("Invalid message length {len} for message type '{tag}'")]
    InvalidLength { tag: char, len: i32 },
    /// The frame header announces more than the client will buffer.
    #[error("Message type '{tag}' too large: {len} bytes")]
    MessageTooLarge { tag: char, len: i32 },
    /// The payload ended before a field could be read.
    #[error("{0} truncated")]
    Truncated(&'static str),
    /// Message type byte not part of the protocol subset we speak.
    #[error("Unknown message type: '{0}'")]
    UnknownMessage(char),
    /// Authentication request code we do not know.
    #[error("Unknown auth type: {0}")]
    UnknownAuth(i32),
    /// ReadyForQuery carried an unexpected status byte.
    #[error("Unknown transaction status: '{0}'")]
    UnknownTransactionStatus(char),
}
