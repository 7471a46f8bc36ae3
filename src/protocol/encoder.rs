//! PostgreSQL Encoder
//!
//! Frontend message framing for the simple query subprotocol.
//! Pure, synchronous computation: no I/O.
//!
//! Every typed message is laid out as:
//! - message type (1 byte)
//! - length (4 bytes, big-endian, includes itself but not the type byte)
//! - body
//!
//! The StartupMessage is the only exception: it has no type byte.

use bytes::{BufMut, BytesMut};

use super::EncodeError;

/// Protocol version 3.0 (major 3, minor 0).
pub const PROTOCOL_VERSION: i32 = 196608;

/// Produces wire protocol bytes for frontend messages.
pub struct PgEncoder;

impl PgEncoder {
    /// Encode a raw SQL string as a Simple Query message.
    /// Wire format:
    /// - 'Q' (1 byte) - message type
    /// - length (4 bytes, big-endian, includes self)
    /// - query string (null-terminated)
    pub fn encode_query_string(sql: &str) -> Result<BytesMut, EncodeError> {
        Self::framed(b'Q', |body| put_cstr(body, sql))
    }

    /// Encode the StartupMessage: protocol version followed by
    /// null-terminated name/value pairs and a final terminator.
    pub fn encode_startup(params: &[(&str, &str)]) -> Result<BytesMut, EncodeError> {
        let mut body = BytesMut::with_capacity(64);
        body.put_i32(PROTOCOL_VERSION);
        for (name, value) in params {
            put_cstr(&mut body, name)?;
            put_cstr(&mut body, value)?;
        }
        body.put_u8(0);

        let len = frame_len(body.len())?;
        let mut buf = BytesMut::with_capacity(body.len() + 4);
        buf.put_i32(len);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Encode a PasswordMessage (cleartext or MD5 digest).
    pub fn encode_password(password: &str) -> Result<BytesMut, EncodeError> {
        Self::framed(b'p', |body| put_cstr(body, password))
    }

    /// Encode a SASLInitialResponse: mechanism name, then the
    /// length-prefixed client-first-message.
    pub fn encode_sasl_initial(mechanism: &str, data: &[u8]) -> Result<BytesMut, EncodeError> {
        Self::framed(b'p', |body| {
            put_cstr(body, mechanism)?;
            body.put_i32(frame_len(data.len())? - 4);
            body.extend_from_slice(data);
            Ok(())
        })
    }

    /// Encode a SASLResponse. The body is the raw SASL payload.
    pub fn encode_sasl_response(data: &[u8]) -> Result<BytesMut, EncodeError> {
        Self::framed(b'p', |body| {
            body.extend_from_slice(data);
            Ok(())
        })
    }

    /// Encode a CopyFail message, aborting a COPY FROM STDIN.
    pub fn encode_copy_fail(reason: &str) -> Result<BytesMut, EncodeError> {
        Self::framed(b'f', |body| put_cstr(body, reason))
    }

    /// Encode a Terminate message to close the connection.
    pub fn encode_terminate() -> BytesMut {
        let mut buf = BytesMut::with_capacity(5);
        buf.extend_from_slice(&[b'X', 0, 0, 0, 4]);
        buf
    }

    fn framed(
        tag: u8,
        write_body: impl FnOnce(&mut BytesMut) -> Result<(), EncodeError>,
    ) -> Result<BytesMut, EncodeError> {
        let mut body = BytesMut::new();
        write_body(&mut body)?;

        let mut buf = BytesMut::with_capacity(body.len() + 5);
        buf.put_u8(tag);
        buf.put_i32(frame_len(body.len())?);
        buf.extend_from_slice(&body);
        Ok(buf)
    }
}

/// Write a null-terminated string, rejecting embedded NUL bytes.
fn put_cstr(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    if s.as_bytes().contains(&0) {
        return Err(EncodeError::NullByte);
    }
    buf.extend_from_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

/// Length field value for a body of `body_len` bytes.
fn frame_len(body_len: usize) -> Result<i32, EncodeError> {
    i32::try_from(body_len + 4).map_err(|_| EncodeError::TooLarge(body_len))
}
