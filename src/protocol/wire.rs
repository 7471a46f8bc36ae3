//! PostgreSQL Wire Protocol Messages
//!
//! The subset of the Frontend/Backend Protocol 3.0 needed to start a
//! connection, run simple queries and receive row data.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use std::fmt;

use bytes::BytesMut;

use super::{DecodeError, EncodeError, PgEncoder};

/// Frontend (client → server) message types
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Startup message (sent first, no type byte)
    Startup {
        user: String,
        database: String,
        /// Extra run-time parameters (application_name, options, ...)
        params: Vec<(String, String)>,
    },
    /// Password response (cleartext or MD5 digest)
    PasswordMessage(String),
    Query(String),
    /// SASL initial response (first message in SCRAM)
    SASLInitialResponse { mechanism: String, data: Vec<u8> },
    /// SASL response (subsequent messages in SCRAM)
    SASLResponse(Vec<u8>),
    /// Abort a COPY FROM STDIN the server started
    CopyFail(String),
    Terminate,
}

/// Backend (server → client) message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password([u8; 4]),
    AuthenticationSASL(Vec<String>),
    AuthenticationSASLContinue(Vec<u8>),
    AuthenticationSASLFinal(Vec<u8>),
    /// Any other authentication request (Kerberos, GSSAPI, SSPI...)
    AuthenticationUnsupported(i32),
    /// Parameter status (server config)
    ParameterStatus {
        name: String,
        value: String,
    },
    /// Backend key data (for cancel)
    BackendKeyData {
        process_id: i32,
        secret_key: i32,
    },
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    /// Notice response (warning/info messages, not errors)
    NoticeResponse(ErrorFields),
    /// Notification response (async notification from LISTEN/NOTIFY)
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
    /// Copy in response (server ready to receive COPY data)
    CopyInResponse,
    /// Copy out response (server will send COPY data)
    CopyOutResponse,
    CopyData(Vec<u8>),
    CopyDone,
}

/// Transaction status reported by ReadyForQuery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,    // 'I'
    InBlock, // 'T'
    Failed,  // 'E'
}

/// Field description in RowDescription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// Error fields from ErrorResponse / NoticeResponse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.severity.is_empty() {
            write!(f, "{}", self.message)?;
        } else {
            write!(f, "{}: {}", self.severity, self.message)?;
        }
        if !self.code.is_empty() {
            write!(f, " (SQLSTATE {})", self.code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

impl FrontendMessage {
    /// Encode message to bytes for sending over the wire.
    pub fn encode(&self) -> Result<BytesMut, EncodeError> {
        match self {
            FrontendMessage::Startup {
                user,
                database,
                params,
            } => {
                let mut pairs = vec![("user", user.as_str()), ("database", database.as_str())];
                pairs.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                PgEncoder::encode_startup(&pairs)
            }
            FrontendMessage::PasswordMessage(password) => PgEncoder::encode_password(password),
            FrontendMessage::Query(sql) => PgEncoder::encode_query_string(sql),
            FrontendMessage::SASLInitialResponse { mechanism, data } => {
                PgEncoder::encode_sasl_initial(mechanism, data)
            }
            FrontendMessage::SASLResponse(data) => PgEncoder::encode_sasl_response(data),
            FrontendMessage::CopyFail(reason) => PgEncoder::encode_copy_fail(reason),
            FrontendMessage::Terminate => Ok(PgEncoder::encode_terminate()),
        }
    }
}

/// Largest length field accepted from the server (the server's own 1 GiB
/// allocation limit).
pub const MAX_FRAME_LEN: i32 = 0x3fff_ffff;

/// Length of the complete frame at the start of `buf` (type byte included),
/// or `None` if more bytes are needed.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, DecodeError> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 {
        return Err(DecodeError::InvalidLength {
            tag: buf[0] as char,
            len,
        });
    }
    if len > MAX_FRAME_LEN {
        return Err(DecodeError::MessageTooLarge {
            tag: buf[0] as char,
            len,
        });
    }
    let total = len as usize + 1;
    Ok((buf.len() >= total).then_some(total))
}

impl BackendMessage {
    /// Decode one complete message from wire bytes.
    /// Returns the message and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let total = frame_len(buf)?.ok_or(DecodeError::Truncated("Message"))?;
        let msg_type = buf[0];
        let mut p = Payload::new(&buf[5..total]);

        let message = match msg_type {
            b'R' => Self::decode_auth(&mut p)?,
            b'S' => BackendMessage::ParameterStatus {
                name: p.cstr("ParameterStatus")?,
                value: p.cstr("ParameterStatus")?,
            },
            b'K' => BackendMessage::BackendKeyData {
                process_id: p.i32("BackendKeyData")?,
                secret_key: p.i32("BackendKeyData")?,
            },
            b'Z' => Self::decode_ready_for_query(&mut p)?,
            b'T' => Self::decode_row_description(&mut p)?,
            b'D' => Self::decode_data_row(&mut p)?,
            b'C' => BackendMessage::CommandComplete(p.cstr("CommandComplete")?),
            b'I' => BackendMessage::EmptyQueryResponse,
            b'E' => BackendMessage::ErrorResponse(Self::parse_error_fields(&mut p)?),
            b'N' => BackendMessage::NoticeResponse(Self::parse_error_fields(&mut p)?),
            b'A' => BackendMessage::NotificationResponse {
                process_id: p.i32("NotificationResponse")?,
                channel: p.cstr("NotificationResponse")?,
                payload: p.cstr("NotificationResponse")?,
            },
            b'G' => BackendMessage::CopyInResponse,
            b'H' => BackendMessage::CopyOutResponse,
            b'd' => BackendMessage::CopyData(p.rest().to_vec()),
            b'c' => BackendMessage::CopyDone,
            other => return Err(DecodeError::UnknownMessage(other as char)),
        };

        Ok((message, total))
    }

    fn decode_auth(p: &mut Payload<'_>) -> Result<Self, DecodeError> {
        let auth_type = p.i32("Authentication")?;
        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                let salt = p.bytes(4, "AuthenticationMD5Password")?;
                Ok(BackendMessage::AuthenticationMD5Password([
                    salt[0], salt[1], salt[2], salt[3],
                ]))
            }
            10 => {
                // Mechanism list, each null-terminated, closed by an empty string
                let mut mechanisms = Vec::new();
                loop {
                    let mechanism = p.cstr("AuthenticationSASL")?;
                    if mechanism.is_empty() {
                        break;
                    }
                    mechanisms.push(mechanism);
                }
                Ok(BackendMessage::AuthenticationSASL(mechanisms))
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue(p.rest().to_vec())),
            12 => Ok(BackendMessage::AuthenticationSASLFinal(p.rest().to_vec())),
            2 | 6 | 7 | 8 | 9 => Ok(BackendMessage::AuthenticationUnsupported(auth_type)),
            _ => Err(DecodeError::UnknownAuth(auth_type)),
        }
    }

    fn decode_ready_for_query(p: &mut Payload<'_>) -> Result<Self, DecodeError> {
        let status = match p.bytes(1, "ReadyForQuery")?[0] {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InBlock,
            b'E' => TransactionStatus::Failed,
            other => return Err(DecodeError::UnknownTransactionStatus(other as char)),
        };
        Ok(BackendMessage::ReadyForQuery(status))
    }

    fn decode_row_description(p: &mut Payload<'_>) -> Result<Self, DecodeError> {
        const WHAT: &str = "RowDescription";
        let field_count = p.i16(WHAT)?.max(0) as usize;
        let mut fields = Vec::with_capacity(field_count);

        for _ in 0..field_count {
            fields.push(FieldDescription {
                name: p.cstr(WHAT)?,
                table_oid: p.u32(WHAT)?,
                column_attr: p.i16(WHAT)?,
                type_oid: p.u32(WHAT)?,
                type_size: p.i16(WHAT)?,
                type_modifier: p.i32(WHAT)?,
                format: p.i16(WHAT)?,
            });
        }

        Ok(BackendMessage::RowDescription(fields))
    }

    fn decode_data_row(p: &mut Payload<'_>) -> Result<Self, DecodeError> {
        const WHAT: &str = "DataRow";
        let column_count = p.i16(WHAT)?.max(0) as usize;
        let mut columns = Vec::with_capacity(column_count);

        for _ in 0..column_count {
            let len = p.i32(WHAT)?;
            if len < 0 {
                // -1 marks SQL NULL
                columns.push(None);
            } else {
                columns.push(Some(p.bytes(len as usize, WHAT)?.to_vec()));
            }
        }

        Ok(BackendMessage::DataRow(columns))
    }

    fn parse_error_fields(p: &mut Payload<'_>) -> Result<ErrorFields, DecodeError> {
        const WHAT: &str = "ErrorResponse";
        let mut fields = ErrorFields::default();
        let mut localized_severity = String::new();

        loop {
            let field_type = p.bytes(1, WHAT)?[0];
            if field_type == 0 {
                break;
            }
            let value = p.cstr(WHAT)?;

            match field_type {
                b'S' => localized_severity = value,
                b'V' => fields.severity = value,
                b'C' => fields.code = value,
                b'M' => fields.message = value,
                b'D' => fields.detail = Some(value),
                b'H' => fields.hint = Some(value),
                _ => {}
            }
        }

        // 'V' (non-localized) only exists on 9.6+ servers
        if fields.severity.is_empty() {
            fields.severity = localized_severity;
        }
        Ok(fields)
    }
}

/// Bounds-checked reader over a message payload.
struct Payload<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated(what))?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn i16(&mut self, what: &'static str) -> Result<i16, DecodeError> {
        let b = self.bytes(2, what)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, DecodeError> {
        let b = self.bytes(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self, what: &'static str) -> Result<String, DecodeError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::Truncated(what))?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}
