//! PostgreSQL Connection
//!
//! Blocking connection with handshake and lifecycle handling.
//! Statement execution lives in `query.rs`, raw I/O in `io.rs`.

use std::collections::HashMap;
use std::io::Write;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use super::stream::{PgStream, Transport};
use super::{PgError, PgResult};
use crate::config::ConnectionParameters;
use crate::protocol::{
    BackendMessage, FrontendMessage, PgEncoder, SCRAM_SHA_256, ScramClient, TransactionStatus,
    md5_password,
};

/// Initial read buffer capacity
pub(crate) const BUFFER_CAPACITY: usize = 16384;

/// Lifecycle state of a connection.
///
/// `Connecting → Ready ⇄ InTransaction → Closed | Failed`.
/// `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Ready,
    InTransaction,
    Failed,
    Closed,
}

/// A blocking PostgreSQL connection.
///
/// Not meant for concurrent use: every operation takes `&mut self`, so at
/// most one execution is in flight. Use one connection per thread.
pub struct PgConnection {
    pub(crate) stream: Option<PgStream>,
    pub(crate) buffer: BytesMut,
    pub(crate) status: ConnectionStatus,
    pub(crate) last_error: Option<String>,
    pub(crate) transaction_status: TransactionStatus,
    pub(crate) server_params: HashMap<String, String>,
    pub(crate) process_id: i32,
    pub(crate) secret_key: i32,
}

impl PgConnection {
    /// Open a socket to the server in `params` and complete the handshake.
    pub fn connect(params: &ConnectionParameters) -> PgResult<Self> {
        match params.sslmode() {
            "require" | "verify-ca" | "verify-full" => {
                return Err(PgError::connect(format!(
                    "sslmode={} requested, but this client does not support TLS",
                    params.sslmode()
                )));
            }
            _ => {}
        }
        for key in params.unrecognized_keys() {
            debug!("ignoring connection option \"{}\"", key);
        }

        let stream = PgStream::open(params).map_err(|e| {
            PgError::connect(format!(
                "could not connect to server at {}: {}",
                params.target(),
                e
            ))
        })?;

        Self::handshake(stream, params)
    }

    /// Parse `conninfo`, fill gaps from `PG*` environment variables, connect.
    pub fn connect_str(conninfo: &str) -> PgResult<Self> {
        let params = ConnectionParameters::parse(conninfo)?.with_env_defaults()?;
        Self::connect(&params)
    }

    /// Complete the handshake over a caller-provided transport.
    pub fn connect_with_transport(
        transport: impl Transport + 'static,
        params: &ConnectionParameters,
    ) -> PgResult<Self> {
        Self::handshake(PgStream::Custom(Box::new(transport)), params)
    }

    fn handshake(stream: PgStream, params: &ConnectionParameters) -> PgResult<Self> {
        let mut conn = Self {
            stream: Some(stream),
            buffer: BytesMut::with_capacity(BUFFER_CAPACITY),
            status: ConnectionStatus::Connecting,
            last_error: None,
            transaction_status: TransactionStatus::Idle,
            server_params: HashMap::new(),
            process_id: 0,
            secret_key: 0,
        };

        match conn.handle_startup(params) {
            Ok(()) => {
                info!(
                    addr = %params.target(),
                    database = params.dbname(),
                    user = params.user(),
                    "connected"
                );
                Ok(conn)
            }
            Err(e) => {
                let reason = match e {
                    PgError::Connect { reason } | PgError::Transport(reason) => reason,
                    other => other.to_string(),
                };
                conn.fail(reason.clone());
                Err(PgError::Connect { reason })
            }
        }
    }

    /// Startup sequence: StartupMessage, authentication, server parameters,
    /// then the first ReadyForQuery.
    fn handle_startup(&mut self, params: &ConnectionParameters) -> PgResult<()> {
        let mut extra = Vec::new();
        if let Some(name) = params.application_name() {
            extra.push(("application_name".to_string(), name.to_string()));
        }
        if let Some(options) = params.options() {
            extra.push(("options".to_string(), options.to_string()));
        }

        self.send(FrontendMessage::Startup {
            user: params.user().to_string(),
            database: params.dbname().to_string(),
            params: extra,
        })?;

        let mut scram_client: Option<ScramClient> = None;
        let mut scram_verified = false;

        loop {
            match self.recv()? {
                BackendMessage::AuthenticationOk => {
                    // A started SCRAM exchange must end with a verified server signature
                    if scram_client.is_some() && !scram_verified {
                        return Err(PgError::connect(
                            "server did not complete SCRAM authentication",
                        ));
                    }
                    debug!("authentication ok");
                }
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = require_password(params)?;
                    self.send(FrontendMessage::PasswordMessage(password.to_string()))?;
                }
                BackendMessage::AuthenticationMD5Password(salt) => {
                    let password = require_password(params)?;
                    let digest = md5_password(params.user(), password, &salt);
                    self.send(FrontendMessage::PasswordMessage(digest))?;
                }
                BackendMessage::AuthenticationSASL(mechanisms) => {
                    if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                        return Err(PgError::connect(format!(
                            "none of the server's SASL authentication mechanisms are supported: {:?}",
                            mechanisms
                        )));
                    }
                    let password = require_password(params)?;
                    let client = ScramClient::new(password);

                    self.send(FrontendMessage::SASLInitialResponse {
                        mechanism: SCRAM_SHA_256.to_string(),
                        data: client.client_first_message(),
                    })?;
                    scram_client = Some(client);
                }
                BackendMessage::AuthenticationSASLContinue(server_data) => {
                    let client = scram_client.as_mut().ok_or_else(|| {
                        PgError::connect("received SASL continue without SASL init")
                    })?;
                    let final_message = client
                        .process_server_first(&server_data)
                        .map_err(|e| PgError::connect(format!("SCRAM error: {}", e)))?;
                    self.send(FrontendMessage::SASLResponse(final_message))?;
                }
                BackendMessage::AuthenticationSASLFinal(server_signature) => {
                    let client = scram_client.as_ref().ok_or_else(|| {
                        PgError::connect("received SASL final without SASL init")
                    })?;
                    client
                        .verify_server_final(&server_signature)
                        .map_err(|e| PgError::connect(format!("SCRAM error: {}", e)))?;
                    scram_verified = true;
                }
                BackendMessage::AuthenticationUnsupported(code) => {
                    return Err(PgError::connect(format!(
                        "authentication method {} not supported",
                        code
                    )));
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.server_params.insert(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::NoticeResponse(notice) => warn!("server notice: {}", notice),
                BackendMessage::ReadyForQuery(status) => {
                    self.set_transaction_status(status);
                    return Ok(());
                }
                BackendMessage::ErrorResponse(err) => {
                    return Err(PgError::connect(err.to_string()));
                }
                other => {
                    return Err(PgError::connect(format!(
                        "unexpected message during startup: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Close the connection and release the stream.
    ///
    /// Sends Terminate when the stream is still healthy. Idempotent: the
    /// stream is released at most once, whatever happened before.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if matches!(
                self.status,
                ConnectionStatus::Ready | ConnectionStatus::InTransaction
            ) {
                let terminate = PgEncoder::encode_terminate();
                if let Err(e) = stream.write_all(&terminate).and_then(|_| stream.flush()) {
                    debug!("terminate not delivered: {}", e);
                }
            }
            if let Err(e) = stream.shutdown() {
                debug!("shutdown failed: {}", e);
            }
            info!("connection closed");
        }
        self.status = ConnectionStatus::Closed;
    }

    /// Mark the connection failed and release the stream without Terminate.
    pub(crate) fn fail(&mut self, reason: String) {
        warn!("connection failed: {}", reason);
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
        self.status = ConnectionStatus::Failed;
        self.last_error = Some(reason);
    }

    pub(crate) fn set_transaction_status(&mut self, status: TransactionStatus) {
        self.transaction_status = status;
        self.status = match status {
            TransactionStatus::Idle => ConnectionStatus::Ready,
            TransactionStatus::InBlock | TransactionStatus::Failed => {
                ConnectionStatus::InTransaction
            }
        };
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Message of the failure that moved the connection to `Failed`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Transaction state from the most recent ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// A run-time parameter reported by the server (`server_version`,
    /// `client_encoding`, `TimeZone`, ...).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    pub fn server_version(&self) -> Option<&str> {
        self.parameter("server_version")
    }

    /// Process id of the backend serving this connection.
    pub fn backend_pid(&self) -> i32 {
        self.process_id
    }

    /// Secret key paired with [`backend_pid`](Self::backend_pid) for
    /// out-of-band cancel requests.
    pub fn secret_key(&self) -> i32 {
        self.secret_key
    }
}

/// Drop releases the stream if `close()` was never called.
impl Drop for PgConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn require_password(params: &ConnectionParameters) -> PgResult<&str> {
    params.password().ok_or_else(|| {
        PgError::connect("password authentication requested but no password supplied")
    })
}

pub(crate) fn parse_affected_rows(tag: &str) -> u64 {
    tag.split_whitespace()
        .last()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
