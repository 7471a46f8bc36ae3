//! Core blocking I/O for PostgreSQL connection.
//!
//! This module provides low-level send/receive methods.

use std::io::{ErrorKind, Read, Write};

use super::{PgConnection, PgError, PgResult};
use crate::protocol::{BackendMessage, FrontendMessage, frame_len};

/// Bytes requested from the socket per read call.
const READ_CHUNK: usize = 8192;

impl PgConnection {
    /// Send a frontend message.
    pub(crate) fn send(&mut self, msg: FrontendMessage) -> PgResult<()> {
        let bytes = msg.encode()?;
        self.send_bytes(&bytes)
    }

    /// Send pre-encoded bytes and flush.
    pub(crate) fn send_bytes(&mut self, bytes: &[u8]) -> PgResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PgError::Transport("connection is closed".to_string()))?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Receive one backend message, blocking until it is complete.
    pub(crate) fn recv(&mut self) -> PgResult<BackendMessage> {
        loop {
            let complete = frame_len(&self.buffer)
                .map_err(|e| PgError::Transport(format!("protocol error: {}", e)))?;

            if let Some(total) = complete {
                let msg_bytes = self.buffer.split_to(total);
                let (msg, _) = BackendMessage::decode(&msg_bytes)
                    .map_err(|e| PgError::Transport(format!("protocol error: {}", e)))?;
                return Ok(msg);
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| PgError::Transport("connection is closed".to_string()))?;

            let mut chunk = [0u8; READ_CHUNK];
            let n = match stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(PgError::Transport(
                    "server closed the connection unexpectedly".to_string(),
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}
