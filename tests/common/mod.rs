//! Scripted in-memory server for driving `PgConnection` without a socket.
//!
//! The server side is a byte script queued up front; everything the client
//! writes is recorded so tests can check which statements went out.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use qail_pq::{ConnectionParameters, PgConnection, Transport};

#[derive(Debug, Default)]
pub struct Shared {
    pub script: Vec<u8>,
    pub read_pos: usize,
    pub written: Vec<u8>,
    pub severed: bool,
    pub opened: usize,
    pub shutdowns: usize,
    pub released: usize,
}

/// Handle kept by the test after the transport moves into the connection.
#[derive(Debug, Clone, Default)]
pub struct Probe(pub Arc<Mutex<Shared>>);

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> ScriptedTransport {
        self.0.lock().unwrap().opened += 1;
        ScriptedTransport {
            shared: Arc::clone(&self.0),
        }
    }

    /// Queue server bytes for the client to read.
    pub fn push(&self, bytes: Vec<u8>) {
        self.0.lock().unwrap().script.extend_from_slice(&bytes);
    }

    /// Make every further read and write fail.
    pub fn sever(&self) {
        self.0.lock().unwrap().severed = true;
    }

    pub fn opened(&self) -> usize {
        self.0.lock().unwrap().opened
    }

    pub fn released(&self) -> usize {
        self.0.lock().unwrap().released
    }

    pub fn shutdowns(&self) -> usize {
        self.0.lock().unwrap().shutdowns
    }

    pub fn written_len(&self) -> usize {
        self.0.lock().unwrap().written.len()
    }

    /// Tags of the frontend messages sent after the startup packet.
    pub fn sent_tags(&self) -> Vec<char> {
        frames(&self.0.lock().unwrap().written)
            .into_iter()
            .map(|(tag, _)| tag)
            .collect()
    }

    /// Text of every Query message sent, in order.
    pub fn sent_queries(&self) -> Vec<String> {
        frames(&self.0.lock().unwrap().written)
            .into_iter()
            .filter(|(tag, _)| *tag == 'Q')
            .map(|(_, body)| cstr(&body))
            .collect()
    }

    /// Bodies of PasswordMessage frames.
    pub fn sent_passwords(&self) -> Vec<String> {
        frames(&self.0.lock().unwrap().written)
            .into_iter()
            .filter(|(tag, _)| *tag == 'p')
            .map(|(_, body)| cstr(&body))
            .collect()
    }
}

pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if shared.severed {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"));
        }
        let remaining = &shared.script[shared.read_pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        shared.read_pos += n;
        Ok(n)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if shared.severed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        shared.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        self.shared.lock().unwrap().shutdowns += 1;
        Ok(())
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.released += 1;
        }
    }
}

fn frames(written: &[u8]) -> Vec<(char, Vec<u8>)> {
    if written.len() < 4 {
        return Vec::new();
    }
    // Startup packet has no tag byte
    let startup_len = i32::from_be_bytes([written[0], written[1], written[2], written[3]]) as usize;
    let mut pos = startup_len;
    let mut out = Vec::new();
    while pos + 5 <= written.len() {
        let tag = written[pos] as char;
        let len = i32::from_be_bytes([
            written[pos + 1],
            written[pos + 2],
            written[pos + 3],
            written[pos + 4],
        ]) as usize;
        out.push((tag, written[pos + 5..pos + 1 + len].to_vec()));
        pos += 1 + len;
    }
    out
}

fn cstr(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

// Backend message builders

fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn with_nul(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

pub fn auth_ok() -> Vec<u8> {
    message(b'R', &0i32.to_be_bytes())
}

pub fn auth_md5(salt: [u8; 4]) -> Vec<u8> {
    let mut body = 5i32.to_be_bytes().to_vec();
    body.extend_from_slice(&salt);
    message(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = with_nul(name);
    body.extend(with_nul(value));
    message(b'S', &body)
}

pub fn backend_key(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(&secret.to_be_bytes());
    message(b'K', &body)
}

pub fn ready(status: u8) -> Vec<u8> {
    message(b'Z', &[status])
}

pub fn row_description(names: &[&str]) -> Vec<u8> {
    let mut body = (names.len() as i16).to_be_bytes().to_vec();
    for name in names {
        body.extend(with_nul(name));
        body.extend_from_slice(&0u32.to_be_bytes()); // table oid
        body.extend_from_slice(&0i16.to_be_bytes()); // column attr
        body.extend_from_slice(&25u32.to_be_bytes()); // text
        body.extend_from_slice(&(-1i16).to_be_bytes());
        body.extend_from_slice(&(-1i32).to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
    }
    message(b'T', &body)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                body.extend_from_slice(v.as_bytes());
            }
            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    message(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    message(b'C', &with_nul(tag))
}

pub fn error_response(code: &str, text: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', text)] {
        body.push(field);
        body.extend(with_nul(value));
    }
    body.push(0);
    message(b'E', &body)
}

/// Everything a trust-auth server sends up to the first ReadyForQuery.
pub fn startup_ok() -> Vec<u8> {
    let mut out = auth_ok();
    out.extend(parameter_status("server_version", "16.2"));
    out.extend(parameter_status("client_encoding", "UTF8"));
    out.extend(backend_key(4242, 7));
    out.extend(ready(b'I'));
    out
}

/// A query answered with rows, then idle.
pub fn rows_reply(names: &[&str], rows: &[&[Option<&str>]]) -> Vec<u8> {
    let mut out = row_description(names);
    for row in rows {
        out.extend(data_row(row));
    }
    out.extend(command_complete(&format!("SELECT {}", rows.len())));
    out.extend(ready(b'I'));
    out
}

pub fn command_reply(tag: &str, status: u8) -> Vec<u8> {
    let mut out = command_complete(tag);
    out.extend(ready(status));
    out
}

pub fn error_reply(code: &str, text: &str, status: u8) -> Vec<u8> {
    let mut out = error_response(code, text);
    out.extend(ready(status));
    out
}

pub fn params() -> ConnectionParameters {
    ConnectionParameters::builder()
        .user("postgres")
        .dbname("rate-races")
        .password("pass")
        .build()
        .unwrap()
}

/// A connection that has completed a trust-auth handshake.
pub fn connected(probe: &Probe) -> PgConnection {
    probe.push(startup_ok());
    PgConnection::connect_with_transport(probe.transport(), &params()).unwrap()
}

pub fn empty_query() -> Vec<u8> {
    message(b'I', &[])
}

pub fn copy_in_response() -> Vec<u8> {
    // text format, zero columns
    message(b'G', &[0, 0, 0])
}

pub fn notice(text: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "NOTICE"), (b'M', text)] {
        body.push(field);
        body.extend(with_nul(value));
    }
    body.push(0);
    message(b'N', &body)
}

pub fn auth_sasl(mechanisms: &[&str]) -> Vec<u8> {
    let mut body = 10i32.to_be_bytes().to_vec();
    for mechanism in mechanisms {
        body.extend(with_nul(mechanism));
    }
    body.push(0);
    message(b'R', &body)
}

/// A frame header claiming `len` bytes, with no body behind it.
pub fn frame_header(tag: u8, len: i32) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&len.to_be_bytes());
    out
}
