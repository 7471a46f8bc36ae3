//! Stream abstraction for TCP, Unix socket and caller-provided transports.
//!
//! All I/O is blocking. A `PgStream` is owned by exactly one
//! `PgConnection` and released when that connection drops it.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::config::ConnectionParameters;

/// A byte stream a connection can run the protocol over.
///
/// Implement this to run the client over something other than a socket
/// (an in-memory pipe in tests, a tunnel, ...). Releasing the resource
/// happens when the value is dropped; `shutdown` is called just before.
pub trait Transport: Read + Write + Send {
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn shutdown(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// A PostgreSQL connection stream (TCP, Unix, or custom).
pub enum PgStream {
    Tcp(TcpStream),
    /// Unix domain socket connection
    #[cfg(unix)]
    Unix(UnixStream),
    Custom(Box<dyn Transport>),
}

impl PgStream {
    /// Open the socket described by `params`.
    ///
    /// `hostaddr` wins over `host`; a `host` starting with `/` is the
    /// directory holding the server's Unix socket.
    pub fn open(params: &ConnectionParameters) -> io::Result<Self> {
        if let Some(hostaddr) = params.hostaddr() {
            let ip: IpAddr = hostaddr.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid hostaddr \"{}\"", hostaddr),
                )
            })?;
            return Self::open_tcp(&[SocketAddr::new(ip, params.port())], params);
        }

        if params.is_unix_socket() {
            return Self::open_unix(params);
        }

        let addrs: Vec<SocketAddr> = (params.host(), params.port()).to_socket_addrs()?.collect();
        Self::open_tcp(&addrs, params)
    }

    fn open_tcp(addrs: &[SocketAddr], params: &ConnectionParameters) -> io::Result<Self> {
        let mut last_err = None;
        for addr in addrs {
            let attempt = match params.connect_timeout() {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(tcp) => {
                    // Disable Nagle's algorithm for lower latency
                    tcp.set_nodelay(true)?;
                    return Ok(PgStream::Tcp(tcp));
                }
                Err(e) => {
                    tracing::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host name resolved to no addresses")
        }))
    }

    #[cfg(unix)]
    fn open_unix(params: &ConnectionParameters) -> io::Result<Self> {
        let path = format!("{}/.s.PGSQL.{}", params.host(), params.port());
        Ok(PgStream::Unix(UnixStream::connect(path)?))
    }

    #[cfg(not(unix))]
    fn open_unix(_params: &ConnectionParameters) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Unix-domain sockets are not supported on this platform",
        ))
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        match self {
            PgStream::Tcp(stream) => Transport::shutdown(stream),
            #[cfg(unix)]
            PgStream::Unix(stream) => Transport::shutdown(stream),
            PgStream::Custom(stream) => stream.shutdown(),
        }
    }
}

impl Read for PgStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PgStream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            PgStream::Unix(stream) => stream.read(buf),
            PgStream::Custom(stream) => stream.read(buf),
        }
    }
}

impl Write for PgStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PgStream::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            PgStream::Unix(stream) => stream.write(buf),
            PgStream::Custom(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PgStream::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            PgStream::Unix(stream) => stream.flush(),
            PgStream::Custom(stream) => stream.flush(),
        }
    }
}
