//! PostgreSQL Driver Module (Layer 3: Blocking I/O)
//!
//! Connection methods are split across modules for easier maintenance:
//! - `connection.rs` - Core struct, connect, handshake, close
//! - `io.rs` - send, recv
//! - `query.rs` - execute
//! - `result.rs` - ResultSet, Row, ExecutionOutcome
//! - `stream.rs` - TCP / Unix / custom transports

mod connection;
mod io;
mod query;
mod result;
mod stream;

pub use connection::{ConnectionStatus, PgConnection};
pub use result::{Column, ExecutionOutcome, ResultSet, Row};
pub use stream::{PgStream, Transport};

pub use crate::error::{PgError, PgResult};
