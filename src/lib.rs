//! # qail-pq
//!
//! A small blocking PostgreSQL client core: connect, execute a statement,
//! read a fully materialized result set, release the connection.
//!
//! ```ignore
//! use qail_pq::{PgConnection, session};
//!
//! let mut conn = PgConnection::connect_str("dbname=rate-races user=postgres password=pass")?;
//! let report = session::select(&mut conn, "select name,id from race;");
//! if let Some(rows) = report.last().and_then(|o| o.result_set()) {
//!     for row in rows.rows() {
//!         println!("{:?}", row.values().collect::<Vec<_>>());
//!     }
//! }
//! conn.close();
//! ```
//!
//! Server errors are data ([`ExecutionOutcome::Failed`]); only connect and
//! transport faults are `Err`. Nothing here exits the process.

pub mod config;
pub mod driver;
pub mod error;
pub mod format;
pub mod protocol;
pub mod session;

pub use config::{ConnectionParameters, ConnectionParametersBuilder, Profile};
pub use driver::{
    Column, ConnectionStatus, ExecutionOutcome, PgConnection, PgStream, ResultSet, Row, Transport,
};
pub use error::{PgError, PgResult};
pub use protocol::{ErrorFields, TransactionStatus};
pub use session::{SequenceReport, run_sequence};
