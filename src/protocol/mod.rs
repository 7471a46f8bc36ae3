//! PostgreSQL Wire Protocol (Layer 2: Pure, Sync)
//!
//! No I/O - just messages ⇄ bytes.

pub mod auth;
pub mod encoder;
pub mod error;
pub mod wire;

pub use auth::{AuthError, SCRAM_SHA_256, ScramClient, md5_password};
pub use encoder::PgEncoder;
pub use error::{DecodeError, EncodeError};
pub use wire::*;
