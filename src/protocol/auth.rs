//! Password authentication responses.
//!
//! Answers whichever mechanism the server asks for during startup:
//! cleartext, MD5, or SASL SCRAM-SHA-256 (RFC 5802/7677).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only SASL mechanism we implement.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Failures while computing an authentication response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed server message: {0}")]
    Malformed(&'static str),
    #[error("server nonce doesn't contain client nonce")]
    NonceMismatch,
    #[error("server signature verification failed")]
    BadServerSignature,
    #[error("SCRAM exchange out of order")]
    OutOfOrder,
}

/// MD5 password response.
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = hex(&hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{}", hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SCRAM-SHA-256 client state machine.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    /// Auth message and salted password, known after the server-first message
    server_state: Option<(String, Vec<u8>)>,
}

impl ScramClient {
    /// Create a new SCRAM client with a fresh random nonce.
    pub fn new(password: &str) -> Self {
        let nonce: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_nonce(password, nonce)
    }

    fn with_nonce(password: &str, client_nonce: String) -> Self {
        Self {
            password: password.to_string(),
            client_nonce,
            server_state: None,
        }
    }

    /// The client-first-message: `n,,n=,r=<nonce>`.
    ///
    /// The user name is left empty; the server takes it from the
    /// StartupMessage.
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.client_nonce)
    }

    /// Process the server-first-message (`r=<nonce>,s=<salt>,i=<iterations>`)
    /// and produce the client-final-message.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, AuthError> {
        let server_str = std::str::from_utf8(server_msg)
            .map_err(|_| AuthError::Malformed("invalid UTF-8 in server-first-message"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in server_str.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|_| AuthError::Malformed("invalid salt base64"))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| AuthError::Malformed("invalid iteration count"))?,
                );
            }
        }

        let nonce = nonce.ok_or(AuthError::Malformed("missing nonce"))?;
        let salt = salt.ok_or(AuthError::Malformed("missing salt"))?;
        let iterations = iterations.ok_or(AuthError::Malformed("missing iteration count"))?;

        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(AuthError::NonceMismatch);
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        // biws = base64("n,,")
        let client_final_without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_str,
            client_final_without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        self.server_state = Some((auth_message, salted_password.to_vec()));

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(&client_proof)
        )
        .into_bytes())
    }

    /// Verify the server-final-message (`v=<signature>`).
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<(), AuthError> {
        let (auth_message, salted_password) =
            self.server_state.as_ref().ok_or(AuthError::OutOfOrder)?;

        let server_str = std::str::from_utf8(server_msg)
            .map_err(|_| AuthError::Malformed("invalid UTF-8 in server-final-message"))?;
        let verifier = server_str
            .strip_prefix("v=")
            .ok_or(AuthError::Malformed("missing verifier"))?;
        let expected = BASE64
            .decode(verifier.trim_end())
            .map_err(|_| AuthError::Malformed("invalid server signature base64"))?;

        let server_key = hmac(salted_password, b"Server Key")?;
        let computed = hmac(&server_key, auth_message.as_bytes())?;

        if computed != expected {
            return Err(AuthError::BadServerSignature);
        }
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| AuthError::Malformed("HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
