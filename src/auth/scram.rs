//! SCRAM-SHA-256 client exchange (RFC 5802 / RFC 7677) without channel binding.
//!
//! Postgres takes the user name from the startup packet, so the SCRAM
//! `n=` attribute is sent empty.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// GS2 header for "no channel binding"
const GS2_HEADER: &str = "n,,";

/// Mechanism name advertised by the server
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Client side of one SCRAM-SHA-256 exchange
pub struct ScramSha256 {
    password: String,
    client_first_bare: String,
    client_nonce: String,
    /// Set once the server-first message has been answered
    expected_server_signature: Option<Vec<u8>>,
}

impl ScramSha256 {
    /// Start an exchange with a fresh random nonce
    pub fn new(password: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        let raw: [u8; 18] = rng.gen();
        Self::with_nonce("", password, &BASE64.encode(raw))
    }

    fn with_nonce(user: &str, password: impl Into<String>, nonce: &str) -> Self {
        Self {
            password: password.into(),
            client_first_bare: format!("n={},r={}", user, nonce),
            client_nonce: nonce.to_string(),
            expected_server_signature: None,
        }
    }

    /// Client-first message (sent in SASLInitialResponse)
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare)
    }

    /// Consume the server-first message and produce the client-final message
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                _ => {}
            }
        }

        let (nonce, salt, iterations) = match (nonce, salt, iterations) {
            (Some(n), Some(s), Some(i)) => (n, s, i),
            _ => return Err(scram_error("server-first message is missing r, s or i")),
        };
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(scram_error("server nonce does not extend the client nonce"));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|_| scram_error("salt is not valid base64"))?;
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| scram_error("iteration count is not a number"))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|_| scram_error("key derivation failed"))?;

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);
        let server_key = hmac(&salted_password, b"Server Key")?;

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.expected_server_signature = Some(hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check the server-final message against the expected signature
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let expected = self
            .expected_server_signature
            .as_ref()
            .ok_or_else(|| scram_error("server-final received before client-final"))?;

        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(scram_error(&format!("server rejected proof: {}", err)));
        }
        let encoded = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| scram_error("server-final message has no verifier"))?;
        let signature = BASE64
            .decode(encoded)
            .map_err(|_| scram_error("server signature is not valid base64"))?;

        if constant_time_eq(&signature, expected) {
            Ok(())
        } else {
            Err(scram_error("server signature mismatch"))
        }
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| scram_error("invalid HMAC key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn scram_error(msg: &str) -> Error {
    Error::Authentication(format!("SCRAM: {}", msg))
}
