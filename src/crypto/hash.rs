//! SHA-256 based digests.
//!
//! `hash` produces the session's derived keys by varying the iteration
//! count; `hmac` tags the encrypted private key at rest.

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::HMAC_LEN;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Applies SHA-256 `iterations` times and returns the final digest as base64.
///
/// Every round after the first hashes the raw 32 digest bytes of the
/// previous round, not its base64 text. `iterations == 0` behaves like 1.
pub fn hash(input: &str, iterations: u32) -> String {
    let mut digest = Sha256::digest(input.as_bytes());
    for _ in 1..iterations.max(1) {
        digest = Sha256::digest(digest);
    }
    STANDARD.encode(digest)
}

/// HMAC-SHA256 of `data` under `key`, base64 encoded (always 44 chars).
pub fn hmac(key: &str, data: &str) -> Result<String> {
    let mut mac = keyed(key)?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64 tag produced by [`hmac`].
pub fn verify_hmac(key: &str, data: &str, tag: &str) -> Result<()> {
    let tag = STANDARD
        .decode(tag)
        .map_err(|_| Error::DataIntegrity("integrity tag is not valid base64".into()))?;
    if tag.len() != HMAC_LEN {
        return Err(Error::DataIntegrity("integrity tag has the wrong length".into()));
    }

    let mut mac = keyed(key)?;
    mac.update(data.as_bytes());
    mac.verify_slice(&tag)
        .map_err(|_| Error::DataIntegrity("integrity tag mismatch".into()))
}

fn keyed(key: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(format!("HMAC key rejected: {e}")))
}
