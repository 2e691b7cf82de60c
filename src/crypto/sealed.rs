//! The `$v2$` sealed format.
//!
//! ```text
//! "$v2$" base64( MEM_COST (4) | TIME_COST (4) | PARALLELISM (4) | SALT (16) | NONCE (24) | CIPHERTEXT )
//! ```
//!
//! Argon2id turns the key text into an XChaCha20-Poly1305 key. Everything
//! before the ciphertext is authenticated as associated data, so neither the
//! cost parameters nor the salt can be swapped without failing to open.

use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use super::kdf::{self, KdfParams};
use super::symmetric::decode;
use super::{NONCE_LEN, SALT_LEN, fill_random};
use crate::error::{Error, Result};

pub const PREFIX: &str = "$v2$";

const PARAMS_LEN: usize = 12;
const PREAMBLE_LEN: usize = PARAMS_LEN + SALT_LEN + NONCE_LEN;
/// Largest memory cost accepted from a sealed value (1 GiB).
const MAX_MEM_COST_KIB: u32 = 1 << 20;

pub fn is_sealed(text: &str) -> bool {
    text.starts_with(PREFIX)
}

pub fn seal(key: &str, plaintext: &str, params: KdfParams) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let mut sealed = Vec::with_capacity(PREAMBLE_LEN + plaintext.len() + 16);
    sealed.extend_from_slice(&params.mem_cost_kib().to_le_bytes());
    sealed.extend_from_slice(&params.time_cost().to_le_bytes());
    sealed.extend_from_slice(&params.parallelism().to_le_bytes());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce);

    let cipher = cipher(key, &salt, params)?;
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_bytes(),
                aad: &sealed,
            },
        )
        .map_err(|_| Error::Encryption("sealing failed".into()))?;
    sealed.extend_from_slice(&ciphertext);

    Ok(format!("{PREFIX}{}", STANDARD.encode(sealed)))
}

pub fn open(key: &str, text: &str) -> Result<String> {
    let body = text
        .strip_prefix(PREFIX)
        .ok_or_else(|| malformed("missing $v2$ prefix"))?;
    let data = decode(body)?;
    if data.len() < PREAMBLE_LEN {
        return Err(malformed("sealed value too short"));
    }
    let (preamble, ciphertext) = data.split_at(PREAMBLE_LEN);

    let mem_cost_kib = read_u32(preamble, 0);
    if mem_cost_kib > MAX_MEM_COST_KIB {
        return Err(malformed("sealed value asks for too much memory"));
    }
    let params = KdfParams::new(mem_cost_kib, read_u32(preamble, 4), read_u32(preamble, 8))
        .map_err(|e| malformed(&e.to_string()))?;
    let salt = &preamble[PARAMS_LEN..PARAMS_LEN + SALT_LEN];
    let nonce = &preamble[PARAMS_LEN + SALT_LEN..];

    let plaintext = cipher(key, salt, params)?
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: preamble,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| Error::Decryption("wrong key or corrupted sealed value".into()))?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| Error::Decryption("plaintext is not valid utf-8".into()))
}

fn cipher(key: &str, salt: &[u8], params: KdfParams) -> Result<XChaCha20Poly1305> {
    let derived = kdf::derive_key(key, salt, params)?;
    XChaCha20Poly1305::new_from_slice(derived.as_slice())
        .map_err(|_| Error::Encryption("derived key has the wrong length".into()))
}

// callers check the preamble length first
fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn malformed(msg: &str) -> Error {
    Error::Decryption(msg.to_string())
}
