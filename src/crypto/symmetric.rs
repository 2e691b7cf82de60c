//! Password-keyed symmetric encryption.
//!
//! Two formats share one text representation:
//! - legacy: `base64(AES-128-CBC(plaintext))`, key and IV both taken from
//!   [`kdf::legacy_secret`];
//! - versioned: the [`sealed`](super::sealed) `$v2$` format.
//!
//! `$` is outside the base64 alphabet, so the prefix is never ambiguous.

use aes::Aes128;
use base64::{Engine, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};

use super::kdf;
use super::{SealFormat, sealed};
use crate::error::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub fn encrypt_sym(key: &str, plaintext: &str, format: SealFormat) -> Result<String> {
    match format {
        SealFormat::Legacy => {
            let secret = kdf::legacy_secret(key);
            let ciphertext = cbc_encrypt(secret.as_slice(), secret.as_slice(), plaintext.as_bytes())?;
            Ok(STANDARD.encode(ciphertext))
        }
        SealFormat::Versioned(params) => sealed::seal(key, plaintext, params),
    }
}

pub fn decrypt_sym(key: &str, ciphertext: &str) -> Result<String> {
    if sealed::is_sealed(ciphertext) {
        return sealed::open(key, ciphertext);
    }

    let raw = decode(ciphertext)?;
    let secret = kdf::legacy_secret(key);
    let plaintext = cbc_decrypt(secret.as_slice(), secret.as_slice(), &raw)?;
    utf8(plaintext)
}

/// AES-128-CBC with PKCS#7 padding.
pub fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|_| Error::Encryption("aes key and iv must be 16 bytes".into()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| Error::Decryption("aes key and iv must be 16 bytes".into()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Decryption("wrong key or corrupted ciphertext".into()))
}

pub(crate) fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| Error::Decryption(format!("malformed base64: {e}")))
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| Error::Decryption("plaintext is not valid utf-8".into()))
}
