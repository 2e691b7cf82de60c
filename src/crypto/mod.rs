//! Cryptographic primitives for the messaging core.
//!
//! Provides hashing, password-keyed symmetric encryption, the signed RSA
//! envelope for messages, and key generation, import and export.

pub mod envelope;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod sealed;
pub mod symmetric;

pub use envelope::EnvelopeLayout;
pub use kdf::KdfParams;
pub use keys::{ExportedKeys, KeyPair, Keys};

use std::str::FromStr;

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{Error, Result};

/// Length of the salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the nonce (24 bytes for XChaCha20-Poly1305).
pub const NONCE_LEN: usize = 24;
/// Length of the versioned format's encryption key (32 bytes / 256 bits).
pub const AEAD_KEY_LEN: usize = 32;
/// Length of the legacy PBKDF2 secret (16 bytes / 128 bits).
pub const LEGACY_SECRET_LEN: usize = 16;
/// PBKDF2 rounds of the legacy format.
pub const PBKDF2_ROUNDS: u32 = 10_000;
/// Length of the random per-message key inside an envelope.
pub const ENVELOPE_KEY_LEN: usize = 16;
/// Length of an HMAC-SHA256 tag.
pub const HMAC_LEN: usize = 32;
/// Width of a base64-encoded HMAC tag.
pub const HMAC_B64_LEN: usize = 44;
/// Default RSA modulus size.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Fills `buf` from the operating system's random generator.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|_| Error::Encryption("OS random generator unavailable".into()))
}

/// Output format of [`Cryptography::encrypt_sym`].
///
/// Decryption accepts both formats regardless of this setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SealFormat {
    /// PBKDF2 key doubling as the CBC IV. Interoperates with existing data.
    #[default]
    Legacy,
    /// Argon2id + XChaCha20-Poly1305 with a random salt and nonce.
    Versioned(KdfParams),
}

impl FromStr for SealFormat {
    type Err = Error;

    /// `legacy`, or `v2` for the versioned format with default Argon2 costs.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(SealFormat::Legacy),
            "v2" => Ok(SealFormat::Versioned(KdfParams::default())),
            other => Err(Error::InvalidKey(format!(
                "unknown seal format {other:?}, expected \"legacy\" or \"v2\""
            ))),
        }
    }
}

/// The `cryptography` member of the store's `utils` augmentation.
#[derive(Debug, Clone)]
pub struct Cryptography {
    key_bits: usize,
    seal_format: SealFormat,
}

impl Default for Cryptography {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_BITS)
    }
}

impl Cryptography {
    pub fn new(key_bits: usize) -> Self {
        Self {
            key_bits,
            seal_format: SealFormat::Legacy,
        }
    }

    pub fn with_seal_format(mut self, seal_format: SealFormat) -> Self {
        self.seal_format = seal_format;
        self
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    pub fn seal_format(&self) -> SealFormat {
        self.seal_format
    }

    pub fn hash(&self, input: &str, iterations: u32) -> String {
        hash::hash(input, iterations)
    }

    pub fn hmac(&self, key: &str, data: &str) -> Result<String> {
        hash::hmac(key, data)
    }

    pub fn verify_hmac(&self, key: &str, data: &str, tag: &str) -> Result<()> {
        hash::verify_hmac(key, data, tag)
    }

    pub async fn generate_key_pair(&self) -> Result<KeyPair> {
        keys::generate_key_pair(self.key_bits).await
    }

    pub fn encrypt_sym(&self, key: &str, plaintext: &str) -> Result<String> {
        symmetric::encrypt_sym(key, plaintext, self.seal_format)
    }

    pub fn decrypt_sym(&self, key: &str, ciphertext: &str) -> Result<String> {
        symmetric::decrypt_sym(key, ciphertext)
    }

    pub fn encrypt_asym(
        &self,
        recipient: &RsaPublicKey,
        sender: &RsaPrivateKey,
        message: &str,
    ) -> Result<String> {
        envelope::encrypt_asym(recipient, sender, message)
    }

    pub fn decrypt_asym(
        &self,
        recipient: &RsaPrivateKey,
        sender: &RsaPublicKey,
        envelope: &str,
    ) -> Result<String> {
        envelope::decrypt_asym(recipient, sender, envelope)
    }

    pub fn export_keys(
        &self,
        private_key: Option<&RsaPrivateKey>,
        public_key: Option<&RsaPublicKey>,
    ) -> ExportedKeys {
        keys::export_keys(private_key, public_key)
    }

    pub fn import_keys(&self, private_pem: Option<&str>, public_pem: Option<&str>) -> Keys {
        keys::import_keys(private_pem, public_pem)
    }
}
