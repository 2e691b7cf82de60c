use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// An RSA key pair.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
}

/// Textual (PEM) form of a key pair. Either half may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportedKeys {
    pub private_key: Option<Zeroizing<String>>,
    pub public_key: Option<String>,
}

/// Parsed key objects. Either half may be missing.
#[derive(Clone, Debug, Default)]
pub struct Keys {
    pub private_key: Option<RsaPrivateKey>,
    pub public_key: Option<RsaPublicKey>,
}

/// Generates a key pair on the blocking pool.
pub async fn generate_key_pair(bits: usize) -> Result<KeyPair> {
    debug!(bits, "generating rsa key pair");
    tokio::task::spawn_blocking(move || generate_key_pair_blocking(bits))
        .await
        .map_err(|e| Error::KeyGeneration(format!("key generation worker failed: {e}")))?
}

pub fn generate_key_pair_blocking(bits: usize) -> Result<KeyPair> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| Error::KeyGeneration(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// Serializes both halves to PEM. A half that fails to encode is `None`.
pub fn export_keys(
    private_key: Option<&RsaPrivateKey>,
    public_key: Option<&RsaPublicKey>,
) -> ExportedKeys {
    ExportedKeys {
        private_key: private_key.and_then(|key| key.to_pkcs8_pem(LineEnding::LF).ok()),
        public_key: public_key.and_then(|key| key.to_public_key_pem(LineEnding::LF).ok()),
    }
}

/// Parses both halves from PEM. A half that fails to parse is `None`.
pub fn import_keys(private_pem: Option<&str>, public_pem: Option<&str>) -> Keys {
    Keys {
        private_key: private_pem.and_then(|pem| RsaPrivateKey::from_pkcs8_pem(pem).ok()),
        public_key: public_pem.and_then(|pem| RsaPublicKey::from_public_key_pem(pem).ok()),
    }
}
