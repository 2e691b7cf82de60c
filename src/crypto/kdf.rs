use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use zeroize::Zeroizing;

use super::{AEAD_KEY_LEN, LEGACY_SECRET_LEN, PBKDF2_ROUNDS};
use crate::error::{Error, Result};

/// Derives the 128-bit AES secret of the legacy symmetric format.
///
/// PBKDF2-HMAC-SHA1 with an empty salt, so the output depends on `key` only.
/// The same bytes serve as the AES key and the CBC IV.
pub fn legacy_secret(key: &str) -> Zeroizing<[u8; LEGACY_SECRET_LEN]> {
    let mut secret = Zeroizing::new([0u8; LEGACY_SECRET_LEN]);
    pbkdf2_hmac::<Sha1>(key.as_bytes(), b"", PBKDF2_ROUNDS, secret.as_mut_slice());
    secret
}

/// Argon2id cost parameters of the versioned sealed format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024, // 64 MiB
            time_cost: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidKey(format!("argon2 {msg}")));
        if self.mem_cost_kib < 8 {
            return invalid("memory cost too low");
        }
        if self.time_cost < 1 {
            return invalid("time cost must be >= 1");
        }
        if self.parallelism < 1 {
            return invalid("parallelism must be >= 1");
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return invalid("memory cost must be at least 8 * parallelism");
        }
        Ok(())
    }
}

/// Derives the XChaCha20-Poly1305 key of the versioned format.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; AEAD_KEY_LEN]>> {
    kdf.validate()?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(AEAD_KEY_LEN),
    )
    .map_err(|e| Error::InvalidKey(format!("failed to construct argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; AEAD_KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| Error::Encryption(format!("argon2 key derivation failed: {e}")))?;

    Ok(key)
}
