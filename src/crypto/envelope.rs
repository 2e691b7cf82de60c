//! Signed hybrid envelope for message contents.
//!
//! ```text
//! base64( SIGNATURE (sender modulus) | WRAPPED KEY (recipient modulus) | AES-128-CBC BODY )
//! ```
//!
//! The signature is PKCS#1 v1.5 over the SHA-1 digest of the plaintext. The
//! body key is 16 random bytes, wrapped with RSA-OAEP(SHA-1), and doubles as
//! the CBC IV since it is used for a single message.

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use super::symmetric::{cbc_decrypt, cbc_encrypt, decode};
use super::{ENVELOPE_KEY_LEN, fill_random};
use crate::error::{Error, Result};

/// Block widths of an envelope, derived from the two keys involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeLayout {
    pub signature_len: usize,
    pub key_len: usize,
}

impl EnvelopeLayout {
    pub fn new(sender: &impl PublicKeyParts, recipient: &impl PublicKeyParts) -> Self {
        Self {
            signature_len: sender.size(),
            key_len: recipient.size(),
        }
    }

    /// Offset of the encrypted body.
    pub fn body_offset(&self) -> usize {
        self.signature_len + self.key_len
    }
}

pub fn encrypt_asym(
    recipient: &RsaPublicKey,
    sender: &RsaPrivateKey,
    message: &str,
) -> Result<String> {
    let layout = EnvelopeLayout::new(sender, recipient);

    let digest = Sha1::digest(message.as_bytes());
    let signature = sender
        .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
        .map_err(|e| Error::Encryption(format!("signing failed: {e}")))?;

    let mut cipher_key = Zeroizing::new([0u8; ENVELOPE_KEY_LEN]);
    fill_random(cipher_key.as_mut_slice())?;

    let body = cbc_encrypt(cipher_key.as_slice(), cipher_key.as_slice(), message.as_bytes())?;
    let wrapped_key = recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), cipher_key.as_slice())
        .map_err(|e| Error::Encryption(format!("key wrapping failed: {e}")))?;

    if signature.len() != layout.signature_len || wrapped_key.len() != layout.key_len {
        return Err(Error::Encryption("envelope block has unexpected width".into()));
    }

    let mut envelope = Vec::with_capacity(layout.body_offset() + body.len());
    envelope.extend_from_slice(&signature);
    envelope.extend_from_slice(&wrapped_key);
    envelope.extend_from_slice(&body);

    Ok(STANDARD.encode(envelope))
}

pub fn decrypt_asym(
    recipient: &RsaPrivateKey,
    sender: &RsaPublicKey,
    envelope: &str,
) -> Result<String> {
    let layout = EnvelopeLayout::new(sender, recipient);
    let raw = decode(envelope)?;

    if raw.len() <= layout.body_offset() {
        return Err(Error::Decryption("envelope too short".into()));
    }

    let (signature, rest) = raw.split_at(layout.signature_len);
    let (wrapped_key, body) = rest.split_at(layout.key_len);

    let cipher_key = Zeroizing::new(
        recipient
            .decrypt(Oaep::new::<Sha1>(), wrapped_key)
            .map_err(|_| Error::Decryption("cannot unwrap message key".into()))?,
    );
    if cipher_key.len() != ENVELOPE_KEY_LEN {
        return Err(Error::Decryption("message key has the wrong length".into()));
    }

    let plaintext = cbc_decrypt(&cipher_key, &cipher_key, body)?;

    let digest = Sha1::digest(&plaintext);
    sender
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
        .map_err(|_| Error::SignatureVerification)?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::Decryption("message is not valid utf-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys;

    fn tamper(envelope: &str, index: usize) -> String {
        let mut raw = STANDARD.decode(envelope).unwrap();
        raw[index] ^= 0xff;
        STANDARD.encode(raw)
    }

    #[test]
    fn roundtrip_between_two_parties() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());

        let envelope = encrypt_asym(&bob.public_key, &alice.private_key, "hello, world!").unwrap();
        let plain = decrypt_asym(&bob.private_key, &alice.public_key, &envelope).unwrap();

        assert_eq!(plain, "hello, world!");
    }

    #[test]
    fn blocks_follow_modulus_width() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());
        let envelope = encrypt_asym(&bob.public_key, &alice.private_key, "x").unwrap();

        let layout = EnvelopeLayout::new(&alice.public_key, &bob.public_key);
        assert_eq!(layout.signature_len, alice.public_key.size());
        assert_eq!(layout.key_len, bob.public_key.size());

        let raw = STANDARD.decode(envelope).unwrap();
        // one AES block of body for a one byte message
        assert_eq!(raw.len(), layout.body_offset() + 16);
    }

    #[test]
    fn every_signature_byte_is_checked() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());
        let envelope = encrypt_asym(&bob.public_key, &alice.private_key, "hi").unwrap();
        let width = alice.public_key.size();

        for index in [0, 1, width / 2, width - 1] {
            let forged = tamper(&envelope, index);
            assert!(matches!(
                decrypt_asym(&bob.private_key, &alice.public_key, &forged),
                Err(Error::SignatureVerification)
            ));
        }
    }

    #[test]
    fn wrong_sender_fails_verification() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());
        let envelope = encrypt_asym(&bob.public_key, &alice.private_key, "hi").unwrap();

        assert!(matches!(
            decrypt_asym(&bob.private_key, &bob.public_key, &envelope),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn tampered_key_block_is_a_decryption_error() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());
        let envelope = encrypt_asym(&bob.public_key, &alice.private_key, "hi").unwrap();
        let forged = tamper(&envelope, alice.public_key.size() + 3);

        assert!(matches!(
            decrypt_asym(&bob.private_key, &alice.public_key, &forged),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());
        let envelope = encrypt_asym(&bob.public_key, &alice.private_key, "hi").unwrap();

        assert!(matches!(
            decrypt_asym(&alice.private_key, &alice.public_key, &envelope),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let (alice, bob) = (test_keys::alice(), test_keys::bob());
        assert!(matches!(
            decrypt_asym(&bob.private_key, &alice.public_key, "AAAA"),
            Err(Error::Decryption(_))
        ));
    }
}
