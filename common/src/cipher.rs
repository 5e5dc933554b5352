//! Envelope encryption for tenant database credentials.
//!
//! Secrets are stored by the tenant-management service as
//! `enc:v1:<nonce>:<ciphertext>`, both parts base64url without padding,
//! sealed with ChaCha20-Poly1305 under a single service key.

use core::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    AeadCore as _, ChaCha20Poly1305, KeyInit as _, Nonce,
    aead::{Aead as _, OsRng},
};
use secrecy::{ExposeSecret as _, SecretString};
use thiserror::Error as ThisError;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

#[derive(Debug, ThisError)]
pub enum CipherError {
    #[error("cipher key is not valid base64")]
    KeyEncoding,
    #[error("cipher key must be 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("secret envelope is malformed")]
    MalformedEnvelope,
    #[error("secret envelope failed authentication")]
    Authentication,
    #[error("decrypted secret is not valid UTF-8")]
    Utf8,
}

/// Seals and opens secret envelopes with a single 256 bit key.
#[derive(Clone)]
pub struct SecretCipher {
    aead: ChaCha20Poly1305,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Builds a cipher from a standard base64 encoded 32 byte key.
    pub fn from_base64(key: &SecretString) -> Result<Self, CipherError> {
        let raw = STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|_| CipherError::KeyEncoding)?;
        let aead =
            ChaCha20Poly1305::new_from_slice(&raw).map_err(|_| CipherError::KeyLength(raw.len()))?;
        Ok(Self { aead })
    }

    /// Seals `plaintext` into a fresh envelope with a random nonce.
    pub fn encrypt(&self, plaintext: &SecretString) -> Result<String, CipherError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, plaintext.expose_secret().as_bytes())
            .map_err(|_| CipherError::Authentication)?;
        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    /// Opens an envelope produced by [`SecretCipher::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<SecretString, CipherError> {
        let body = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CipherError::MalformedEnvelope)?;
        let (nonce_b64, ciphertext_b64) = body
            .split_once(':')
            .ok_or(CipherError::MalformedEnvelope)?;
        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|_| CipherError::MalformedEnvelope)?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(CipherError::MalformedEnvelope);
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|_| CipherError::MalformedEnvelope)?;
        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_slice())
            .map_err(|_| CipherError::Authentication)?;
        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| CipherError::Utf8)
    }
}
