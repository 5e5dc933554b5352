//! Secret generation utilities for control keys and cipher keys.
//!
//! This module provides functions for generating cryptographically
//! secure random secrets suitable for use as pre-shared keys.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, KeyInit as _,
    aead::OsRng,
};
use rand::distr::{Alphanumeric, SampleString as _};

/// Generates a random secret string suitable for use as the control key.
///
/// Returns a 32-character alphanumeric string.
#[must_use]
pub fn generate_secret() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 32)
}

/// Generates a fresh 256 bit key for [`crate::SecretCipher`], base64 encoded.
#[must_use]
pub fn generate_cipher_key() -> String {
    STANDARD.encode(ChaCha20Poly1305::generate_key(&mut OsRng))
}
