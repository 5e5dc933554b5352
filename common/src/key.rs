//! Constant-time verification of the pre-shared control key.
//!
//! Both sides are run through HMAC-SHA256 under a fixed label and the tags are
//! compared with [`Mac::verify_slice`], which does not short-circuit on the first
//! differing byte. This also hides the length of the expected key.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret as _, SecretString};
use sha2::Sha256;

const KEY_LABEL: &[u8] = b"tenantgate-control-key";

/// Creates an HMAC instance keyed by `key` over the fixed label.
#[expect(
    clippy::missing_panics_doc,
    reason = "Expectation should never be false"
)]
#[must_use]
fn keyed_label(key: &[u8]) -> Hmac<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take a key of any size");
    mac.update(KEY_LABEL);
    mac
}

/// Returns `true` if `presented` equals `expected`, compared in constant time.
#[must_use]
pub fn verify_control_key(presented: &str, expected: &SecretString) -> bool {
    let tag = keyed_label(presented.as_bytes()).finalize().into_bytes();
    keyed_label(expected.expose_secret().as_bytes())
        .verify_slice(&tag)
        .is_ok()
}
