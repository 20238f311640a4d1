//! AES-256-GCM sealing and PBKDF2 primitives built on `ring`.
//!
//! - **Sealing**: every stored secret slot is encrypted with AES-256-GCM
//!   under the master key, with a fresh random 96-bit nonce per write. The
//!   slot's storage key is bound as associated data, so a ciphertext lifted
//!   from one slot fails authentication when replayed into the other.
//! - **Key derivation**: PBKDF2-HMAC-SHA256, used both for the device
//!   wrapping key of the file keychain and (through [`crate::hash`]) for
//!   admin password hashes.
//! - **Random generation**: cryptographically secure bytes via `ring`.

use std::num::NonZeroU32;

use ring::aead::{
    self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of PBKDF2 salts in bytes.
pub const SALT_LEN: usize = 32;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Iteration count for the keychain's device wrapping key.
pub(crate) const DEVICE_KEY_ITERATIONS: u32 = 600_000;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors, so each
/// sealing key is used for a single message.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
///
/// Returns `(nonce, ciphertext || tag)`.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the key length is wrong or
/// `ring` reports a failure.
pub fn seal(plaintext: &[u8], aad: &[u8], key: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    let fail = |reason: String| VaultError::EncryptionFailed { reason };

    let unbound = aead_key(key).map_err(fail)?;

    let mut nonce = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| fail("system RNG could not produce a nonce".into()))?;

    let mut buf = plaintext.to_vec();
    SealingKey::new(unbound, SingleNonce::new(nonce))
        .seal_in_place_append_tag(Aad::from(aad), &mut buf)
        .map_err(|_| fail("AES-256-GCM seal rejected the input".into()))?;

    tracing::trace!(len = buf.len(), "sealed");
    Ok((nonce, buf))
}

/// Decrypt `ciphertext` (tag included) sealed by [`seal`] with the same
/// `aad` and `key`.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] if the key is wrong, the
/// ciphertext or associated data has been tampered with, or the nonce does
/// not match.
pub fn open(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
    key: &[u8],
) -> Result<Vec<u8>> {
    let fail = |reason: String| VaultError::DecryptionFailed { reason };

    let unbound = aead_key(key).map_err(fail)?;

    let mut buf = ciphertext.to_vec();
    let plain_len = OpeningKey::new(unbound, SingleNonce::new(*nonce))
        .open_in_place(Aad::from(aad), &mut buf)
        .map_err(|_| fail("authentication failed, wrong key or corrupted data".into()))?
        .len();

    buf.truncate(plain_len);
    Ok(buf)
}

fn aead_key(key: &[u8]) -> std::result::Result<UnboundKey, String> {
    if key.len() != KEY_LEN {
        return Err(format!("AES-256-GCM key must be {KEY_LEN} bytes, got {}", key.len()));
    }
    UnboundKey::new(AEAD_ALG, key).map_err(|_| "ring rejected the AES-256-GCM key".to_owned())
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive `out.len()` bytes from `secret` and `salt` with PBKDF2-HMAC-SHA256.
pub fn pbkdf2_derive(iterations: NonZeroU32, salt: &[u8], secret: &[u8], out: &mut [u8]) {
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, secret, out);
}

/// Constant-time check that `secret` derives to `expected` under `salt`.
pub fn pbkdf2_verify(iterations: NonZeroU32, salt: &[u8], secret: &[u8], expected: &[u8]) -> bool {
    pbkdf2::verify(PBKDF2_ALG, iterations, salt, secret, expected).is_ok()
}

/// Derive a 256-bit key from `secret` and `salt` using the device-key cost.
pub fn derive_key_with_salt(secret: &[u8], salt: &[u8], out: &mut [u8; KEY_LEN]) {
    let iterations = NonZeroU32::new(DEVICE_KEY_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    pbkdf2_derive(iterations, salt, secret, out);
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

/// Generate a fresh 256-bit master key.
pub fn generate_master_key() -> Result<Vec<u8>> {
    random_bytes(KEY_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_master_key().unwrap();
        let (nonce, ciphertext) = seal(b"$pbkdf2-sha256$i=1000$aa$bb", b"primary", &key).unwrap();
        let plaintext = open(&nonce, &ciphertext, b"primary", &key).unwrap();
        assert_eq!(plaintext, b"$pbkdf2-sha256$i=1000$aa$bb");
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let key1 = generate_master_key().unwrap();
        let key2 = generate_master_key().unwrap();

        let (nonce, ciphertext) = seal(b"secret", b"primary", &key1).unwrap();
        assert!(open(&nonce, &ciphertext, b"primary", &key2).is_err());
    }

    #[test]
    fn ciphertext_is_bound_to_its_slot() {
        let key = generate_master_key().unwrap();
        let (nonce, ciphertext) = seal(b"hash", b"secondary", &key).unwrap();

        let result = open(&nonce, &ciphertext, b"primary", &key);
        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_master_key().unwrap();
        let (nonce, mut ciphertext) = seal(b"hash", b"primary", &key).unwrap();
        if let Some(byte) = ciphertext.first_mut() {
            *byte ^= 0x01;
        }
        assert!(open(&nonce, &ciphertext, b"primary", &key).is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16];
        assert!(seal(b"test", b"", &short_key).is_err());
    }

    #[test]
    fn pbkdf2_derive_and_verify() {
        let iterations = NonZeroU32::new(1_000).unwrap();
        let salt = random_bytes(SALT_LEN).unwrap();
        let mut out = [0u8; KEY_LEN];
        pbkdf2_derive(iterations, &salt, b"correct horse", &mut out);

        assert!(pbkdf2_verify(iterations, &salt, b"correct horse", &out));
        assert!(!pbkdf2_verify(iterations, &salt, b"wrong horse", &out));
    }
}
