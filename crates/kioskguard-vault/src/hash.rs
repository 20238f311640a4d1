//! Self-describing password hashes.
//!
//! Admin secrets are stored as PBKDF2-HMAC-SHA256 digests in a PHC-style
//! string that carries everything needed to verify them later:
//!
//! ```text
//! $pbkdf2-sha256$i=600000$<base64 salt>$<base64 digest>
//! ```
//!
//! The cost is fixed per deployment by the [`PasswordHasher`] that writes
//! the hash, and read back from the string on verification so that raising
//! the cost never invalidates existing secrets.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::crypto::{self, KEY_LEN, SALT_LEN};
use crate::error::{Result, VaultError};

/// Algorithm tag written into every hash.
pub const HASH_SCHEME: &str = "pbkdf2-sha256";

/// Prefix every recognized hash starts with.
pub const HASH_PREFIX: &str = "$pbkdf2-sha256$";

/// Default PBKDF2 iteration count (OWASP 2023 for HMAC-SHA256).
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Lowest accepted iteration count.
pub const MIN_ITERATIONS: u32 = 1_000;

/// Highest accepted iteration count. Bounds the work a crafted hash string
/// can demand during verification.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Salt for the equal-cost derivation run when there is nothing to verify.
const DUMMY_SALT: &[u8; SALT_LEN] = b"kioskguard-empty-slot-salt-v1\x00\x00\x00";

/// Hashes and verifies admin passwords at a fixed cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    iterations: NonZeroU32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            iterations: NonZeroU32::new(DEFAULT_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl PasswordHasher {
    /// Create a hasher with the given cost.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidConfig`] if `iterations` lies outside
    /// `MIN_ITERATIONS..=MAX_ITERATIONS`.
    pub fn new(iterations: u32) -> Result<Self> {
        Ok(Self {
            iterations: checked_iterations(iterations).ok_or_else(|| VaultError::InvalidConfig {
                reason: format!(
                    "pbkdf2 iterations must be within {MIN_ITERATIONS}..={MAX_ITERATIONS}, got {iterations}"
                ),
            })?,
        })
    }

    /// The cost this hasher writes into new hashes.
    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// Hash `password` with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = crypto::random_bytes(SALT_LEN).map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;

        let mut digest = [0u8; KEY_LEN];
        crypto::pbkdf2_derive(self.iterations, &salt, password.as_bytes(), &mut digest);

        Ok(format!(
            "{HASH_PREFIX}i={}${}${}",
            self.iterations,
            BASE64.encode(&salt),
            BASE64.encode(digest)
        ))
    }

    /// Check `password` against a stored hash in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MalformedHash`] if `encoded` is not a hash this
    /// module produced.
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool> {
        let parsed = ParsedHash::parse(encoded)?;
        Ok(crypto::pbkdf2_verify(
            parsed.iterations,
            &parsed.salt,
            password.as_bytes(),
            &parsed.digest,
        ))
    }

    /// Spend the same derivation cost as [`verify`](Self::verify) without
    /// anything to compare against. Used so an empty or unreadable slot
    /// answers no faster than a wrong password.
    pub fn burn(&self, password: &str) {
        let mut sink = [0u8; KEY_LEN];
        crypto::pbkdf2_derive(self.iterations, DUMMY_SALT, password.as_bytes(), &mut sink);
    }
}

/// Whether `encoded` carries the recognized hash prefix.
pub fn is_recognized(encoded: &str) -> bool {
    encoded.starts_with(HASH_PREFIX)
}

fn checked_iterations(iterations: u32) -> Option<NonZeroU32> {
    if (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        NonZeroU32::new(iterations)
    } else {
        None
    }
}

struct ParsedHash {
    iterations: NonZeroU32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl ParsedHash {
    fn parse(encoded: &str) -> Result<Self> {
        let malformed = |reason: &str| VaultError::MalformedHash {
            reason: reason.to_string(),
        };

        let rest = encoded
            .strip_prefix(HASH_PREFIX)
            .ok_or_else(|| malformed("unrecognized hash scheme"))?;

        let mut parts = rest.split('$');
        let (Some(cost), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected cost, salt and digest fields"));
        };

        let iterations = cost
            .strip_prefix("i=")
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(checked_iterations)
            .ok_or_else(|| malformed("invalid cost field"))?;

        let salt = BASE64
            .decode(salt)
            .map_err(|_| malformed("invalid salt encoding"))?;
        let digest = BASE64
            .decode(digest)
            .map_err(|_| malformed("invalid digest encoding"))?;

        if digest.len() != KEY_LEN {
            return Err(malformed("digest has wrong length"));
        }

        Ok(Self {
            iterations,
            salt,
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PasswordHasher {
        PasswordHasher::new(MIN_ITERATIONS).unwrap()
    }

    #[test]
    fn hash_is_self_describing() {
        let hash = fast().hash("KhsDefault@123").unwrap();
        assert!(is_recognized(&hash));
        assert!(hash.starts_with("$pbkdf2-sha256$i=1000$"));
        assert!(!hash.contains("KhsDefault@123"));
    }

    #[test]
    fn verify_accepts_only_the_original() {
        let hasher = fast();
        let hash = hasher.hash("NewPass@789").unwrap();

        assert!(hasher.verify("NewPass@789", &hash).unwrap());
        assert!(!hasher.verify("NewPass@788", &hash).unwrap());
        assert!(!hasher.verify("", &hash).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let hasher = fast();
        let a = hasher.hash("Secondary@456").unwrap();
        let b = hasher.hash("Secondary@456").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verification_uses_the_stored_cost() {
        let writer = PasswordHasher::new(2_000).unwrap();
        let hash = writer.hash("Rotated#2024x").unwrap();

        // A hasher configured with a different cost still verifies it.
        assert!(fast().verify("Rotated#2024x", &hash).unwrap());
    }

    #[test]
    fn malformed_hashes_are_rejected() {
        let hasher = fast();
        for bad in [
            "",
            "KhsDefault@123",
            "$2b$12$abcdefghijklmnopqrstuv",
            "$pbkdf2-sha256$",
            "$pbkdf2-sha256$i=1000$c2FsdA==",
            "$pbkdf2-sha256$i=abc$c2FsdA==$ZGlnZXN0",
            "$pbkdf2-sha256$i=1$c2FsdA==$ZGlnZXN0",
            "$pbkdf2-sha256$i=1000$c2FsdA==$ZGlnZXN0",
        ] {
            let result = hasher.verify("anything", bad);
            assert!(
                matches!(result, Err(VaultError::MalformedHash { .. })),
                "expected malformed for {bad:?}"
            );
        }
    }

    #[test]
    fn cost_bounds_are_enforced() {
        assert!(PasswordHasher::new(MIN_ITERATIONS - 1).is_err());
        assert!(PasswordHasher::new(MAX_ITERATIONS + 1).is_err());
        assert_eq!(PasswordHasher::default().iterations(), DEFAULT_ITERATIONS);
    }
}
