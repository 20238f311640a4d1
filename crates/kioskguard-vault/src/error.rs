//! Vault error types.
//!
//! All vault subsystems surface errors through [`VaultError`], which is the
//! single error type returned by every public API in this crate. Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings. No variant ever carries a plaintext
//! secret.

use crate::command::CommandError;
use crate::policy::PolicyRule;

/// Unified error type for the KioskGuard credential core.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. invalid key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed (e.g. wrong key, corrupted ciphertext, bad nonce).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Password hashing or key derivation failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// A stored hash string could not be parsed.
    #[error("malformed password hash: {reason}")]
    MalformedHash { reason: String },

    // -- Keychain errors ----------------------------------------------------
    /// The master key could not be retrieved from the keychain.
    #[error("master key not found in keychain")]
    MasterKeyNotFound,

    /// Writing the master key to the keychain failed.
    #[error("failed to store master key: {reason}")]
    MasterKeyStoreFailed { reason: String },

    /// The keychain backend is unavailable or unsupported on this platform.
    #[error("keychain unavailable: {reason}")]
    KeychainUnavailable { reason: String },

    // -- Store errors -------------------------------------------------------
    /// The storage backend failed twice in a row. Fatal to the current
    /// operation, not to the process.
    #[error("credential store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Database schema migration failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    // -- Policy errors ------------------------------------------------------
    /// The candidate password does not satisfy the password policy.
    #[error("password policy violation: {}", describe_rules(.violations))]
    PolicyViolation { violations: Vec<PolicyRule> },

    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // -- Input errors -------------------------------------------------------
    /// A slot name other than `primary` or `secondary`.
    #[error("unknown slot `{name}`, expected `primary` or `secondary`")]
    UnknownSlot { name: String },

    // -- Command channel ----------------------------------------------------
    /// An admin command could not be parsed.
    #[error(transparent)]
    Command(#[from] CommandError),

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error from the filesystem (keychain file operations, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant. Prefer a typed variant whenever possible.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether the error comes from backend I/O and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }

    /// Whether the error is a password policy violation.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}

fn describe_rules(rules: &[PolicyRule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let io = VaultError::Io(std::io::Error::other("disk gone"));
        assert!(io.is_transient());

        let tampered = VaultError::DecryptionFailed {
            reason: "bad tag".into(),
        };
        assert!(!tampered.is_transient());
        assert!(!VaultError::MasterKeyNotFound.is_transient());
    }

    #[test]
    fn policy_violation_lists_rules() {
        let err = VaultError::PolicyViolation {
            violations: vec![PolicyRule::MissingDigit, PolicyRule::MissingSymbol],
        };
        let msg = err.to_string();
        assert!(msg.contains("digit"));
        assert!(msg.contains("symbol"));
        assert!(err.is_policy_violation());
    }

    #[test]
    fn unknown_slot_names_the_input() {
        let err = VaultError::UnknownSlot {
            name: "tertiary".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown slot `tertiary`, expected `primary` or `secondary`"
        );
        assert!(!err.is_transient());
    }
}
