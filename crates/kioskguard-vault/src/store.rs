//! Credential store: the two admin secret slots.
//!
//! The store maps a [`Slot`] to the hash string held for it. An empty string
//! means the slot was never written. Slots are never deleted.
//!
//! Guarantees:
//!
//! - `put` on a slot is serialized by a per-slot lock; concurrent writers
//!   resolve to last-writer-wins, never to an interleaved value.
//! - Every backend call is retried once on a transient failure; a second
//!   failure surfaces as [`VaultError::StoreUnavailable`].
//! - [`CredentialStore::open`] migrates legacy plaintext values to hashes and
//!   seeds each empty slot with the hash of its compliant default.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::backend::SecretBackend;
use crate::error::{Result, VaultError};
use crate::hash::{self, PasswordHasher};

/// Shipped default for the primary slot.
pub const DEFAULT_PRIMARY: &str = "KhsDefault@123";

/// Shipped default for the secondary slot.
pub const DEFAULT_SECONDARY: &str = "Secondary@456";

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One of the two independent admin secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Unlocks the kiosk.
    Primary,
    /// Authorizes changes to the primary secret.
    Secondary,
}

impl Slot {
    /// Both slots, primary first.
    pub const ALL: [Slot; 2] = [Slot::Primary, Slot::Secondary];

    /// Storage key used by the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parse a storage key.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }

    /// The compliant secret a fresh store is seeded with.
    pub fn default_secret(&self) -> &'static str {
        match self {
            Self::Primary => DEFAULT_PRIMARY,
            Self::Secondary => DEFAULT_SECONDARY,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Slot {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| VaultError::UnknownSlot { name: s.to_owned() })
    }
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

/// Hash storage for the primary and secondary admin secrets.
pub struct CredentialStore {
    backend: Box<dyn SecretBackend>,
    hasher: PasswordHasher,
    slot_locks: [Mutex<()>; 2],
}

impl CredentialStore {
    /// Wrap `backend` without touching its contents.
    ///
    /// Slots that were never written stay empty and fail verification.
    /// Production code should use [`open`](Self::open).
    pub fn new(backend: impl SecretBackend + 'static, hasher: PasswordHasher) -> Self {
        Self {
            backend: Box::new(backend),
            hasher,
            slot_locks: [Mutex::new(()), Mutex::new(())],
        }
    }

    /// Wrap `backend`, migrate legacy plaintext values and seed empty slots
    /// with their defaults. Run once per store lifetime.
    pub fn open(backend: impl SecretBackend + 'static, hasher: PasswordHasher) -> Result<Self> {
        let store = Self::new(backend, hasher);

        let migrated = store.migrate_legacy()?;
        if migrated > 0 {
            tracing::warn!(migrated, "rehashed legacy plaintext secrets");
        }

        for slot in Slot::ALL {
            store.initialize_if_empty(slot, slot.default_secret())?;
        }

        Ok(store)
    }

    /// The hasher used for defaults and migrations.
    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// The stored hash for `slot`, or an empty string if never set.
    pub fn get(&self, slot: Slot) -> Result<String> {
        let bytes = self.with_retry("load", slot, || self.backend.load(slot.as_str()))?;
        match bytes {
            None => Ok(String::new()),
            Some(bytes) => String::from_utf8(bytes).map_err(|_| VaultError::DecryptionFailed {
                reason: format!("{slot} slot does not hold text"),
            }),
        }
    }

    /// Overwrite the hash stored for `slot`.
    pub fn put(&self, slot: Slot, hash: &str) -> Result<()> {
        let _guard = self.lock_slot(slot)?;
        self.put_locked(slot, hash)
    }

    /// Seed `slot` with the hash of `default` if it is empty.
    ///
    /// Returns `true` if the slot was written. A second call is a no-op.
    pub fn initialize_if_empty(&self, slot: Slot, default: &str) -> Result<bool> {
        let _guard = self.lock_slot(slot)?;

        if !self.get(slot)?.is_empty() {
            return Ok(false);
        }

        let hash = self.hasher.hash(default)?;
        self.put_locked(slot, &hash)?;
        tracing::info!(slot = %slot, "initialized empty slot with default secret");
        Ok(true)
    }

    /// Rehash any slot that still holds a legacy plaintext secret.
    ///
    /// A value counts as plaintext when it is non-empty, not a recognized
    /// hash and does not start with `$`. Values in another hash scheme are
    /// left untouched and fail verification. Returns the number of slots
    /// rewritten.
    pub fn migrate_legacy(&self) -> Result<usize> {
        let mut migrated = 0;

        for slot in Slot::ALL {
            let _guard = self.lock_slot(slot)?;
            let stored = Zeroizing::new(self.get(slot)?);

            if stored.is_empty() || hash::is_recognized(&stored) {
                continue;
            }

            if stored.starts_with('$') {
                tracing::warn!(
                    slot = %slot,
                    "slot holds an unsupported hash scheme and will reject all input until reset"
                );
                continue;
            }

            let hash = self.hasher.hash(&stored)?;
            self.put_locked(slot, &hash)?;
            tracing::info!(slot = %slot, "migrated legacy plaintext secret to hash");
            migrated += 1;
        }

        Ok(migrated)
    }

    /// When `slot` was last written, if known.
    pub fn last_changed(&self, slot: Slot) -> Result<Option<DateTime<Utc>>> {
        self.with_retry("last_modified", slot, || {
            self.backend.last_modified(slot.as_str())
        })
    }

    // -- Internal helpers ---------------------------------------------------

    fn put_locked(&self, slot: Slot, hash: &str) -> Result<()> {
        self.with_retry("save", slot, || {
            self.backend.save(slot.as_str(), hash.as_bytes())
        })
    }

    fn lock_slot(&self, slot: Slot) -> Result<MutexGuard<'_, ()>> {
        self.slot_locks[slot.index()]
            .lock()
            .map_err(|e| VaultError::Internal(format!("{slot} slot lock poisoned: {e}")))
    }

    /// Run `op`, retrying once on a transient failure.
    fn with_retry<T>(
        &self,
        op: &'static str,
        slot: Slot,
        mut f: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        match f() {
            Err(e) if e.is_transient() => {
                tracing::warn!(op, slot = %slot, error = %e, "secret store call failed, retrying once");
                f().map_err(|e| {
                    if e.is_transient() {
                        tracing::error!(op, slot = %slot, error = %e, "secret store unavailable");
                        VaultError::StoreUnavailable {
                            reason: format!("{op} {slot}: {e}"),
                        }
                    } else {
                        e
                    }
                })
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
