//! Access controller: policy enforcement and verification for both slots.
//!
//! [`AccessController`] is the explicitly constructed context the kiosk
//! shell receives at startup. It owns an `Arc` to the single
//! [`CredentialStore`] and is cheap to clone; every clone observes the same
//! secrets. Build it once with [`AccessController::open`] (or
//! [`AccessController::new`] over a store you opened yourself) and hand the
//! clones to the unlock dialog, the command channel and the four-eyes flow.
//!
//! Verification fails closed: an empty slot, an unreadable hash or a hash in
//! an unsupported scheme never accepts any input.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::SqliteBackend;
use crate::command::AdminCommand;
use crate::error::{Result, VaultError};
use crate::four_eyes::FourEyesSession;
use crate::hash::{self, PasswordHasher};
use crate::keychain::{self, KeychainProvider};
use crate::policy::{PasswordPolicy, PolicyRule};
use crate::store::{CredentialStore, Slot};

/// File name of the secret database inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "kiosk-secrets.db";

/// Point-in-time summary of one slot, safe to display or serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot: Slot,
    pub initialized: bool,
    pub last_changed: Option<chrono::DateTime<chrono::Utc>>,
    /// The slot still accepts its shipped default secret.
    pub rotation_required: bool,
}

/// Policy and verification front end over the credential store.
#[derive(Clone)]
pub struct AccessController {
    store: Arc<CredentialStore>,
    policy: PasswordPolicy,
}

impl AccessController {
    /// Wrap an already opened store with the default policy.
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            policy: PasswordPolicy::default(),
        }
    }

    /// Open the secret database under `data_dir`, provisioning the master
    /// key through `keychain` on first run, and seed default secrets.
    pub fn open(
        data_dir: &Path,
        database_file: &str,
        keychain: &dyn KeychainProvider,
        hasher: PasswordHasher,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let master_key = zeroize::Zeroizing::new(keychain::load_or_create_master_key(keychain)?);
        let backend = SqliteBackend::open(data_dir.join(database_file), &master_key)?;
        let store = CredentialStore::open(backend, hasher)?;

        tracing::info!(
            data_dir = %data_dir.display(),
            iterations = hasher.iterations(),
            "access controller ready"
        );
        Ok(Self::new(Arc::new(store)))
    }

    /// The underlying store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The policy applied to new secrets.
    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    // -- Policy -------------------------------------------------------------

    /// Whether `password` satisfies the password policy.
    pub fn is_compliant(&self, password: &str) -> bool {
        self.policy.is_compliant(password)
    }

    /// Every rule `password` breaks; empty when compliant.
    pub fn policy_violations(&self, password: &str) -> Vec<PolicyRule> {
        self.policy.check(password)
    }

    // -- Mutation -----------------------------------------------------------

    /// Hash `password` and store it in `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::PolicyViolation`] without touching the store if
    /// `password` is not compliant, or a store error if the write fails. In
    /// both cases the previous secret stays valid.
    pub fn set_password(&self, slot: Slot, password: &str) -> Result<()> {
        let violations = self.policy.check(password);
        if !violations.is_empty() {
            tracing::warn!(slot = %slot, rules = violations.len(), "rejected non-compliant secret");
            return Err(VaultError::PolicyViolation { violations });
        }

        let hash = self.store.hasher().hash(password)?;
        self.store.put(slot, &hash)?;

        tracing::info!(slot = %slot, "admin secret changed");
        Ok(())
    }

    pub fn change_primary(&self, new_password: &str) -> Result<()> {
        self.set_password(Slot::Primary, new_password)
    }

    pub fn change_secondary(&self, new_password: &str) -> Result<()> {
        self.set_password(Slot::Secondary, new_password)
    }

    /// Apply a parsed command-channel instruction. The full password policy
    /// applies; the channel's own length floor is not a relaxation.
    pub fn apply_command(&self, command: &AdminCommand) -> Result<()> {
        tracing::info!(slot = %command.slot(), "applying admin command");
        self.set_password(command.slot(), command.secret())
    }

    // -- Verification -------------------------------------------------------

    /// Check `input` against the secret stored in `slot`.
    ///
    /// Returns `Ok(false)` for a wrong password, an empty slot or a stored
    /// value that is not a recognized hash. Empty and unrecognized slots
    /// still pay one full derivation so they answer no faster than a wrong
    /// password.
    ///
    /// # Errors
    ///
    /// Only store failures ([`VaultError::StoreUnavailable`] and integrity
    /// errors) are returned as errors.
    pub fn verify(&self, slot: Slot, input: &str) -> Result<bool> {
        let stored = self.store.get(slot)?;
        let hasher = self.store.hasher();

        if stored.is_empty() {
            hasher.burn(input);
            tracing::warn!(slot = %slot, "verification against empty slot rejected");
            return Ok(false);
        }

        if !hash::is_recognized(&stored) {
            hasher.burn(input);
            tracing::warn!(slot = %slot, "slot holds an unrecognized value, rejecting");
            return Ok(false);
        }

        let verified = match hasher.verify(input, &stored) {
            Ok(verified) => verified,
            Err(VaultError::MalformedHash { reason }) => {
                tracing::warn!(slot = %slot, reason = %reason, "stored hash is malformed, rejecting");
                false
            }
            Err(e) => return Err(e),
        };

        if verified {
            tracing::debug!(slot = %slot, "verification succeeded");
        } else {
            tracing::warn!(slot = %slot, "verification failed");
        }
        Ok(verified)
    }

    pub fn verify_primary(&self, input: &str) -> Result<bool> {
        self.verify(Slot::Primary, input)
    }

    pub fn verify_secondary(&self, input: &str) -> Result<bool> {
        self.verify(Slot::Secondary, input)
    }

    // -- Rotation -----------------------------------------------------------

    /// Whether `slot` still accepts its shipped default secret.
    pub fn uses_default_secret(&self, slot: Slot) -> Result<bool> {
        self.verify(slot, slot.default_secret())
    }

    /// Slots that still hold their shipped default and should be rotated.
    pub fn rotation_required(&self) -> Result<Vec<Slot>> {
        let mut pending = Vec::new();
        for slot in Slot::ALL {
            if self.uses_default_secret(slot)? {
                pending.push(slot);
            }
        }
        Ok(pending)
    }

    /// Status of both slots.
    pub fn status(&self) -> Result<Vec<SlotStatus>> {
        Slot::ALL
            .into_iter()
            .map(|slot| {
                Ok(SlotStatus {
                    slot,
                    initialized: !self.store.get(slot)?.is_empty(),
                    last_changed: self.store.last_changed(slot)?,
                    rotation_required: self.uses_default_secret(slot)?,
                })
            })
            .collect()
    }

    // -- Four-eyes ----------------------------------------------------------

    /// Start a four-eyes primary change.
    pub fn begin_primary_change(&self) -> FourEyesSession<'_> {
        FourEyesSession::new(self)
    }

    // -- Diagnostics --------------------------------------------------------

    /// Log both stored hash strings. Never available in production builds.
    #[cfg(feature = "diagnostics")]
    pub fn debug_dump(&self) -> Result<()> {
        tracing::debug!("=== stored admin hashes ===");
        for slot in Slot::ALL {
            let stored = self.store.get(slot)?;
            let last_changed = self.store.last_changed(slot)?;
            if stored.is_empty() {
                tracing::debug!(slot = %slot, "<empty>");
            } else {
                tracing::debug!(
                    slot = %slot,
                    hash = %stored,
                    last_changed = ?last_changed,
                    "stored hash"
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
