//! Credential and access-control core for KioskGuard.
//!
//! A kiosk is administered through two secrets. The *primary* secret
//! unlocks administrative actions; the *secondary* secret authorizes
//! changing the primary one (the four-eyes rule). Both are stored only as
//! salted PBKDF2 hashes, sealed with AES-256-GCM in a SQLite file whose
//! master key lives in the OS keychain (or a file-based fallback).
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM sealing and PBKDF2 primitives.
//! - [`hash`]: self-describing password hashes.
//! - [`policy`]: password composition rules.
//! - [`keychain`]: master key storage.
//! - [`backend`]: encrypted key-value persistence.
//! - [`store`]: the two secret slots, with per-slot write serialization.
//! - [`access`]: policy enforcement and verification.
//! - [`four_eyes`]: the gated primary-change protocol.
//! - [`command`]: parser for the remote command channel.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use kioskguard_vault::{AccessController, FileKeychain, PasswordHasher, Slot};
//! use kioskguard_vault::access::DEFAULT_DATABASE_FILE;
//!
//! # fn example() -> kioskguard_vault::Result<()> {
//! let data_dir = Path::new("data");
//! let keychain = FileKeychain::new(FileKeychain::default_path(data_dir));
//! let access = AccessController::open(
//!     data_dir,
//!     DEFAULT_DATABASE_FILE,
//!     &keychain,
//!     PasswordHasher::default(),
//! )?;
//!
//! // Unlock dialog.
//! if access.verify(Slot::Primary, "KhsDefault@123")? {
//!     println!("admin unlocked");
//! }
//!
//! // Four-eyes primary change.
//! let mut session = access.begin_primary_change();
//! session.submit_secondary("Secondary@456").ok();
//! session
//!     .submit_primary_change("KhsDefault@123", "N3w#Primary!", "N3w#Primary!")
//!     .ok();
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod backend;
pub mod command;
pub mod crypto;
pub mod error;
pub mod four_eyes;
pub mod hash;
pub mod keychain;
pub mod policy;
pub mod store;

// Re-export the most commonly used types at the crate root for convenience.
pub use access::{AccessController, SlotStatus};
pub use backend::{SecretBackend, SqliteBackend};
pub use command::{AdminCommand, CommandError};
pub use error::{Result, VaultError};
pub use four_eyes::{Field, FourEyesError, FourEyesSession, FourEyesStep};
pub use hash::PasswordHasher;
pub use keychain::{FileKeychain, KeychainProvider};
pub use policy::{PasswordPolicy, PolicyRule};
pub use store::{CredentialStore, Slot};
