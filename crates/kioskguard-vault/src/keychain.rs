//! Master-key custody for the encrypted secret store.
//!
//! The secret slots are sealed under a 256-bit master key that must never
//! sit on disk in the clear. [`KeychainProvider`] abstracts over the host's
//! secure key facility:
//!
//! - **macOS**: Keychain Services via `security-framework`
//! - **Elsewhere**: [`FileKeychain`], which wraps the master key with a key
//!   bound to the device identity and keeps the file owner-only
//!
//! [`load_or_create_master_key`] is the entry point used at startup: it
//! returns the existing key or provisions a fresh one on first boot.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, NONCE_LEN_BYTES, SALT_LEN, TAG_LEN};
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific secure key storage.
pub trait KeychainProvider: Send + Sync {
    /// Retrieve the master encryption key.
    ///
    /// Returns [`VaultError::MasterKeyNotFound`] if no key has been stored yet.
    fn get_master_key(&self) -> Result<Vec<u8>>;

    /// Store (or overwrite) the master encryption key.
    fn set_master_key(&self, key: &[u8]) -> Result<()>;

    /// Check whether a master key has been stored.
    fn has_master_key(&self) -> Result<bool>;
}

/// Return the stored master key, provisioning one if the keychain is empty.
///
/// A stored key of the wrong length is an error rather than a reason to
/// provision: replacing it would orphan every sealed slot.
pub fn load_or_create_master_key(keychain: &dyn KeychainProvider) -> Result<Vec<u8>> {
    let key = match keychain.get_master_key() {
        Err(VaultError::MasterKeyNotFound) => {
            tracing::info!("no master key found, provisioning a new one");
            let key = crypto::generate_master_key()?;
            keychain.set_master_key(&key)?;
            return Ok(key);
        }
        other => other?,
    };

    if key.len() != KEY_LEN {
        return Err(VaultError::KeychainUnavailable {
            reason: format!("stored master key is {} bytes, expected {KEY_LEN}", key.len()),
        });
    }
    Ok(key)
}

// ---------------------------------------------------------------------------
// File-based keychain
// ---------------------------------------------------------------------------

const KEY_FILE_MAGIC: &[u8; 4] = b"KGMK";
const KEY_FILE_VERSION: u8 = 1;
const HEADER_LEN: usize = KEY_FILE_MAGIC.len() + 1;

/// Salt for the device wrapping key. Changing it orphans every key file.
const WRAP_SALT: &[u8; SALT_LEN] = b"kioskguard-device-wrap-salt-v1\x00\x00";

/// Keeps the master key in a file, sealed under a key derived from the
/// device identity. The file does not open on another device.
///
/// File layout:
/// ```text
/// [4 bytes: "KGMK"] [1 byte: version]
/// [12 bytes: AES-256-GCM nonce]
/// [32 bytes: sealed master key] [16 bytes: tag]
/// ```
///
/// The 5-byte header is authenticated as associated data.
pub struct FileKeychain {
    key_file: PathBuf,
    device_id: String,
    wrapping_key: OnceLock<Zeroizing<[u8; KEY_LEN]>>,
}

impl FileKeychain {
    /// A keychain at `key_file`, bound to this device's identity.
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self::with_device_id(key_file, device_identity())
    }

    /// A keychain bound to an explicit device identity, e.g. one provisioned
    /// into the kiosk image.
    pub fn with_device_id(key_file: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            key_file: key_file.into(),
            device_id: device_id.into(),
            wrapping_key: OnceLock::new(),
        }
    }

    /// `<data_dir>/master.key`
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("master.key")
    }

    pub fn path(&self) -> &Path {
        &self.key_file
    }

    fn header() -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..KEY_FILE_MAGIC.len()].copy_from_slice(KEY_FILE_MAGIC);
        header[KEY_FILE_MAGIC.len()] = KEY_FILE_VERSION;
        header
    }

    /// Derived once per instance; the derivation runs at full PBKDF2 cost.
    fn wrapping_key(&self) -> &[u8; KEY_LEN] {
        self.wrapping_key.get_or_init(|| {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            crypto::derive_key_with_salt(self.device_id.as_bytes(), WRAP_SALT, &mut key);
            key
        })
    }

    /// Write through a temporary sibling and rename, so a power cut leaves
    /// either the old file or the new one.
    fn write_atomically(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.key_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.key_file.with_extension("key.tmp");
        {
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }

            let mut file = options.open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.key_file)?;
        Ok(())
    }
}

impl KeychainProvider for FileKeychain {
    fn get_master_key(&self) -> Result<Vec<u8>> {
        let data = match std::fs::read(&self.key_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::MasterKeyNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let header = Self::header();
        let body = data
            .strip_prefix(header.as_slice())
            .ok_or_else(|| VaultError::DecryptionFailed {
                reason: "master key file has an unknown header or version".into(),
            })?;

        if body.len() < NONCE_LEN_BYTES + TAG_LEN {
            return Err(VaultError::DecryptionFailed {
                reason: format!("master key file is truncated ({} bytes)", data.len()),
            });
        }

        let (nonce, sealed) = body.split_at(NONCE_LEN_BYTES);
        let nonce: [u8; NONCE_LEN_BYTES] =
            nonce.try_into().map_err(|_| VaultError::DecryptionFailed {
                reason: "master key file nonce is malformed".into(),
            })?;

        let key = crypto::open(&nonce, sealed, &header, self.wrapping_key())?;
        tracing::debug!(path = %self.key_file.display(), "unwrapped master key");
        Ok(key)
    }

    fn set_master_key(&self, key: &[u8]) -> Result<()> {
        let header = Self::header();
        let (nonce, sealed) = crypto::seal(key, &header, self.wrapping_key())?;

        let mut data = Vec::with_capacity(HEADER_LEN + NONCE_LEN_BYTES + sealed.len());
        data.extend_from_slice(&header);
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&sealed);

        self.write_atomically(&data)?;
        tracing::info!(path = %self.key_file.display(), "master key written to key file");
        Ok(())
    }

    fn has_master_key(&self) -> Result<bool> {
        Ok(self.key_file.try_exists()?)
    }
}

/// A stable identifier for this device: the machine id where one exists,
/// otherwise the hostname.
fn device_identity() -> String {
    #[cfg(unix)]
    {
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostname"] {
            if let Ok(id) = std::fs::read_to_string(path) {
                let id = id.trim();
                if !id.is_empty() {
                    return id.to_owned();
                }
            }
        }
    }

    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "kioskguard-unknown-device".to_owned())
}

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// `errSecItemNotFound`
#[cfg(target_os = "macos")]
const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// Master key held as a generic password in the login keychain.
#[cfg(target_os = "macos")]
pub struct MacOSKeychain {
    service: String,
    account: String,
}

#[cfg(target_os = "macos")]
impl MacOSKeychain {
    pub const SERVICE: &'static str = "org.kioskguard.vault";
    pub const ACCOUNT: &'static str = "master-key";

    pub fn new() -> Self {
        Self::with_names(Self::SERVICE, Self::ACCOUNT)
    }

    pub fn with_names(service: &str, account: &str) -> Self {
        Self {
            service: service.to_owned(),
            account: account.to_owned(),
        }
    }

    fn lookup(&self) -> Result<Option<Vec<u8>>> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service, &self.account) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(VaultError::KeychainUnavailable {
                reason: format!("keychain lookup for {} failed: {e}", self.service),
            }),
        }
    }
}

#[cfg(target_os = "macos")]
impl Default for MacOSKeychain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl KeychainProvider for MacOSKeychain {
    fn get_master_key(&self) -> Result<Vec<u8>> {
        self.lookup()?.ok_or(VaultError::MasterKeyNotFound)
    }

    fn set_master_key(&self, key: &[u8]) -> Result<()> {
        security_framework::passwords::set_generic_password(&self.service, &self.account, key)
            .map_err(|e| VaultError::MasterKeyStoreFailed {
                reason: format!("keychain write for {} failed: {e}", self.service),
            })?;

        tracing::info!(service = %self.service, "master key written to macOS keychain");
        Ok(())
    }

    fn has_master_key(&self) -> Result<bool> {
        Ok(self.lookup()?.is_some())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// The keychain to use on this platform.
#[cfg(target_os = "macos")]
pub fn platform_keychain(_data_dir: &Path) -> Box<dyn KeychainProvider> {
    tracing::debug!("master key custody: macOS keychain");
    Box::new(MacOSKeychain::new())
}

/// The keychain to use on this platform.
#[cfg(not(target_os = "macos"))]
pub fn platform_keychain(data_dir: &Path) -> Box<dyn KeychainProvider> {
    let path = FileKeychain::default_path(data_dir);
    tracing::debug!(path = %path.display(), "master key custody: key file");
    Box::new(FileKeychain::new(path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
