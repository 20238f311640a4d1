//! Encrypted key-value persistence for the secret slots.
//!
//! [`SecretBackend`] is the seam between the credential store and the
//! storage medium: opaque bytes in, opaque bytes out, confidentiality and
//! integrity guaranteed by the implementation. [`SqliteBackend`] is the
//! production implementation.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE secrets (
//!     key        TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,   -- AES-256-GCM ciphertext + tag
//!     nonce      BLOB NOT NULL,   -- 96-bit nonce, fresh per write
//!     updated_at INTEGER NOT NULL
//! );
//! ```
//!
//! Every write is a single UPSERT statement, so a reader observes either the
//! previous row or the new one, never a mix.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable, confidentiality-protected byte storage keyed by name.
pub trait SecretBackend: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if it was never written.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite the value stored under `key`.
    fn save(&self, key: &str, value: &[u8]) -> Result<()>;

    /// When `key` was last written, if the backend tracks it.
    fn last_modified(&self, _key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

/// Secret storage in a SQLite file, sealed with the master key.
///
/// The backend keeps its own copy of the key, wiped on drop.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    master_key: Zeroizing<Vec<u8>>,
}

impl SqliteBackend {
    /// Open (or create) the backing database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the file cannot be opened, or
    /// [`VaultError::MigrationFailed`] if schema setup fails.
    pub fn open(path: impl AsRef<Path>, master_key: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening secret store");

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::from_connection(conn, master_key)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(master_key: &[u8]) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, master_key)
    }

    fn from_connection(conn: Connection, master_key: &[u8]) -> Result<Self> {
        if master_key.len() != crypto::KEY_LEN {
            return Err(VaultError::InvalidConfig {
                reason: format!(
                    "master key must be {} bytes, got {}",
                    crypto::KEY_LEN,
                    master_key.len()
                ),
            });
        }

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            master_key: Zeroizing::new(master_key.to_vec()),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 2000;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS secrets (
                key        TEXT PRIMARY KEY,
                data       BLOB NOT NULL,
                nonce      BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| VaultError::MigrationFailed {
            reason: e.to_string(),
        })?;

        tracing::debug!("secret store schema ready");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VaultError::Internal(format!("connection mutex poisoned: {e}")))
    }
}

impl SecretBackend for SqliteBackend {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = self
            .lock()?
            .query_row(
                "SELECT data, nonce FROM secrets WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        let Some((data, nonce)) = row else {
            return Ok(None);
        };

        let nonce: [u8; crypto::NONCE_LEN_BYTES] =
            nonce
                .as_slice()
                .try_into()
                .map_err(|_| VaultError::DecryptionFailed {
                    reason: format!(
                        "stored nonce is {} bytes, expected {}",
                        nonce.len(),
                        crypto::NONCE_LEN_BYTES
                    ),
                })?;

        crypto::open(&nonce, &data, key.as_bytes(), &self.master_key).map(Some)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let (nonce, ciphertext) = crypto::seal(value, key.as_bytes(), &self.master_key)?;
        let now = Utc::now().timestamp();

        self.lock()?.execute(
            "INSERT INTO secrets (key, data, nonce, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                nonce = excluded.nonce,
                updated_at = excluded.updated_at",
            params![key, ciphertext, nonce.as_slice(), now],
        )?;

        tracing::debug!(key = key, "sealed secret written");
        Ok(())
    }

    fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let ts = self
            .lock()?
            .query_row(
                "SELECT updated_at FROM secrets WHERE key = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        Ok(ts.and_then(|ts| DateTime::from_timestamp(ts, 0)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> SqliteBackend {
        SqliteBackend::open_in_memory(&crypto::generate_master_key().unwrap()).unwrap()
    }

    #[test]
    fn missing_key_loads_none() {
        let backend = test_backend();
        assert_eq!(backend.load("primary").unwrap(), None);
        assert_eq!(backend.last_modified("primary").unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let backend = test_backend();
        backend.save("primary", b"hash-one").unwrap();
        assert_eq!(backend.load("primary").unwrap().as_deref(), Some(&b"hash-one"[..]));
        assert!(backend.last_modified("primary").unwrap().is_some());
    }

    #[test]
    fn save_overwrites_in_place() {
        let backend = test_backend();
        backend.save("secondary", b"old").unwrap();
        backend.save("secondary", b"new").unwrap();

        assert_eq!(backend.load("secondary").unwrap().as_deref(), Some(&b"new"[..]));

        let rows: i64 = backend
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM secrets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn values_are_encrypted_at_rest() {
        let backend = test_backend();
        backend.save("primary", b"$pbkdf2-sha256$visible?").unwrap();

        let raw: Vec<u8> = backend
            .lock()
            .unwrap()
            .query_row("SELECT data FROM secrets WHERE key = 'primary'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(!raw.windows(7).any(|w| w == b"$pbkdf2"));
    }

    #[test]
    fn swapped_rows_fail_authentication() {
        let backend = test_backend();
        backend.save("primary", b"primary-hash").unwrap();
        backend.save("secondary", b"secondary-hash").unwrap();

        // Copy the secondary ciphertext over the primary row.
        backend
            .lock()
            .unwrap()
            .execute(
                "UPDATE secrets SET (data, nonce) =
                    (SELECT data, nonce FROM secrets WHERE key = 'secondary')
                 WHERE key = 'primary'",
                [],
            )
            .unwrap();

        assert!(matches!(
            backend.load("primary"),
            Err(VaultError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn wrong_master_key_cannot_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");

        let backend = SqliteBackend::open(&path, &crypto::generate_master_key().unwrap()).unwrap();
        backend.save("primary", b"hash").unwrap();
        drop(backend);

        let other = SqliteBackend::open(&path, &crypto::generate_master_key().unwrap()).unwrap();
        assert!(other.load("primary").is_err());
    }

    #[test]
    fn backend_keeps_its_own_key_copy() {
        let mut key = Zeroizing::new(crypto::generate_master_key().unwrap());
        let backend = SqliteBackend::open_in_memory(&key).unwrap();
        backend.save("primary", b"hash").unwrap();

        key.iter_mut().for_each(|b| *b = 0);
        drop(key);

        assert_eq!(backend.load("primary").unwrap().as_deref(), Some(&b"hash"[..]));
    }

    #[test]
    fn short_master_key_rejected() {
        assert!(matches!(
            SqliteBackend::open_in_memory(&[0u8; 16]),
            Err(VaultError::InvalidConfig { .. })
        ));
    }
}
