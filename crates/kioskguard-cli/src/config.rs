//! Runtime configuration.
//!
//! Resolution order, lowest to highest precedence: built-in defaults,
//! `config/default.toml`, environment (`.env` included), CLI flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kioskguard_vault::PasswordHasher;
use kioskguard_vault::access::DEFAULT_DATABASE_FILE;
use kioskguard_vault::hash::DEFAULT_ITERATIONS;
use serde::{Deserialize, Serialize};

pub const ENV_DATA_DIR: &str = "KIOSKGUARD_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "KIOSKGUARD_LOG_LEVEL";
pub const ENV_PBKDF2_ITERATIONS: &str = "KIOSKGUARD_PBKDF2_ITERATIONS";

/// Top-level configuration, one field per TOML section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub vault: VaultConfig,
    pub hashing: HashingConfig,
    pub logging: LoggingConfig,
}

/// `[vault]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub database: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database: DEFAULT_DATABASE_FILE.to_owned(),
        }
    }
}

/// `[hashing]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    pub pbkdf2_iterations: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl KioskConfig {
    /// Load from `path`, or return defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        Self::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `KIOSKGUARD_*` overrides. `lookup` returns a variable's value,
    /// or `None` when it is unset or empty.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.vault.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(raw) = lookup(ENV_PBKDF2_ITERATIONS) {
            self.hashing.pbkdf2_iterations = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PBKDF2_ITERATIONS} must be an integer, got `{raw}`"))?;
        }
        Ok(())
    }

    /// The hasher for the configured cost.
    pub fn hasher(&self) -> Result<PasswordHasher> {
        PasswordHasher::new(self.hashing.pbkdf2_iterations).context("invalid [hashing] settings")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = KioskConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, KioskConfig::default());
        assert_eq!(config.hashing.pbkdf2_iterations, 600_000);
        assert_eq!(config.vault.database, "kiosk-secrets.db");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = KioskConfig::from_toml_str(
            r#"
            [vault]
            data_dir = "/var/lib/kiosk"
            "#,
        )
        .unwrap();

        assert_eq!(config.vault.data_dir, PathBuf::from("/var/lib/kiosk"));
        assert_eq!(config.vault.database, DEFAULT_DATABASE_FILE);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn shipped_default_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let config = KioskConfig::load(&path).unwrap();
        assert_eq!(config, KioskConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[hashing]\npbkdf2_iterations = \"many\"\n").unwrap();
        assert!(KioskConfig::load(&path).is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = KioskConfig::default();
        config
            .apply_env_overrides(env(&[
                (ENV_DATA_DIR, "/mnt/secure"),
                (ENV_LOG_LEVEL, "debug"),
                (ENV_PBKDF2_ITERATIONS, " 200000 "),
            ]))
            .unwrap();

        assert_eq!(config.vault.data_dir, PathBuf::from("/mnt/secure"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.hashing.pbkdf2_iterations, 200_000);
    }

    #[test]
    fn bad_iteration_override_is_rejected() {
        let mut config = KioskConfig::default();
        assert!(config
            .apply_env_overrides(env(&[(ENV_PBKDF2_ITERATIONS, "lots")]))
            .is_err());
    }

    #[test]
    fn out_of_range_cost_fails_hasher() {
        let mut config = KioskConfig::default();
        config.hashing.pbkdf2_iterations = 10;
        assert!(config.hasher().is_err());

        config.hashing.pbkdf2_iterations = 1_000;
        assert_eq!(config.hasher().unwrap().iterations(), 1_000);
    }
}
