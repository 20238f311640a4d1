//! CLI argument definitions for KioskGuard.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kioskguard_vault::Slot;

/// KioskGuard -- admin credential control for kiosk devices.
#[derive(Parser)]
#[command(
    name = "kioskguard",
    version,
    about = "KioskGuard -- admin credential control for kiosk devices",
    long_about = "Verifies and rotates the two kiosk admin secrets. The primary secret \
                  unlocks administration; changing it requires the secondary secret."
)]
pub struct Cli {
    /// Configuration file. A missing file falls back to built-in defaults.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Override the data directory from the configuration.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify a password read from stdin against a slot. Exits 0 on match.
    Verify {
        /// `primary` or `secondary`.
        slot: Slot,
    },

    /// Apply a command-channel instruction, e.g. `set-primary <value>`.
    Command {
        /// The raw command text; words are joined with single spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Change the primary password under four-eyes control (interactive).
    ChangePrimary,

    /// Show per-slot status.
    Status {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Check a candidate password read from stdin against the policy.
    CheckPolicy,

    /// Log both stored hashes at debug level.
    #[cfg(feature = "diagnostics")]
    DumpHashes,
}
