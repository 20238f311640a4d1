//! CLI entry point for KioskGuard.
//!
//! This binary provides the `kioskguard` command: password verification,
//! command-channel intake, the four-eyes primary change and status
//! reporting over the local credential store.

mod cli;
mod commands;
mod config;
mod helpers;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::KioskConfig;

fn main() -> Result<ExitCode> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = KioskConfig::load(&cli.config)?;
    config.apply_env_overrides(helpers::env_non_empty)?;
    if let Some(dir) = cli.data_dir {
        config.vault.data_dir = dir;
    }

    // The dump is emitted at debug level.
    #[cfg(feature = "diagnostics")]
    if matches!(cli.command, Commands::DumpHashes) {
        config.logging.level = "debug".to_owned();
    }

    helpers::init_tracing(&config.logging.level);
    tracing::debug!(config = ?config, "configuration loaded");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout().lock();

    match cli.command {
        Commands::CheckPolicy => commands::cmd_check_policy(&mut input, &mut out),
        Commands::Verify { slot } => {
            let access = commands::open_controller(&config)?;
            commands::cmd_verify(&access, slot, &mut input)
        }
        Commands::Command { text } => {
            let access = commands::open_controller(&config)?;
            commands::cmd_command(&access, &text.join(" "), &mut out)
        }
        Commands::ChangePrimary => {
            let access = commands::open_controller(&config)?;
            commands::cmd_change_primary(&access, &mut input, &mut out)
        }
        Commands::Status { json } => {
            let access = commands::open_controller(&config)?;
            commands::cmd_status(&access, json, &mut out)
        }
        #[cfg(feature = "diagnostics")]
        Commands::DumpHashes => {
            let access = commands::open_controller(&config)?;
            commands::cmd_dump_hashes(&access)
        }
    }
}
