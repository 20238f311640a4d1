//! Subcommand implementations.
//!
//! Each handler takes its input and output streams explicitly so the
//! interactive flows can be driven from tests.

use std::io::{BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use kioskguard_vault::{
    AccessController, AdminCommand, Field, FourEyesError, FourEyesStep, PasswordPolicy, Slot,
    VaultError, keychain,
};

use crate::config::KioskConfig;
use crate::helpers::{format_timestamp, prompt, read_secret_line};

/// Typed at any prompt of the interactive change to abort it.
const CANCEL_WORD: &str = "cancel";

/// Open the access controller described by `config`.
pub fn open_controller(config: &KioskConfig) -> Result<AccessController> {
    let data_dir = &config.vault.data_dir;
    let keychain = keychain::platform_keychain(data_dir);

    AccessController::open(
        data_dir,
        &config.vault.database,
        keychain.as_ref(),
        config.hasher()?,
    )
    .with_context(|| format!("failed to open credential store in {}", data_dir.display()))
}

// ---------------------------------------------------------------------------
// Subcommand: verify
// ---------------------------------------------------------------------------

pub fn cmd_verify(
    access: &AccessController,
    slot: Slot,
    input: &mut impl BufRead,
) -> Result<ExitCode> {
    let candidate = read_secret_line(input)?.unwrap_or_default();

    if access.verify(slot, &candidate)? {
        tracing::info!(slot = %slot, "verification accepted");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

// ---------------------------------------------------------------------------
// Subcommand: command
// ---------------------------------------------------------------------------

pub fn cmd_command(
    access: &AccessController,
    text: &str,
    out: &mut impl Write,
) -> Result<ExitCode> {
    let command = match AdminCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, "rejected command-channel input");
            writeln!(out, "rejected: {e}")?;
            return Ok(ExitCode::FAILURE);
        }
    };

    match access.apply_command(&command) {
        Ok(()) => {
            writeln!(out, "{} password updated", command.slot())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(VaultError::PolicyViolation { violations }) => {
            writeln!(out, "rejected: password policy not met")?;
            for rule in &violations {
                writeln!(out, "  - {rule}")?;
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("failed to apply command"),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: change-primary
// ---------------------------------------------------------------------------

/// Interactive four-eyes change. Fields cleared by a failed submission are
/// asked for again; the rest are kept.
pub fn cmd_change_primary(
    access: &AccessController,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<ExitCode> {
    let mut session = access.begin_primary_change();

    writeln!(out)?;
    writeln!(out, "  Change primary password")?;
    writeln!(out, "  Type `{CANCEL_WORD}` at any prompt to abort.")?;
    writeln!(out)?;

    'flow: while !session.step().is_terminal() {
        let fields: &[(Field, &str)] = match session.step() {
            FourEyesStep::AwaitingSecondary => &[(Field::Secondary, "Secondary password")],
            _ => &[
                (Field::CurrentPrimary, "Current primary password"),
                (Field::NewPrimary, "New primary password"),
                (Field::ConfirmPrimary, "Confirm new primary password"),
            ],
        };

        for &(field, label) in fields {
            if !session.field(field).is_empty() {
                continue;
            }
            match prompt(input, out, label)? {
                Some(answer) if answer.trim() != CANCEL_WORD => session.set_field(field, &answer),
                _ => {
                    session.cancel();
                    break 'flow;
                }
            }
        }

        match session.submit() {
            Ok(FourEyesStep::AwaitingPrimaryChange) => {
                writeln!(out, "  Secondary password accepted.")?;
            }
            Ok(_) => {}
            Err(FourEyesError::PolicyViolation { violations }) => {
                writeln!(out, "  New password does not meet the policy:")?;
                for rule in &violations {
                    writeln!(out, "    - {rule}")?;
                }
            }
            Err(FourEyesError::StoreUnavailable { reason }) => {
                bail!("credential store unavailable: {reason}");
            }
            Err(e) => writeln!(out, "  {e}.")?,
        }
    }

    writeln!(out)?;
    if session.step() == FourEyesStep::Committed {
        writeln!(out, "  Primary password changed.")?;
        Ok(ExitCode::SUCCESS)
    } else {
        writeln!(out, "  Cancelled. Nothing was changed.")?;
        Ok(ExitCode::FAILURE)
    }
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

pub fn cmd_status(access: &AccessController, json: bool, out: &mut impl Write) -> Result<ExitCode> {
    let status = access.status()?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&status)?)?;
        return Ok(ExitCode::SUCCESS);
    }

    writeln!(out)?;
    writeln!(out, "  KioskGuard Status")?;
    writeln!(out, "  =================")?;
    writeln!(out)?;
    for entry in &status {
        let changed = format_timestamp(entry.last_changed);
        let state = if !entry.initialized {
            "EMPTY"
        } else if entry.rotation_required {
            "DEFAULT (rotate)"
        } else {
            "OK"
        };
        writeln!(
            out,
            "  {:<10} {:<17} last changed {changed}",
            entry.slot.to_string(),
            state
        )?;
    }
    writeln!(out)?;

    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Subcommand: check-policy
// ---------------------------------------------------------------------------

pub fn cmd_check_policy(input: &mut impl BufRead, out: &mut impl Write) -> Result<ExitCode> {
    let candidate = read_secret_line(input)?.unwrap_or_default();
    let violations = PasswordPolicy::default().check(&candidate);

    if violations.is_empty() {
        writeln!(out, "compliant")?;
        return Ok(ExitCode::SUCCESS);
    }

    writeln!(out, "not compliant:")?;
    for rule in &violations {
        writeln!(out, "  - {rule}")?;
    }
    Ok(ExitCode::FAILURE)
}

// ---------------------------------------------------------------------------
// Subcommand: dump-hashes
// ---------------------------------------------------------------------------

#[cfg(feature = "diagnostics")]
pub fn cmd_dump_hashes(access: &AccessController) -> Result<ExitCode> {
    access.debug_dump()?;
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
