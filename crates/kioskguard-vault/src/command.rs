//! Admin command-channel parser.
//!
//! The device accepts plain-text administration commands from an external
//! channel:
//!
//! ```text
//! set-primary <value>
//! set-secondary <value>
//! ```
//!
//! Parsing is transport-agnostic: the caller hands over the raw text and
//! gets back a tagged [`AdminCommand`]. Values shorter than
//! [`COMMAND_MIN_SECRET_LEN`] are rejected here, before the password policy
//! is ever consulted. That floor is a transport sanity check only; applying
//! the command still goes through the full policy.

use zeroize::Zeroizing;

use crate::store::Slot;

/// Shortest value the command channel forwards.
pub const COMMAND_MIN_SECRET_LEN: usize = 4;

/// Errors produced while parsing a command-channel message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The message does not start with a known verb.
    #[error("unknown admin command: {verb}")]
    UnknownCommand { verb: String },

    /// The verb was recognized but no value followed it.
    #[error("admin command `{verb}` is missing its value")]
    MissingValue { verb: &'static str },

    /// The value is shorter than the command-channel floor.
    #[error("admin command value shorter than {min} characters")]
    ValueTooShort { min: usize },
}

/// A validated command-channel instruction.
pub enum AdminCommand {
    SetPrimary(Zeroizing<String>),
    SetSecondary(Zeroizing<String>),
}

impl AdminCommand {
    const SET_PRIMARY: &'static str = "set-primary";
    const SET_SECONDARY: &'static str = "set-secondary";

    /// Parse a raw command-channel message.
    ///
    /// Leading and trailing whitespace around the message and around the
    /// value is ignored; interior whitespace in the value is preserved.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let input = input.trim();
        let (verb, value) = match input.split_once(char::is_whitespace) {
            Some((verb, value)) => (verb, value.trim()),
            None => (input, ""),
        };

        let (build, verb): (fn(Zeroizing<String>) -> Self, &'static str) = match verb {
            Self::SET_PRIMARY => (Self::SetPrimary, Self::SET_PRIMARY),
            Self::SET_SECONDARY => (Self::SetSecondary, Self::SET_SECONDARY),
            other => {
                return Err(CommandError::UnknownCommand {
                    verb: other.to_string(),
                });
            }
        };

        if value.is_empty() {
            return Err(CommandError::MissingValue { verb });
        }

        if value.chars().count() < COMMAND_MIN_SECRET_LEN {
            return Err(CommandError::ValueTooShort {
                min: COMMAND_MIN_SECRET_LEN,
            });
        }

        Ok(build(Zeroizing::new(value.to_string())))
    }

    /// The slot this command writes.
    pub fn slot(&self) -> Slot {
        match self {
            Self::SetPrimary(_) => Slot::Primary,
            Self::SetSecondary(_) => Slot::Secondary,
        }
    }

    /// The new secret carried by the command.
    pub fn secret(&self) -> &str {
        match self {
            Self::SetPrimary(value) | Self::SetSecondary(value) => value.as_str(),
        }
    }
}

impl std::str::FromStr for AdminCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Debug for AdminCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SetPrimary(_) => "SetPrimary",
            Self::SetSecondary(_) => "SetSecondary",
        };
        f.debug_tuple(name).field(&"<redacted>").finish()
    }
}
