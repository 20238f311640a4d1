//! Four-eyes change protocol for the primary secret.
//!
//! The primary secret may only be changed after the secondary secret has
//! been proven in the same session:
//!
//! ```text
//! AwaitingSecondary --submit_secondary ok--> AwaitingPrimaryChange --submit_primary_change ok--> Committed
//!        |                                            |
//!        +--------------- cancel / store failure -----+-------------------------------------> Cancelled
//! ```
//!
//! The primary-change submission is evaluated in a fixed order: current
//! primary first, new/confirm match second, policy third. A caller holding
//! the wrong current primary therefore never learns anything about the
//! candidate new secret.
//!
//! The session owns the input buffers of the attempt. Each failure wipes
//! only the fields it implicates, so a presentation layer rendering from
//! [`FourEyesSession::field`] keeps whatever the user does not need to
//! retype. Buffers are zeroized when cleared.

use zeroize::{Zeroize, Zeroizing};

use crate::access::AccessController;
use crate::error::VaultError;
use crate::policy::PolicyRule;
use crate::store::Slot;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourEyesStep {
    /// Waiting for proof of the secondary secret.
    AwaitingSecondary,
    /// Secondary proven; waiting for current, new and confirmation of the
    /// primary.
    AwaitingPrimaryChange,
    /// The primary secret was changed. Terminal.
    Committed,
    /// The attempt was abandoned. Terminal.
    Cancelled,
}

impl FourEyesStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled)
    }
}

/// Input fields of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Secondary,
    CurrentPrimary,
    NewPrimary,
    ConfirmPrimary,
}

/// Why a submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FourEyesError {
    #[error("wrong secondary password")]
    WrongSecondary,

    #[error("wrong current primary password")]
    WrongCurrentPrimary,

    #[error("new password and confirmation do not match")]
    Mismatch,

    #[error("new password does not meet the password policy")]
    PolicyViolation { violations: Vec<PolicyRule> },

    /// The credential store failed; the session has been cancelled.
    #[error("credential store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// The submission does not belong to the current step.
    #[error("submission not accepted in step {step:?}")]
    InvalidStep { step: FourEyesStep },
}

#[derive(Default)]
struct Buffers {
    secondary: Zeroizing<String>,
    current_primary: Zeroizing<String>,
    new_primary: Zeroizing<String>,
    confirm_primary: Zeroizing<String>,
}

impl Buffers {
    fn get_mut(&mut self, field: Field) -> &mut Zeroizing<String> {
        match field {
            Field::Secondary => &mut self.secondary,
            Field::CurrentPrimary => &mut self.current_primary,
            Field::NewPrimary => &mut self.new_primary,
            Field::ConfirmPrimary => &mut self.confirm_primary,
        }
    }

    fn get(&self, field: Field) -> &str {
        match field {
            Field::Secondary => &self.secondary,
            Field::CurrentPrimary => &self.current_primary,
            Field::NewPrimary => &self.new_primary,
            Field::ConfirmPrimary => &self.confirm_primary,
        }
    }

    fn set(&mut self, field: Field, value: &str) {
        let buf = self.get_mut(field);
        buf.zeroize();
        buf.push_str(value);
    }

    fn clear(&mut self, fields: &[Field]) {
        for &field in fields {
            self.get_mut(field).zeroize();
        }
    }

    fn clear_all(&mut self) {
        self.clear(&[
            Field::Secondary,
            Field::CurrentPrimary,
            Field::NewPrimary,
            Field::ConfirmPrimary,
        ]);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One attempt at changing the primary secret under four-eyes control.
pub struct FourEyesSession<'a> {
    access: &'a AccessController,
    step: FourEyesStep,
    buffers: Buffers,
    last_error: Option<FourEyesError>,
}

impl<'a> FourEyesSession<'a> {
    /// Start a session in [`FourEyesStep::AwaitingSecondary`].
    pub fn new(access: &'a AccessController) -> Self {
        tracing::debug!("four-eyes session started");
        Self {
            access,
            step: FourEyesStep::AwaitingSecondary,
            buffers: Buffers::default(),
            last_error: None,
        }
    }

    pub fn step(&self) -> FourEyesStep {
        self.step
    }

    /// The error reported by the most recent submission, if any.
    pub fn last_error(&self) -> Option<&FourEyesError> {
        self.last_error.as_ref()
    }

    /// Current content of an input field.
    pub fn field(&self, field: Field) -> &str {
        self.buffers.get(field)
    }

    /// Replace the content of an input field.
    pub fn set_field(&mut self, field: Field, value: &str) {
        self.buffers.set(field, value);
    }

    /// Fill the secondary field with `input` and submit it.
    ///
    /// Only accepted in [`FourEyesStep::AwaitingSecondary`]. In any other
    /// step this fails with `InvalidStep` and no buffer is touched.
    pub fn submit_secondary(&mut self, input: &str) -> Result<FourEyesStep, FourEyesError> {
        self.expect_step(FourEyesStep::AwaitingSecondary)?;
        self.buffers.set(Field::Secondary, input);
        self.submit()
    }

    /// Fill the three primary fields and submit them.
    ///
    /// Only accepted in [`FourEyesStep::AwaitingPrimaryChange`].
    pub fn submit_primary_change(
        &mut self,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<FourEyesStep, FourEyesError> {
        self.expect_step(FourEyesStep::AwaitingPrimaryChange)?;
        self.buffers.set(Field::CurrentPrimary, current);
        self.buffers.set(Field::NewPrimary, new);
        self.buffers.set(Field::ConfirmPrimary, confirm);
        self.submit()
    }

    fn expect_step(&mut self, expected: FourEyesStep) -> Result<(), FourEyesError> {
        if self.step == expected {
            return Ok(());
        }
        let err = FourEyesError::InvalidStep { step: self.step };
        tracing::warn!(step = ?self.step, expected = ?expected, "four-eyes: submission in wrong step");
        self.last_error = Some(err.clone());
        Err(err)
    }

    /// Evaluate the fields belonging to the current step.
    pub fn submit(&mut self) -> Result<FourEyesStep, FourEyesError> {
        self.last_error = None;

        let outcome = match self.step {
            FourEyesStep::AwaitingSecondary => self.evaluate_secondary(),
            FourEyesStep::AwaitingPrimaryChange => self.evaluate_primary_change(),
            step => Err(FourEyesError::InvalidStep { step }),
        };

        if let Err(e) = &outcome {
            self.last_error = Some(e.clone());
        }
        outcome
    }

    /// Abandon the attempt from any step. Clears every buffer.
    pub fn cancel(&mut self) -> FourEyesStep {
        self.buffers.clear_all();
        self.last_error = None;
        if self.step != FourEyesStep::Committed {
            self.step = FourEyesStep::Cancelled;
            tracing::info!("four-eyes session cancelled");
        }
        self.step
    }

    // -- Transitions --------------------------------------------------------

    fn evaluate_secondary(&mut self) -> Result<FourEyesStep, FourEyesError> {
        let verified = self
            .access
            .verify(Slot::Secondary, &self.buffers.secondary)
            .map_err(|e| self.abort(e))?;

        if !verified {
            self.buffers.clear(&[Field::Secondary]);
            tracing::warn!("four-eyes: secondary proof rejected");
            return Err(FourEyesError::WrongSecondary);
        }

        self.buffers.clear_all();
        self.step = FourEyesStep::AwaitingPrimaryChange;
        tracing::info!("four-eyes: secondary proven, primary change unlocked");
        Ok(self.step)
    }

    fn evaluate_primary_change(&mut self) -> Result<FourEyesStep, FourEyesError> {
        let current_ok = self
            .access
            .verify(Slot::Primary, &self.buffers.current_primary)
            .map_err(|e| self.abort(e))?;

        if !current_ok {
            self.buffers.clear(&[Field::CurrentPrimary]);
            return Err(FourEyesError::WrongCurrentPrimary);
        }

        if *self.buffers.new_primary != *self.buffers.confirm_primary {
            self.buffers
                .clear(&[Field::NewPrimary, Field::ConfirmPrimary]);
            return Err(FourEyesError::Mismatch);
        }

        match self
            .access
            .set_password(Slot::Primary, &self.buffers.new_primary)
        {
            Ok(()) => {
                self.buffers.clear_all();
                self.step = FourEyesStep::Committed;
                tracing::info!("four-eyes: primary secret committed");
                Ok(self.step)
            }
            Err(VaultError::PolicyViolation { violations }) => {
                self.buffers
                    .clear(&[Field::NewPrimary, Field::ConfirmPrimary]);
                Err(FourEyesError::PolicyViolation { violations })
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Cancel the session after a store failure.
    fn abort(&mut self, error: VaultError) -> FourEyesError {
        tracing::error!(error = %error, "four-eyes session aborted by store failure");
        self.buffers.clear_all();
        self.step = FourEyesStep::Cancelled;
        FourEyesError::StoreUnavailable {
            reason: error.to_string(),
        }
    }
}

impl std::fmt::Debug for FourEyesSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FourEyesSession")
            .field("step", &self.step)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
