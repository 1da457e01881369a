//! Scanner lifecycle states and their transition rules.
//!
//! A scanner walks `Unconfigured -> Ready -> Done -> Processed -> CleanedUp`.
//! `Error` can be entered from any phase and sticks: once set, no later phase
//! moves the scanner back to a success state.

use std::fmt;

use serde::Serialize;

use crate::error::ZapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScannerState {
    Unconfigured,
    Ready,
    Done,
    Error,
    Processed,
    CleanedUp,
}

impl ScannerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScannerState::Unconfigured => "UNCONFIGURED",
            ScannerState::Ready => "READY",
            ScannerState::Done => "DONE",
            ScannerState::Error => "ERROR",
            ScannerState::Processed => "PROCESSED",
            ScannerState::CleanedUp => "CLEANEDUP",
        }
    }

    /// Forward transitions allowed on success. `Error` is handled separately.
    fn can_advance_to(self, next: ScannerState) -> bool {
        matches!(
            (self, next),
            (ScannerState::Unconfigured, ScannerState::Ready)
                | (ScannerState::Ready, ScannerState::Done)
                | (ScannerState::Done, ScannerState::Processed)
                | (ScannerState::Processed, ScannerState::CleanedUp)
        )
    }
}

impl fmt::Display for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four caller-driven phases, in their only valid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Run,
    Postprocess,
    Cleanup,
}

/// Owner of the single active [`ScannerState`] of a scanner instance.
///
/// `Error` hides how far the scanner got, so the last phase entered is kept
/// alongside it.
#[derive(Debug)]
pub struct Lifecycle {
    state: ScannerState,
    last_phase: Option<Phase>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: ScannerState::Unconfigured,
            last_phase: None,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> ScannerState {
        self.state
    }

    pub fn last_phase(&self) -> Option<Phase> {
        self.last_phase
    }

    pub fn enter(&mut self, phase: Phase) {
        self.last_phase = Some(phase);
    }

    /// Fails with [`ZapError::OutOfSequence`] unless `previous` was the last
    /// phase entered and the current state is one of `allowed`.
    pub fn require_after(
        &self,
        phase: &'static str,
        previous: Phase,
        allowed: &[ScannerState],
    ) -> Result<(), ZapError> {
        if self.last_phase == Some(previous) {
            self.require(phase, allowed)
        } else {
            Err(ZapError::OutOfSequence {
                phase,
                state: self.state,
            })
        }
    }

    /// Cleanup follows postprocess, or a setup that failed before anything ran.
    pub fn ready_for_cleanup(&self) -> bool {
        match self.last_phase {
            Some(Phase::Postprocess) => true,
            Some(Phase::Setup) => self.is_failed(),
            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == ScannerState::Error
    }

    /// Fails with [`ZapError::OutOfSequence`] unless the current state is one of `allowed`.
    pub fn require(&self, phase: &'static str, allowed: &[ScannerState]) -> Result<(), ZapError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ZapError::OutOfSequence {
                phase,
                state: self.state,
            })
        }
    }

    pub fn fail(&mut self) {
        self.state = ScannerState::Error;
    }

    /// Moves to `next` unless the scanner already failed.
    pub fn advance(&mut self, next: ScannerState) {
        if self.is_failed() {
            return;
        }
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        if self.state.can_advance_to(next) {
            self.state = next;
        }
    }
}
