//! Masking lifecycle of one volume
//!
//! ```text
//! Unmasked -> PendingRemoval -> PendingMaskingSetup -> Masked
//! Masked -> PendingTeardown -> Unmasked
//! PendingMaskingSetup -> Unmasked       rollback
//! PendingRemoval -> Unmasked            removal failed
//! Unmasked -> PendingMaskingSetup       no default group to leave
//! ```
//!
//! Every edge back to `Unmasked` leaves the volume in its default group.

use crate::error::{Error, Result};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskingState {
    /// In the default group (or in no group when the policy has none)
    Unmasked,
    /// Being removed from the default group
    PendingRemoval,
    /// Out of the default group; masking objects being validated
    PendingMaskingSetup,
    Masked { view: String },
    PendingTeardown { view: String },
}

impl fmt::Display for MaskingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskingState::Unmasked => write!(f, "unmasked"),
            MaskingState::PendingRemoval => write!(f, "pending-removal"),
            MaskingState::PendingMaskingSetup => write!(f, "pending-masking-setup"),
            MaskingState::Masked { view } => write!(f, "masked({})", view),
            MaskingState::PendingTeardown { view } => write!(f, "pending-teardown({})", view),
        }
    }
}

impl MaskingState {
    fn allows(&self, next: &MaskingState) -> bool {
        use MaskingState::*;
        matches!(
            (self, next),
            (Unmasked, PendingRemoval)
                // Live migration, or a policy without a default group
                | (Unmasked, PendingMaskingSetup)
                | (PendingRemoval, PendingMaskingSetup)
                // Removal failed; the volume never left its default group
                | (PendingRemoval, Unmasked)
                | (PendingMaskingSetup, Masked { .. })
                | (PendingMaskingSetup, Unmasked)
                | (Masked { .. }, PendingTeardown { .. })
                | (PendingTeardown { .. }, Unmasked)
        )
    }
}

/// Tracks and validates the transitions of one volume
#[derive(Debug, Clone)]
pub struct MaskingLifecycle {
    volume: String,
    state: MaskingState,
    history: Vec<MaskingState>,
}

impl MaskingLifecycle {
    pub fn new(volume: impl Into<String>, state: MaskingState) -> Self {
        Self {
            volume: volume.into(),
            history: vec![state.clone()],
            state,
        }
    }

    pub fn state(&self) -> &MaskingState {
        &self.state
    }

    /// Every state entered, oldest first
    pub fn history(&self) -> &[MaskingState] {
        &self.history
    }

    pub fn advance(&mut self, next: MaskingState) -> Result<()> {
        if !self.state.allows(&next) {
            return Err(Error::Internal(format!(
                "Volume {}: invalid masking transition {} -> {}",
                self.volume, self.state, next
            )));
        }
        debug!("Volume {}: {} -> {}", self.volume, self.state, next);
        self.history.push(next.clone());
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_attach_and_detach_path() {
        let mut life = MaskingLifecycle::new("vol-1", MaskingState::Unmasked);
        life.advance(MaskingState::PendingRemoval).unwrap();
        life.advance(MaskingState::PendingMaskingSetup).unwrap();
        life.advance(MaskingState::Masked { view: "mv".into() }).unwrap();
        life.advance(MaskingState::PendingTeardown { view: "mv".into() }).unwrap();
        life.advance(MaskingState::Unmasked).unwrap();
        assert_eq!(life.history().len(), 6);
        assert_eq!(life.state(), &MaskingState::Unmasked);
    }

    #[test]
    fn test_rollback_edge() {
        let mut life = MaskingLifecycle::new("vol-1", MaskingState::Unmasked);
        life.advance(MaskingState::PendingRemoval).unwrap();
        life.advance(MaskingState::PendingMaskingSetup).unwrap();
        life.advance(MaskingState::Unmasked).unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let mut life = MaskingLifecycle::new("vol-1", MaskingState::Unmasked);
        assert_matches!(
            life.advance(MaskingState::Masked { view: "mv".into() }),
            Err(Error::Internal(_))
        );

        let mut life = MaskingLifecycle::new("vol-1", MaskingState::Masked { view: "mv".into() });
        assert_matches!(life.advance(MaskingState::Unmasked), Err(Error::Internal(_)));
        assert_matches!(
            life.advance(MaskingState::PendingRemoval),
            Err(Error::Internal(_))
        );
        assert_eq!(life.history().len(), 1);
    }
}
