//! Ordering of the collective pipeline stages.

use crate::error::HdgError;
use serde::{Deserialize, Serialize};

/// Stage reached by a solver instance for the current refinement level.
///
/// Every rank passes through the phases in the same order, which is what keeps the
/// collective calls of the pipeline matched across ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Uninitialized,
    /// DOFs are counted and the scatter index pair is built.
    Counted,
    /// The global system is assembled.
    Assembled,
    Solved,
    /// The solution is available in the rank-local array.
    Scattered,
    /// Interior unknowns are recovered.
    PostSolved,
}

#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Phase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: Phase::Uninitialized,
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Fails with [`HdgError::PhaseViolation`] unless the current phase is one of `allowed`.
    pub fn require(&self, operation: &'static str, allowed: &[Phase]) -> Result<(), HdgError> {
        if allowed.contains(&self.current) {
            Ok(())
        } else {
            Err(HdgError::PhaseViolation {
                operation,
                current: self.current,
                allowed: allowed.to_vec(),
            })
        }
    }

    pub fn advance(&mut self, next: Phase) {
        log::trace!("phase {:?} -> {:?}", self.current, next);
        self.current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::{Phase, PhaseTracker};
    use crate::error::HdgError;

    #[test]
    fn require_reports_current_phase() {
        let mut tracker = PhaseTracker::default();
        assert!(tracker.require("setup", &[Phase::Uninitialized]).is_ok());
        tracker.advance(Phase::Counted);
        match tracker.require("visualize", &[Phase::PostSolved]) {
            Err(HdgError::PhaseViolation { operation, current, .. }) => {
                assert_eq!(operation, "visualize");
                assert_eq!(current, Phase::Counted);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
