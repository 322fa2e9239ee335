//! # Phase Transitions
//!
//! The lifecycle of a project is a mostly-linear walk:
//!
//! ```text
//! Pending -> ValidatingDependencies -> DeployingSecrets -> InitializingDatabase
//!         -> DeployingComponents -> Running
//! ```
//!
//! `Running` re-enters validation on resync, or goes through `Updating` when
//! the declared spec changed. `Failed` and `Terminating` are reachable from
//! every phase; validation is reachable from `Failed`.

use super::error::ReconcilerError;
use crate::crd::Phase;

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::ValidatingDependencies => "ValidatingDependencies",
            Phase::DeployingSecrets => "DeployingSecrets",
            Phase::InitializingDatabase => "InitializingDatabase",
            Phase::DeployingComponents => "DeployingComponents",
            Phase::Running => "Running",
            Phase::Updating => "Updating",
            Phase::Failed => "Failed",
            Phase::Terminating => "Terminating",
        }
    }

    /// Fixed human-readable message for the phase
    pub fn message(self) -> &'static str {
        match self {
            Phase::Pending => "SupabaseProject is pending",
            Phase::ValidatingDependencies => "Validating external dependencies",
            Phase::DeployingSecrets => "Deploying secrets and credentials",
            Phase::InitializingDatabase => "Initializing database",
            Phase::DeployingComponents => "Deploying Supabase components",
            Phase::Running => "All components running",
            Phase::Updating => "Updating components",
            Phase::Failed => "Reconciliation failed",
            Phase::Terminating => "Terminating resources",
        }
    }

    /// Position on the linear happy path, `None` for re-entry and terminal phases
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Phase::Pending => Some(0),
            Phase::ValidatingDependencies => Some(1),
            Phase::DeployingSecrets => Some(2),
            Phase::InitializingDatabase => Some(3),
            Phase::DeployingComponents => Some(4),
            Phase::Running => Some(5),
            Phase::Updating | Phase::Failed | Phase::Terminating => None,
        }
    }

    /// Phases a pass is actively working through
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Phase::ValidatingDependencies
                | Phase::DeployingSecrets
                | Phase::InitializingDatabase
                | Phase::DeployingComponents
        )
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        if matches!(next, Phase::Failed | Phase::Terminating) {
            return true;
        }

        match (self, next) {
            (Phase::Pending, Phase::ValidatingDependencies)
            | (Phase::ValidatingDependencies, Phase::DeployingSecrets)
            | (Phase::DeployingSecrets, Phase::InitializingDatabase)
            | (Phase::InitializingDatabase, Phase::DeployingComponents)
            | (Phase::DeployingComponents, Phase::Running)
            | (Phase::Running, Phase::Updating | Phase::ValidatingDependencies)
            | (Phase::Updating | Phase::Failed, Phase::ValidatingDependencies) => true,
            _ => false,
        }
    }
}

/// Records the phases entered during one pass
///
/// A pass resuming an in-progress phase re-runs the earlier steps without
/// re-entering their phases, so the persisted phase only moves forward.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Option<Phase>,
    trail: Vec<Phase>,
}

impl PhaseTracker {
    /// Start from the persisted phase
    pub fn new(persisted: Option<Phase>) -> Self {
        // A project that was terminating and is no longer being deleted starts over
        let current = persisted.filter(|phase| *phase != Phase::Terminating);
        Self {
            current,
            trail: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    /// Phases entered during this pass, in order
    pub fn trail(&self) -> &[Phase] {
        &self.trail
    }

    pub fn into_trail(self) -> Vec<Phase> {
        self.trail
    }

    /// Enter `next`, validating the move against the transition table
    ///
    /// Entering a phase at or behind the current in-progress phase is a no-op.
    pub fn enter(&mut self, next: Phase) -> Result<(), ReconcilerError> {
        let Some(current) = self.current else {
            if next != Phase::Pending {
                self.trail.push(Phase::Pending);
                self.current = Some(Phase::Pending);
                return self.enter(next);
            }
            self.trail.push(next);
            self.current = Some(next);
            return Ok(());
        };

        if current == next {
            return Ok(());
        }

        if current.is_in_progress() && next.is_in_progress() && next.ordinal() < current.ordinal() {
            return Ok(());
        }

        if !current.can_transition_to(next) {
            return Err(ReconcilerError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        self.trail.push(next);
        self.current = Some(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_path_is_allowed() {
        let path = [
            Phase::Pending,
            Phase::ValidatingDependencies,
            Phase::DeployingSecrets,
            Phase::InitializingDatabase,
            Phase::DeployingComponents,
            Phase::Running,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        assert!(!Phase::Pending.can_transition_to(Phase::DeployingSecrets));
        assert!(!Phase::ValidatingDependencies.can_transition_to(Phase::Running));
        assert!(!Phase::Failed.can_transition_to(Phase::Running));
        assert!(!Phase::Updating.can_transition_to(Phase::Running));
    }

    #[test]
    fn test_failed_and_terminating_reachable_from_everywhere() {
        let all = [
            Phase::Pending,
            Phase::ValidatingDependencies,
            Phase::DeployingSecrets,
            Phase::InitializingDatabase,
            Phase::DeployingComponents,
            Phase::Running,
            Phase::Updating,
            Phase::Failed,
            Phase::Terminating,
        ];
        for phase in all {
            assert!(phase.can_transition_to(Phase::Failed));
            assert!(phase.can_transition_to(Phase::Terminating));
        }
    }

    #[test]
    fn test_reentry_points() {
        assert!(Phase::Failed.can_transition_to(Phase::ValidatingDependencies));
        assert!(Phase::Running.can_transition_to(Phase::Updating));
        assert!(Phase::Running.can_transition_to(Phase::ValidatingDependencies));
        assert!(Phase::Updating.can_transition_to(Phase::ValidatingDependencies));
    }

    #[test]
    fn test_tracker_from_fresh_project() {
        let mut tracker = PhaseTracker::new(None);
        tracker.enter(Phase::ValidatingDependencies).unwrap();
        tracker.enter(Phase::DeployingSecrets).unwrap();
        assert_eq!(
            tracker.trail(),
            &[Phase::Pending, Phase::ValidatingDependencies, Phase::DeployingSecrets]
        );
    }

    #[test]
    fn test_tracker_resume_does_not_revisit() {
        let mut tracker = PhaseTracker::new(Some(Phase::InitializingDatabase));
        tracker.enter(Phase::ValidatingDependencies).unwrap();
        tracker.enter(Phase::DeployingSecrets).unwrap();
        tracker.enter(Phase::InitializingDatabase).unwrap();
        tracker.enter(Phase::DeployingComponents).unwrap();
        tracker.enter(Phase::Running).unwrap();
        assert_eq!(tracker.trail(), &[Phase::DeployingComponents, Phase::Running]);
    }

    #[test]
    fn test_tracker_rejects_invalid_move() {
        let mut tracker = PhaseTracker::new(Some(Phase::Failed));
        let err = tracker.enter(Phase::Running).unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::InvalidTransition {
                from: Phase::Failed,
                to: Phase::Running
            }
        ));
    }

    #[test]
    fn test_tracker_restarts_after_stale_terminating() {
        let mut tracker = PhaseTracker::new(Some(Phase::Terminating));
        tracker.enter(Phase::ValidatingDependencies).unwrap();
        assert_eq!(tracker.trail(), &[Phase::Pending, Phase::ValidatingDependencies]);
    }
}
