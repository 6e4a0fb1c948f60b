//! Migration phase state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of a migration attempt.
///
/// State transitions:
/// - Start -> BackingUp -> Provisioning -> Restoring -> Verifying -> Cleaning -> Done
/// - Start -> Provisioning (nothing to back up)
/// - any non-terminal -> Failed
///
/// Design note: the legal edges live in `can_transition_to`, so skipping a
/// phase (e.g. Restoring -> Cleaning) is rejected rather than silently taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Start,
    BackingUp,
    Provisioning,
    Restoring,
    Verifying,
    Cleaning,
    Done,
    Failed,
}

impl MigrationPhase {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationPhase::Done | MigrationPhase::Failed)
    }

    pub fn can_transition_to(self, next: MigrationPhase) -> bool {
        use MigrationPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Start, BackingUp) | (Start, Provisioning) => true,
            (BackingUp, Provisioning) => true,
            (Provisioning, Restoring) => true,
            (Restoring, Verifying) => true,
            (Verifying, Cleaning) => true,
            (Cleaning, Done) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::Start => "start",
            MigrationPhase::BackingUp => "backing-up",
            MigrationPhase::Provisioning => "provisioning",
            MigrationPhase::Restoring => "restoring",
            MigrationPhase::Verifying => "verifying",
            MigrationPhase::Cleaning => "cleaning",
            MigrationPhase::Done => "done",
            MigrationPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::MigrationPhase::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::backup(Start, BackingUp)]
    #[case::fresh(Start, Provisioning)]
    #[case::cutover(BackingUp, Provisioning)]
    #[case::restore(Provisioning, Restoring)]
    #[case::verify(Restoring, Verifying)]
    #[case::clean(Verifying, Cleaning)]
    #[case::done(Cleaning, Done)]
    #[case::fail_early(Start, Failed)]
    #[case::fail_late(Cleaning, Failed)]
    fn legal_edges(#[case] from: MigrationPhase, #[case] to: MigrationPhase) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_verify(Restoring, Cleaning)]
    #[case::skip_restore(Provisioning, Verifying)]
    #[case::backwards(Verifying, BackingUp)]
    #[case::after_done(Done, Failed)]
    #[case::after_failed(Failed, Start)]
    #[case::straight_to_done(Start, Done)]
    fn illegal_edges(#[case] from: MigrationPhase, #[case] to: MigrationPhase) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        for phase in [Start, BackingUp, Provisioning, Restoring, Verifying, Cleaning] {
            assert!(!phase.is_terminal(), "{phase} should not be terminal");
        }
        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
    }
}
