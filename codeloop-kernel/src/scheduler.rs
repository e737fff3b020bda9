//! The orchestrator's state machine: the fixed set of states a run moves
//! through and the transition table between them. The orchestrator itself
//! (in the `codeloop-core` crate) owns the I/O; this module owns only the
//! shape of "what state are we in and what can follow it", so the
//! transition logic can be unit-tested without a repo, a model, or a clock.

use serde::{Deserialize, Serialize};

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Bootstrap,
    BlueprintPreflight,
    PlanFirst,
    Iterating,
    RunningCommand,
    FixingErrors,
    Finalizing,
    Done,
    Aborted,
}

/// What happened since the last state, fed into [`RunState::next`] to decide
/// the transition. Each variant corresponds to one orchestrator event from
/// the run loop.
#[derive(Debug, Clone)]
pub enum Transition {
    BlueprintReady,
    BlueprintNeedsScaffold,
    PlanProduced { estimated_iterations: usize },
    PlanEmpty,
    PatchApplied,
    VerificationRequested,
    CommandSucceeded,
    CommandFailed,
    FixAttemptsExhausted,
    MoreStepsRemain,
    AllStepsComplete,
    BudgetExceeded,
    Fatal,
}

impl RunState {
    /// The transition table. Returns `None` for a combination that can't
    /// occur — callers treat that as an internal invariant violation, not a
    /// `RunError`, since it means the orchestrator itself is out of sync
    /// with this table.
    pub fn next(self, transition: &Transition) -> Option<RunState> {
        use RunState::*;
        use Transition::*;

        match (self, transition) {
            (_, Fatal) => Some(Aborted),
            (_, BudgetExceeded) => Some(Finalizing),

            (Bootstrap, BlueprintReady) => Some(PlanFirst),
            (Bootstrap, BlueprintNeedsScaffold) => Some(BlueprintPreflight),
            (BlueprintPreflight, PatchApplied) => Some(PlanFirst),

            (PlanFirst, PlanProduced { .. }) => Some(Iterating),
            (PlanFirst, PlanEmpty) => Some(Finalizing),

            (Iterating, PatchApplied) => Some(Iterating),
            (Iterating, VerificationRequested) => Some(RunningCommand),
            (Iterating, AllStepsComplete) => Some(Finalizing),

            (RunningCommand, CommandSucceeded) => Some(Iterating),
            (RunningCommand, CommandFailed) => Some(FixingErrors),

            (FixingErrors, PatchApplied) => Some(RunningCommand),
            (FixingErrors, FixAttemptsExhausted) => Some(Finalizing),
            (FixingErrors, MoreStepsRemain) => Some(Iterating),

            (Finalizing, AllStepsComplete) => Some(Done),

            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }
}

/// Caps the orchestrator enforces across the whole run, independent of any
/// single step's own retry budget.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    pub max_iterations: u32,
    pub max_fix_attempts_per_step: u32,
}

impl RunBudget {
    pub fn check_iterations(&self, spent: u32) -> Result<(), RunError> {
        if spent >= self.max_iterations {
            return Err(RunError::BudgetExceeded(format!(
                "max_iterations ({}) reached",
                self.max_iterations
            )));
        }
        Ok(())
    }

    pub fn check_fix_attempts(&self, attempted: u32) -> Result<(), RunError> {
        if attempted >= self.max_fix_attempts_per_step {
            return Err(RunError::BudgetExceeded(format!(
                "max_fix_attempts_per_step ({}) reached",
                self.max_fix_attempts_per_step
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_through_every_state() {
        let mut state = RunState::Bootstrap;
        state = state.next(&Transition::BlueprintReady).unwrap();
        assert_eq!(state, RunState::PlanFirst);
        state = state
            .next(&Transition::PlanProduced { estimated_iterations: 2 })
            .unwrap();
        assert_eq!(state, RunState::Iterating);
        state = state.next(&Transition::VerificationRequested).unwrap();
        assert_eq!(state, RunState::RunningCommand);
        state = state.next(&Transition::CommandSucceeded).unwrap();
        assert_eq!(state, RunState::Iterating);
        state = state.next(&Transition::AllStepsComplete).unwrap();
        assert_eq!(state, RunState::Finalizing);
        state = state.next(&Transition::AllStepsComplete).unwrap();
        assert_eq!(state, RunState::Done);
        assert!(state.is_terminal());
    }

    #[test]
    fn command_failure_routes_through_fixing_errors_and_back() {
        let mut state = RunState::RunningCommand;
        state = state.next(&Transition::CommandFailed).unwrap();
        assert_eq!(state, RunState::FixingErrors);
        state = state.next(&Transition::PatchApplied).unwrap();
        assert_eq!(state, RunState::RunningCommand);
    }

    #[test]
    fn fatal_always_aborts_regardless_of_current_state() {
        for state in [
            RunState::Bootstrap,
            RunState::Iterating,
            RunState::RunningCommand,
            RunState::FixingErrors,
        ] {
            assert_eq!(state.next(&Transition::Fatal), Some(RunState::Aborted));
        }
    }

    #[test]
    fn budget_exceeded_always_finalizes() {
        assert_eq!(
            RunState::Iterating.next(&Transition::BudgetExceeded),
            Some(RunState::Finalizing)
        );
    }

    #[test]
    fn invalid_transition_is_none() {
        assert_eq!(RunState::Done.next(&Transition::PatchApplied), None);
    }

    #[test]
    fn run_budget_rejects_at_threshold() {
        let budget = RunBudget {
            max_iterations: 3,
            max_fix_attempts_per_step: 2,
        };
        assert!(budget.check_iterations(2).is_ok());
        assert!(budget.check_iterations(3).is_err());
        assert!(budget.check_fix_attempts(2).is_err());
    }
}
