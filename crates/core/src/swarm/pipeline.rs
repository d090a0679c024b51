//! # Orchestrator State Machine
//!
//! ```text
//! Init → Generating → Persisting → Verifying → Analyzing ─┬→ Succeeded
//!             ↑           (generator failure) ───────────→ │
//!             └──────────────── Iterating ←────────────────┼→ Failed
//!                                                          └→ Cancelled (from any state)
//! ```
//!
//! The machine only tracks states and the round counter; the round loop
//! in `orchestrator` performs the work between transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the round loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Store opened, nothing generated yet
    Init,
    /// Waiting on the generation strategy
    Generating,
    /// Merging the round's artifacts into the source tree
    Persisting,
    /// Validation, build and test probes
    Verifying,
    /// Folding probe reports into a verdict
    Analyzing,
    /// Carrying findings into the next round
    Iterating,
    /// Terminal: the last round passed
    Succeeded,
    /// Terminal: budget exhausted or fatal error
    Failed,
    /// Terminal: stop requested
    Cancelled,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Init => "init",
            OrchestratorState::Generating => "generating",
            OrchestratorState::Persisting => "persisting",
            OrchestratorState::Verifying => "verifying",
            OrchestratorState::Analyzing => "analyzing",
            OrchestratorState::Iterating => "iterating",
            OrchestratorState::Succeeded => "succeeded",
            OrchestratorState::Failed => "failed",
            OrchestratorState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Succeeded | OrchestratorState::Failed | OrchestratorState::Cancelled
        )
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The round-loop state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current state
    pub state: OrchestratorState,
    /// Current round; `first_round - 1` until generation starts
    pub round: u32,
    /// First round of this run (greater than 1 when resuming)
    pub first_round: u32,
    /// Last round this run may execute
    pub last_round: u32,
}

impl Pipeline {
    /// A machine that runs at most `max_rounds` rounds starting at `first_round`
    pub fn new(first_round: u32, max_rounds: u32) -> Self {
        let first_round = first_round.max(1);
        Self {
            state: OrchestratorState::Init,
            round: first_round - 1,
            first_round,
            last_round: first_round + max_rounds.max(1) - 1,
        }
    }

    /// Advance along the happy path. Returns the new state.
    pub fn advance(&mut self) -> OrchestratorState {
        self.state = match self.state {
            OrchestratorState::Init | OrchestratorState::Iterating => {
                self.round += 1;
                OrchestratorState::Generating
            }
            OrchestratorState::Generating => OrchestratorState::Persisting,
            OrchestratorState::Persisting => OrchestratorState::Verifying,
            OrchestratorState::Verifying => OrchestratorState::Analyzing,
            other => other,
        };
        self.state
    }

    /// Generator failed: skip persistence and verification
    pub fn skip_to_analysis(&mut self) -> OrchestratorState {
        if self.state == OrchestratorState::Generating {
            self.state = OrchestratorState::Analyzing;
        }
        self.state
    }

    /// Decide the round outcome from `Analyzing`
    pub fn conclude(&mut self, success: bool) -> OrchestratorState {
        if self.state != OrchestratorState::Analyzing {
            return self.state;
        }
        self.state = if success {
            OrchestratorState::Succeeded
        } else if self.round < self.last_round {
            OrchestratorState::Iterating
        } else {
            OrchestratorState::Failed
        };
        self.state
    }

    /// Stop request observed. Terminal states are kept.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrchestratorState::Cancelled;
        }
    }

    /// Fail the run
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrchestratorState::Failed;
        }
    }

    /// Check if the run is over
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check if the run succeeded
    pub fn is_success(&self) -> bool {
        self.state == OrchestratorState::Succeeded
    }

    /// Rounds started by this run
    pub fn rounds_started(&self) -> u32 {
        self.round + 1 - self.first_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_advance() {
        let mut pipeline = Pipeline::new(1, 3);
        assert_eq!(pipeline.state, OrchestratorState::Init);

        assert_eq!(pipeline.advance(), OrchestratorState::Generating);
        assert_eq!(pipeline.round, 1);
        assert_eq!(pipeline.advance(), OrchestratorState::Persisting);
        assert_eq!(pipeline.advance(), OrchestratorState::Verifying);
        assert_eq!(pipeline.advance(), OrchestratorState::Analyzing);
        assert_eq!(pipeline.conclude(false), OrchestratorState::Iterating);
        assert_eq!(pipeline.advance(), OrchestratorState::Generating);
        assert_eq!(pipeline.round, 2);
    }

    #[test]
    fn test_budget_exhaustion_fails() {
        let mut pipeline = Pipeline::new(1, 1);
        pipeline.advance();
        pipeline.skip_to_analysis();
        assert_eq!(pipeline.conclude(false), OrchestratorState::Failed);
        assert!(pipeline.is_complete());
        assert!(!pipeline.is_success());
    }

    #[test]
    fn test_success_is_sticky() {
        let mut pipeline = Pipeline::new(1, 5);
        for _ in 0..4 {
            pipeline.advance();
        }
        assert_eq!(pipeline.conclude(true), OrchestratorState::Succeeded);
        assert_eq!(pipeline.advance(), OrchestratorState::Succeeded);
        pipeline.cancel();
        pipeline.fail();
        assert!(pipeline.is_success());
        assert_eq!(pipeline.round, 1);
    }

    #[test]
    fn test_resume_offsets_budget() {
        let mut pipeline = Pipeline::new(4, 2);
        assert_eq!(pipeline.last_round, 5);
        pipeline.advance();
        assert_eq!(pipeline.round, 4);
        assert_eq!(pipeline.rounds_started(), 1);
    }

    #[test]
    fn test_cancel_from_any_state() {
        let mut pipeline = Pipeline::new(1, 2);
        pipeline.advance();
        pipeline.advance();
        pipeline.cancel();
        assert_eq!(pipeline.state, OrchestratorState::Cancelled);
    }
}
