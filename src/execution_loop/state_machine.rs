//! Retry state machine
//!
//! A typed transition function over (state, outcome) -> state. It owns no
//! I/O, so the retry budget and escalation order can be checked without any
//! generation or execution capability.
//!
//! Budgets are strict per question: a stage is only entered while its
//! counter is below the maximum, and escalation never resets a counter.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Resolve,
    Synthesize,
    Execute,
    Validate,
    Format,
    Failed,
    Done,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Failed | PipelineState::Done)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Resolve => "RESOLVE",
            PipelineState::Synthesize => "SYNTHESIZE",
            PipelineState::Execute => "EXECUTE",
            PipelineState::Validate => "VALIDATE",
            PipelineState::Format => "FORMAT",
            PipelineState::Failed => "FAILED",
            PipelineState::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

/// What a stage reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Resolved,
    ResolutionFailed,
    Synthesized,
    /// `spec_at_fault` is set when the specification was structurally incomplete
    SynthesisFailed { spec_at_fault: bool },
    /// Execution finished, successfully or with a structured error
    Executed,
    ResultReady,
    /// Syntax or schema error from the engine
    InvalidSql,
    EmptyResult,
    EngineFault,
    Formatted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub resolution_attempts: u32,
    pub synthesis_attempts: u32,
    pub max_resolution: u32,
    pub max_synthesis: u32,
}

impl RetryState {
    pub fn new(max_resolution: u32, max_synthesis: u32) -> Self {
        Self {
            resolution_attempts: 0,
            synthesis_attempts: 0,
            max_resolution,
            max_synthesis,
        }
    }

    pub fn can_resolve(&self) -> bool {
        self.resolution_attempts < self.max_resolution
    }

    pub fn can_synthesize(&self) -> bool {
        self.synthesis_attempts < self.max_synthesis
    }

    /// Record entry into a stage; only RESOLVE and SYNTHESIZE are budgeted
    pub fn record_entry(&mut self, state: PipelineState) {
        match state {
            PipelineState::Resolve => self.resolution_attempts += 1,
            PipelineState::Synthesize => self.synthesis_attempts += 1,
            _ => {}
        }
    }
}

/// What the validated result should be treated as when formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(PipelineState),
    /// Empty result accepted as a final "no rows matched" answer
    AcceptEmpty,
}

impl Transition {
    pub fn state(&self) -> PipelineState {
        match self {
            Transition::To(state) => *state,
            Transition::AcceptEmpty => PipelineState::Format,
        }
    }
}

/// Pure transition function
pub fn transition(state: PipelineState, outcome: StageOutcome, retry: &RetryState) -> Transition {
    use PipelineState::*;
    use StageOutcome::*;

    let next = match (state, outcome) {
        (Resolve, Resolved) => {
            if retry.can_synthesize() {
                Synthesize
            } else {
                Failed
            }
        }
        (Resolve, ResolutionFailed) => {
            if retry.can_resolve() {
                Resolve
            } else {
                Failed
            }
        }

        (Synthesize, Synthesized) => Execute,
        (Synthesize, SynthesisFailed { spec_at_fault }) => {
            // An incomplete specification compiles the same way every time,
            // so the specification is re-resolved first.
            if spec_at_fault && retry.can_resolve() && retry.can_synthesize() {
                Resolve
            } else if retry.can_synthesize() {
                Synthesize
            } else {
                Failed
            }
        }

        (Execute, Executed) => Validate,

        (Validate, ResultReady) => Format,
        (Validate, InvalidSql) => {
            if retry.can_synthesize() {
                Synthesize
            } else {
                Failed
            }
        }
        (Validate, EmptyResult) => {
            if retry.can_resolve() && retry.can_synthesize() {
                Resolve
            } else {
                return Transition::AcceptEmpty;
            }
        }
        (Validate, EngineFault) => Failed,

        (Format, Formatted) => Done,

        // Any other pairing is a controller bug; stop rather than loop.
        _ => Failed,
    };

    Transition::To(next)
}
