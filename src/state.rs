//! Run state machine.
//!
//! ```text
//! Uploaded ─▶ Extracting ─▶ Prompting ─▶ Querying ─▶ Normalizing ─▶ Rendering ─▶ Done
//!     │            │            │            │             │             │
//!     └────────────┴────────────┴─────┬──────┴─────────────┴─────────────┘
//!                                     ▼
//!                          Failed { stage, error }
//! ```
//!
//! Transitions only move forward. `Done` and `Failed` are terminal.

use crate::error::{ErrorKind, StageFailure};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// A non-terminal pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploaded,
    Extracting,
    Prompting,
    Querying,
    Normalizing,
    Rendering,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Uploaded,
        Stage::Extracting,
        Stage::Prompting,
        Stage::Querying,
        Stage::Normalizing,
        Stage::Rendering,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Uploaded => "uploaded",
            Stage::Extracting => "extracting",
            Stage::Prompting => "prompting",
            Stage::Querying => "querying",
            Stage::Normalizing => "normalizing",
            Stage::Rendering => "rendering",
        }
    }

    /// The stage after this one, or `None` after rendering.
    pub fn next(self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Working on (or about to start) the given stage.
    Active { stage: Stage },
    /// Report produced.
    Done,
    /// Stopped at `stage` with an error of `kind`.
    Failed {
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }

    /// Position in the forward order; terminal states rank last.
    fn rank(&self) -> usize {
        match self {
            RunState::Active { stage } => *stage as usize,
            RunState::Done | RunState::Failed { .. } => Stage::ALL.len(),
        }
    }
}

/// Returned when a caller asks for a transition the machine forbids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from:?} → {to:?}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Forward-only state machine for one run.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: RunState,
    history: Vec<RunState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// A fresh machine in `Uploaded`.
    pub fn new() -> Self {
        let initial = RunState::Active {
            stage: Stage::Uploaded,
        };
        Self {
            current: initial.clone(),
            history: vec![initial],
        }
    }

    pub fn current(&self) -> &RunState {
        &self.current
    }

    /// Every state visited, oldest first.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// The stage currently in progress, if the run is not terminal.
    pub fn stage(&self) -> Option<Stage> {
        match self.current {
            RunState::Active { stage } => Some(stage),
            _ => None,
        }
    }

    /// Move to `stage`. Must be strictly later than the current stage.
    pub fn advance(&mut self, stage: Stage) -> Result<(), IllegalTransition> {
        self.transition(RunState::Active { stage })
    }

    /// Move to `Done`. Only legal from `Rendering`.
    pub fn complete(&mut self) -> Result<(), IllegalTransition> {
        if self.stage() != Some(Stage::Rendering) {
            return Err(self.illegal(RunState::Done));
        }
        self.transition(RunState::Done)
    }

    /// Move to `Failed` at the current stage.
    pub fn fail(&mut self, failure: &StageFailure) -> Result<(), IllegalTransition> {
        self.transition(RunState::Failed {
            stage: failure.stage,
            kind: failure.kind(),
            message: failure.error.to_string(),
        })
    }

    fn transition(&mut self, to: RunState) -> Result<(), IllegalTransition> {
        if self.current.is_terminal() || to.rank() <= self.current.rank() && !to.is_terminal() {
            warn!("Rejected state transition {:?} → {:?}", self.current, to);
            return Err(self.illegal(to));
        }
        debug!("State {:?} → {:?}", self.current, to);
        self.history.push(to.clone());
        self.current = to;
        Ok(())
    }

    fn illegal(&self, to: RunState) -> IllegalTransition {
        IllegalTransition {
            from: self.current.clone(),
            to,
        }
    }
}
