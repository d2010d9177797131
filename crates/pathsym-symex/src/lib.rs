//! Path-based symbolic execution state for bounded verification of
//! multi-threaded imperative programs.
//!
//! A [`PathSymexState`] describes one explored execution path: the program
//! counter and call stack of every modeled thread, the symbolic value of every
//! variable, and a reference into the shared, append-only [`History`] of
//! executed steps. The history doubles as the path constraint handed to a
//! [`DecisionProcedure`](pathsym_ir::DecisionProcedure) when the search driver
//! asks whether the path is feasible or whether an assertion can fail.

pub mod history;
pub mod pointer;
mod read;
pub mod state;
pub mod thread;

pub use history::{BranchKind, History, Step, StepEffect, StepRef};
pub use pointer::{PointsTo, SyntacticPointsTo};
pub use state::{initial_state, AssertionVerdict, PathSymexState};
pub use thread::{Frame, IndexSet, Thread, VarState};

use pathsym_ir::{Expr, ProgramError};
use thiserror::Error;

/// Symbolic execution error.
#[derive(Debug, Error)]
pub enum SymexError {
    /// The decision procedure answered ERROR. Fatal for the exploration step.
    #[error("error from decision procedure during {context}")]
    DecisionProcedure { context: &'static str },

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("unsupported assignment target: {lhs}")]
    UnsupportedLhs { lhs: Expr },
}

pub type SymexResult<T> = Result<T, SymexError>;
