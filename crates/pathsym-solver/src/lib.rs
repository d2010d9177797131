//! Decision procedures for pathsym path constraints.
//!
//! Two implementations of [`DecisionProcedure`](pathsym_ir::DecisionProcedure)
//! are provided: a pure-Rust enumerative procedure that decides constraints
//! over a bounded integer domain, and, with the `z3` feature, a Z3 backend.

pub mod enumerative;
#[cfg(feature = "z3")]
pub mod z3_backend;

pub use enumerative::{EnumerativeProcedure, EnumeratorConfig, Value};
#[cfg(feature = "z3")]
pub use z3_backend::{Z3Config, Z3Procedure};

use thiserror::Error;

/// Solver error. Reported to callers of `dec_solve` as
/// [`DecisionResult::Error`](pathsym_ir::DecisionResult::Error) and kept for
/// inspection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("unsupported construct in path constraint: {0}")]
    Unsupported(String),

    #[error("type mismatch in path constraint: {0}")]
    Type(String),

    #[error("search space of {size} assignments exceeds the limit of {limit}")]
    Budget { size: u64, limit: u64 },

    #[error("solver returned unknown: {0}")]
    Unknown(String),
}

pub type SolverResult<T> = Result<T, SolverError>;
