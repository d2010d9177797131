//! Program loading error types.

use crate::expr::Type;
use thiserror::Error;

/// An error raised while loading or querying a program.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entry function '{name}' is not defined")]
    MissingEntry { name: String },

    #[error("function '{name}' is defined more than once")]
    DuplicateFunction { name: String },

    #[error("function '{function}' does not end with END_FUNCTION")]
    MissingEndFunction { function: String },

    #[error("instruction {index} of '{function}' targets {target}, body has {len} instructions")]
    TargetOutOfRange {
        function: String,
        index: usize,
        target: usize,
        len: usize,
    },

    #[error("type of '{name}' has too many components: {ty}")]
    TypeTooLarge { name: String, ty: Type },

    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },
}

/// Result type for program operations.
pub type ProgramResult<T> = Result<T, ProgramError>;
