//! Program representation consumed by the pathsym symbolic execution layer.
//!
//! This crate holds everything the symbolic state treats as an external,
//! read-mostly collaborator: expressions and types, the instruction list
//! flattened into a location table, the variable map that assigns storage
//! slots and SSA counters, and the decision procedure interface. Programs are
//! produced by an external front-end and exchanged as JSON (see [`program`]).

pub mod decision;
pub mod error;
pub mod expr;
pub mod instruction;
pub mod locs;
pub mod program;
pub mod simplify;
pub mod var_map;

pub use decision::{DecisionProcedure, DecisionResult};
pub use error::{ProgramError, ProgramResult};
pub use expr::{BinOp, Expr, Field, Type, UnaryOp, MAX_COMPONENTS};
pub use instruction::{Instruction, InstructionKind, SourceLocation};
pub use locs::{FunctionEntry, Loc, LocRef, Locs};
pub use program::{load_program, FunctionDef, Program, ProgramFile, VariableDecl};
pub use simplify::simplify;
pub use var_map::{VarInfo, VarKind, VarMap};
