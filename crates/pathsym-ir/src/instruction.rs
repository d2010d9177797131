//! Program instructions.

use crate::expr::Expr;
use crate::locs::LocRef;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_guard() -> Expr {
    Expr::bool(true)
}

/// Where an instruction came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    /// Hidden instructions are suppressed from user-visible traces.
    #[serde(default)]
    pub hidden: bool,
}

/// The kinds of instructions in the location table.
///
/// Jump targets are location references. In program files they are indices
/// into the enclosing function body and are rebased by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum InstructionKind {
    Skip,
    Decl {
        symbol: Expr,
    },
    Dead {
        symbol: Expr,
    },
    Assign {
        lhs: Expr,
        rhs: Expr,
    },
    Assume {
        guard: Expr,
    },
    Assert {
        guard: Expr,
        #[serde(default)]
        comment: String,
    },
    Goto {
        #[serde(default = "default_guard")]
        guard: Expr,
        target: LocRef,
    },
    FunctionCall {
        #[serde(default)]
        lhs: Option<Expr>,
        function: String,
        #[serde(default)]
        arguments: Vec<Expr>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    EndFunction,
    StartThread {
        target: LocRef,
    },
    EndThread,
    AtomicBegin,
    AtomicEnd,
}

/// One instruction of the analyzed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(flatten)]
    pub kind: InstructionKind,
    #[serde(default)]
    pub source: SourceLocation,
}

impl Instruction {
    pub fn new(kind: InstructionKind) -> Self {
        Self {
            kind,
            source: SourceLocation::default(),
        }
    }

    pub fn is_assert(&self) -> bool {
        matches!(self.kind, InstructionKind::Assert { .. })
    }

    pub fn is_goto(&self) -> bool {
        matches!(self.kind, InstructionKind::Goto { .. })
    }

    /// The guard of a goto, assume or assert.
    pub fn guard(&self) -> Option<&Expr> {
        match &self.kind {
            InstructionKind::Goto { guard, .. }
            | InstructionKind::Assume { guard }
            | InstructionKind::Assert { guard, .. } => Some(guard),
            _ => None,
        }
    }

    /// Expressions occurring in this instruction.
    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            InstructionKind::Decl { symbol } | InstructionKind::Dead { symbol } => vec![symbol],
            InstructionKind::Assign { lhs, rhs } => vec![lhs, rhs],
            InstructionKind::Assume { guard }
            | InstructionKind::Assert { guard, .. }
            | InstructionKind::Goto { guard, .. } => vec![guard],
            InstructionKind::FunctionCall { lhs, arguments, .. } => {
                lhs.iter().chain(arguments).collect()
            }
            InstructionKind::Return { value } => value.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Jump targets of gotos and thread spawns.
    pub fn target(&self) -> Option<LocRef> {
        match &self.kind {
            InstructionKind::Goto { target, .. } | InstructionKind::StartThread { target } => {
                Some(*target)
            }
            _ => None,
        }
    }

    /// Whether this is a goto jumping to `at` or before it.
    pub fn is_backwards_goto(&self, at: LocRef) -> bool {
        match &self.kind {
            InstructionKind::Goto { target, .. } => *target <= at,
            _ => false,
        }
    }

    pub(crate) fn rebase(&mut self, offset: usize) {
        match &mut self.kind {
            InstructionKind::Goto { target, .. } | InstructionKind::StartThread { target } => {
                *target = LocRef::new(target.loc_number() + offset);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InstructionKind::Skip => write!(f, "SKIP"),
            InstructionKind::Decl { symbol } => write!(f, "DECL {}", symbol),
            InstructionKind::Dead { symbol } => write!(f, "DEAD {}", symbol),
            InstructionKind::Assign { lhs, rhs } => write!(f, "ASSIGN {} := {}", lhs, rhs),
            InstructionKind::Assume { guard } => write!(f, "ASSUME {}", guard),
            InstructionKind::Assert { guard, comment } if comment.is_empty() => {
                write!(f, "ASSERT {}", guard)
            }
            InstructionKind::Assert { guard, comment } => {
                write!(f, "ASSERT {} // {}", guard, comment)
            }
            InstructionKind::Goto { guard, target } if guard.is_true() => {
                write!(f, "GOTO {}", target)
            }
            InstructionKind::Goto { guard, target } => write!(f, "IF {} GOTO {}", guard, target),
            InstructionKind::FunctionCall {
                lhs,
                function,
                arguments,
            } => {
                if let Some(lhs) = lhs {
                    write!(f, "CALL {} := {}(", lhs, function)?;
                } else {
                    write!(f, "CALL {}(", function)?;
                }
                for (i, a) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            InstructionKind::Return { value: Some(v) } => write!(f, "RETURN {}", v),
            InstructionKind::Return { value: None } => write!(f, "RETURN"),
            InstructionKind::EndFunction => write!(f, "END_FUNCTION"),
            InstructionKind::StartThread { target } => write!(f, "START_THREAD {}", target),
            InstructionKind::EndThread => write!(f, "END_THREAD"),
            InstructionKind::AtomicBegin => write!(f, "ATOMIC_BEGIN"),
            InstructionKind::AtomicEnd => write!(f, "ATOMIC_END"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Type;

    #[test]
    fn test_parse_flattened_instruction() {
        let json = r#"{"op":"Goto","target":3,"source":{"line":12,"hidden":true}}"#;
        let i: Instruction = serde_json::from_str(json).unwrap();
        assert_eq!(i.target(), Some(LocRef::new(3)));
        assert!(i.guard().unwrap().is_true());
        assert!(i.source.hidden);
        assert_eq!(i.to_string(), "GOTO 3");
    }

    #[test]
    fn test_assert_guard() {
        let guard = Expr::eq(Expr::symbol("x", Type::Int), Expr::int(0));
        let i = Instruction::new(InstructionKind::Assert {
            guard: guard.clone(),
            comment: String::new(),
        });
        assert!(i.is_assert());
        assert_eq!(i.guard(), Some(&guard));
    }

    #[test]
    fn test_backwards_goto() {
        let i = Instruction::new(InstructionKind::Goto {
            guard: Expr::bool(true),
            target: LocRef::new(2),
        });
        assert!(i.is_backwards_goto(LocRef::new(5)));
        assert!(!i.is_backwards_goto(LocRef::new(1)));
    }
}
