//! Per-variable, per-frame and per-thread records of a symbolic state.

use pathsym_ir::{Expr, LocRef};
use std::collections::BTreeMap;

/// The symbolic value of one variable slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarState {
    /// A propagatable value, or nil if only the SSA symbol is known.
    pub value: Expr,
    /// The SSA symbol of the most recent write, nil before the first access.
    pub ssa_symbol: Expr,
    /// Index expressions observed on this array.
    pub index_set: IndexSet,
}

impl Default for VarState {
    fn default() -> Self {
        Self {
            value: Expr::Nil,
            ssa_symbol: Expr::Nil,
            index_set: IndexSet::default(),
        }
    }
}

/// Index expressions of an unbounded array, oldest first.
///
/// Indices that were only read come before every written one, and each
/// write moves its index to the end, so a later entry always shadows an
/// earlier one it aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet {
    indices: Vec<Expr>,
}

impl IndexSet {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, index: &Expr) -> bool {
        self.indices.contains(index)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Expr> {
        self.indices.iter()
    }

    /// Record a read of `index`. A new index holds the array's initial
    /// value, so it goes before everything seen so far.
    pub fn record_read(&mut self, index: Expr) {
        if !self.contains(&index) {
            self.indices.insert(0, index);
        }
    }

    /// Record a write at `index`, making it the newest entry.
    pub fn record_write(&mut self, index: Expr) {
        self.indices.retain(|i| *i != index);
        self.indices.push(index);
    }
}

/// Saved valuations of procedure-local slots.
pub type VarStateMap = BTreeMap<usize, VarState>;

/// One call-stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub current_function: String,
    /// Steps inside hidden functions are hidden from traces.
    pub hidden_function: bool,
    pub return_location: LocRef,
    pub return_lhs: Expr,
    pub return_rhs: Expr,
    pub saved_local_vars: VarStateMap,
}

impl Frame {
    pub fn new(current_function: impl Into<String>, return_location: LocRef) -> Self {
        Self {
            current_function: current_function.into(),
            hidden_function: false,
            return_location,
            return_lhs: Expr::Nil,
            return_rhs: Expr::Nil,
            saved_local_vars: VarStateMap::new(),
        }
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden_function = hidden;
        self
    }

    pub fn with_return_lhs(mut self, lhs: Expr) -> Self {
        self.return_lhs = lhs;
        self
    }
}

/// One modeled thread of the analyzed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub pc: LocRef,
    /// Innermost frame last.
    pub call_stack: Vec<Frame>,
    /// Thread-local and procedure-local variables, by slot.
    pub local_vars: Vec<VarState>,
    /// False once the thread has terminated.
    pub active: bool,
}

impl Default for Thread {
    fn default() -> Self {
        Self {
            pc: LocRef::default(),
            call_stack: Vec::new(),
            local_vars: Vec::new(),
            active: true,
        }
    }
}

impl Thread {
    pub fn new(pc: LocRef) -> Self {
        Self {
            pc,
            ..Self::default()
        }
    }

    /// Whether the innermost frame belongs to a hidden function.
    pub fn in_hidden_function(&self) -> bool {
        self.call_stack.last().is_some_and(|f| f.hidden_function)
    }
}
