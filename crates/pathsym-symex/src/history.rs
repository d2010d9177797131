//! Append-only, branch-shareable history of executed steps.
//!
//! All steps of one exploration live in a single arena shared by every state
//! branched from a common ancestor. A [`StepRef`] names the tail of one path;
//! the path itself is the predecessor chain ending at that tail. Appending
//! allocates a new arena entry pointing at the old tail, so a sibling holding
//! the old tail never observes the new step.

use pathsym_ir::{DecisionProcedure, Expr, LocRef};
use std::sync::{Arc, PoisonError, RwLock};

/// Whether a step was a branch decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchKind {
    #[default]
    None,
    Taken,
    NotTaken,
}

/// What a step contributes to the path constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StepEffect {
    #[default]
    None,
    /// `ssa_lhs == ssa_rhs`.
    Assignment {
        full_lhs: Expr,
        ssa_lhs: Expr,
        ssa_rhs: Expr,
    },
    /// The guard holds on this path.
    Guard { guard: Expr, branch: BranchKind },
}

/// One executed step.
#[derive(Debug, Clone)]
pub struct Step {
    /// Arena index of the previous step on the same path.
    pub predecessor: Option<usize>,
    pub pc: LocRef,
    pub thread_nr: usize,
    pub hidden: bool,
    pub effect: StepEffect,
}

impl Step {
    pub fn is_branch(&self) -> bool {
        matches!(
            self.effect,
            StepEffect::Guard {
                branch: BranchKind::Taken | BranchKind::NotTaken,
                ..
            }
        )
    }

    /// Add this step's constraint to a decision procedure.
    pub fn convert(&self, decision_procedure: &mut (impl DecisionProcedure + ?Sized)) {
        match &self.effect {
            StepEffect::None => {}
            StepEffect::Assignment {
                ssa_lhs, ssa_rhs, ..
            } => decision_procedure.set_to_true(&Expr::eq(ssa_lhs.clone(), ssa_rhs.clone())),
            StepEffect::Guard { guard, .. } => decision_procedure.set_to_true(guard),
        }
    }
}

/// The step arena of one exploration.
#[derive(Debug, Clone, Default)]
pub struct History {
    steps: Arc<RwLock<Vec<Arc<Step>>>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of steps recorded on all paths.
    pub fn len(&self) -> usize {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, step: Step) -> usize {
        let mut steps = self.steps.write().unwrap_or_else(PoisonError::into_inner);
        steps.push(Arc::new(step));
        steps.len() - 1
    }

    fn get(&self, index: usize) -> Arc<Step> {
        let steps = self.steps.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&steps[index])
    }
}

/// A reference to the tail of one path in a [`History`].
#[derive(Debug, Clone)]
pub struct StepRef {
    history: History,
    index: Option<usize>,
}

impl StepRef {
    /// The empty path.
    pub fn new(history: &History) -> Self {
        Self {
            history: history.clone(),
            index: None,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.index.is_none()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// The tail step.
    pub fn get(&self) -> Option<Arc<Step>> {
        self.index.map(|i| self.history.get(i))
    }

    /// Append `step` after the current tail and move the tail to it.
    pub fn generate_successor(&mut self, mut step: Step) {
        step.predecessor = self.index;
        self.index = Some(self.history.push(step));
    }

    /// The path without its tail step.
    pub fn predecessor(&self) -> StepRef {
        Self {
            history: self.history.clone(),
            index: self.get().and_then(|s| s.predecessor),
        }
    }

    /// Whether `other` refers to the same arena.
    pub fn same_history(&self, other: &StepRef) -> bool {
        Arc::ptr_eq(&self.history.steps, &other.history.steps)
    }

    /// The steps of this path in execution order.
    pub fn steps(&self) -> Vec<Arc<Step>> {
        let arena = self
            .history
            .steps
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut path = Vec::new();
        let mut current = self.index;
        while let Some(i) = current {
            let step = Arc::clone(&arena[i]);
            current = step.predecessor;
            path.push(step);
        }
        path.reverse();
        path
    }

    /// Number of steps on this path.
    pub fn len(&self) -> usize {
        self.steps().len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_nil()
    }

    /// Feed the whole path, as a conjunction, to a decision procedure.
    pub fn convert(&self, decision_procedure: &mut (impl DecisionProcedure + ?Sized)) {
        for step in self.steps() {
            step.convert(decision_procedure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(pc: usize, thread_nr: usize) -> Step {
        Step {
            predecessor: None,
            pc: LocRef::new(pc),
            thread_nr,
            hidden: false,
            effect: StepEffect::None,
        }
    }

    #[test]
    fn test_nil_reference() {
        let history = History::new();
        let tail = StepRef::new(&history);
        assert!(tail.is_nil());
        assert!(tail.get().is_none());
        assert!(tail.steps().is_empty());
    }

    #[test]
    fn test_branches_share_prefix() {
        let history = History::new();
        let mut a = StepRef::new(&history);
        a.generate_successor(step(0, 0));
        a.generate_successor(step(1, 0));

        let mut b = a.clone();
        a.generate_successor(step(2, 0));
        b.generate_successor(step(7, 1));

        let pcs = |r: &StepRef| r.steps().iter().map(|s| s.pc.loc_number()).collect::<Vec<_>>();
        assert_eq!(pcs(&a), vec![0, 1, 2]);
        assert_eq!(pcs(&b), vec![0, 1, 7]);
        // shared prefix is stored once
        assert_eq!(history.len(), 4);
        assert!(a.same_history(&b));
    }

    #[test]
    fn test_predecessor() {
        let history = History::new();
        let mut tail = StepRef::new(&history);
        tail.generate_successor(step(3, 0));
        tail.generate_successor(step(4, 1));
        let prev = tail.predecessor();
        assert_eq!(prev.get().unwrap().pc, LocRef::new(3));
        assert!(prev.predecessor().is_nil());
    }

    #[test]
    fn test_is_branch() {
        let mut s = step(0, 0);
        assert!(!s.is_branch());
        s.effect = StepEffect::Guard {
            guard: Expr::bool(true),
            branch: BranchKind::None,
        };
        assert!(!s.is_branch());
        s.effect = StepEffect::Guard {
            guard: Expr::bool(true),
            branch: BranchKind::NotTaken,
        };
        assert!(s.is_branch());
    }
}
