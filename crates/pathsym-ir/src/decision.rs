//! The decision procedure interface.
//!
//! Path constraints are streamed into a procedure one conjunct at a time;
//! `dec_solve` then decides the conjunction of everything added so far.

use crate::expr::Expr;

/// Outcome of a satisfiability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionResult {
    Satisfiable,
    Unsatisfiable,
    /// The procedure failed (unsupported construct, resource limit, crash).
    Error,
}

/// A solver for conjunctions of boolean expressions.
pub trait DecisionProcedure {
    /// Constrain `expr` to the given polarity.
    fn set_to(&mut self, expr: &Expr, value: bool);

    fn set_to_true(&mut self, expr: &Expr) {
        self.set_to(expr, true);
    }

    fn set_to_false(&mut self, expr: &Expr) {
        self.set_to(expr, false);
    }

    /// Decide the conjunction of all constraints added so far.
    fn dec_solve(&mut self) -> DecisionResult;

    /// Short human-readable name, used in logs.
    fn decision_procedure_text(&self) -> &'static str;
}

impl<D: DecisionProcedure + ?Sized> DecisionProcedure for &mut D {
    fn set_to(&mut self, expr: &Expr, value: bool) {
        (**self).set_to(expr, value);
    }

    fn dec_solve(&mut self) -> DecisionResult {
        (**self).dec_solve()
    }

    fn decision_procedure_text(&self) -> &'static str {
        (**self).decision_procedure_text()
    }
}
