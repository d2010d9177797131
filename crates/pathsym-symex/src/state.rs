//! The symbolic state of one explored path.

use crate::history::{BranchKind, History, Step, StepEffect, StepRef};
use crate::pointer::{is_pointer_value, PointsTo, SyntacticPointsTo};
use crate::read::object_path;
use crate::thread::{Frame, Thread, VarState};
use crate::{SymexError, SymexResult};
use pathsym_ir::{
    simplify, DecisionProcedure, DecisionResult, Expr, Instruction, LocRef, Locs, Type, VarInfo,
    VarMap,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of checking an assertion on the current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionVerdict {
    /// No feasible extension of the path violates the assertion.
    Safe,
    /// Some feasible extension of the path violates the assertion.
    Violated,
}

/// The state of one explored execution path.
///
/// Cloning a state is how the search driver branches: the variable stores
/// and threads are deep-copied, the history prefix is shared.
#[derive(Debug, Clone)]
pub struct PathSymexState {
    pub(crate) var_map: Arc<VarMap>,
    pub(crate) locs: Arc<Locs>,
    pub(crate) points_to: Arc<dyn PointsTo>,

    /// Values of the shared variables, by slot.
    pub shared_vars: Vec<VarState>,
    pub threads: Vec<Thread>,
    pub inside_atomic_section: bool,

    /// Tail of this path's history.
    pub history: StepRef,

    /// How often each backward goto has been taken.
    pub unwinding_map: BTreeMap<LocRef, u32>,
    /// Active activations of each function.
    pub recursion_map: BTreeMap<String, u32>,

    current_thread: usize,
    no_thread_interleavings: usize,
    no_branches: usize,
    depth: usize,
}

/// Start a new exploration at the table's entry location.
pub fn initial_state(var_map: Arc<VarMap>, locs: Arc<Locs>, history: &History) -> PathSymexState {
    let entry_loc = locs.entry_loc;
    let mut state = PathSymexState::new(var_map, locs, history);

    let thread = state.add_thread();
    thread.pc = entry_loc;
    state.set_current_thread(0);

    state
}

impl PathSymexState {
    /// A state with no threads.
    pub fn new(var_map: Arc<VarMap>, locs: Arc<Locs>, history: &History) -> Self {
        Self {
            var_map,
            locs,
            points_to: Arc::new(SyntacticPointsTo),
            shared_vars: Vec::new(),
            threads: Vec::new(),
            inside_atomic_section: false,
            history: StepRef::new(history),
            unwinding_map: BTreeMap::new(),
            recursion_map: BTreeMap::new(),
            current_thread: 0,
            no_thread_interleavings: 0,
            no_branches: 0,
            depth: 0,
        }
    }

    /// Use a different points-to oracle for dereferencing.
    pub fn with_points_to(mut self, points_to: Arc<dyn PointsTo>) -> Self {
        self.points_to = points_to;
        self
    }

    pub fn var_map(&self) -> &Arc<VarMap> {
        &self.var_map
    }

    pub fn locs(&self) -> &Arc<Locs> {
        &self.locs
    }

    // ---- threads and program counters ----

    #[inline]
    pub fn get_current_thread(&self) -> usize {
        self.current_thread
    }

    pub fn set_current_thread(&mut self, thread: usize) {
        assert!(
            thread < self.threads.len(),
            "thread index {} out of range ({} threads)",
            thread,
            self.threads.len()
        );
        self.current_thread = thread;
    }

    pub fn is_executable(&self) -> bool {
        self.threads
            .get(self.current_thread)
            .is_some_and(|t| t.active)
    }

    /// Append a new thread; the caller sets its program counter.
    pub fn add_thread(&mut self) -> &mut Thread {
        self.threads.push(Thread::default());
        let index = self.threads.len() - 1;
        &mut self.threads[index]
    }

    pub fn disable_current_thread(&mut self) {
        self.current_thread_mut().active = false;
    }

    fn current_thread_ref(&self) -> &Thread {
        assert!(
            self.current_thread < self.threads.len(),
            "no active thread: index {} with {} threads",
            self.current_thread,
            self.threads.len()
        );
        &self.threads[self.current_thread]
    }

    fn current_thread_mut(&mut self) -> &mut Thread {
        assert!(
            self.current_thread < self.threads.len(),
            "no active thread: index {} with {} threads",
            self.current_thread,
            self.threads.len()
        );
        &mut self.threads[self.current_thread]
    }

    pub fn pc(&self) -> LocRef {
        self.current_thread_ref().pc
    }

    pub fn next_pc(&mut self) {
        self.current_thread_mut().pc.increase();
    }

    pub fn set_pc(&mut self, new_pc: LocRef) {
        self.current_thread_mut().pc = new_pc;
    }

    /// The instruction at the active thread's program counter.
    pub fn get_instruction(&self) -> &Instruction {
        &self.locs[self.pc()].instruction
    }

    /// Whether the current step is hidden from traces.
    pub fn get_hide(&self) -> bool {
        if self.get_instruction().source.hidden {
            return true;
        }
        self.threads
            .get(self.current_thread)
            .is_some_and(Thread::in_hidden_function)
    }

    // ---- counters ----

    pub fn get_no_thread_interleavings(&self) -> usize {
        self.no_thread_interleavings
    }

    pub fn get_depth(&self) -> usize {
        self.depth
    }

    pub fn increase_depth(&mut self) {
        self.depth += 1;
    }

    pub fn get_no_branches(&self) -> usize {
        self.no_branches
    }

    pub fn increase_no_branches(&mut self) {
        self.no_branches += 1;
    }

    pub fn last_was_branch(&self) -> bool {
        self.history.get().is_some_and(|s| s.is_branch())
    }

    /// Count one more traversal of the backward edge at `loc`.
    pub fn increase_unwinding(&mut self, loc: LocRef) -> u32 {
        let count = self.unwinding_map.entry(loc).or_insert(0);
        *count += 1;
        *count
    }

    pub fn unwinding_count(&self, loc: LocRef) -> u32 {
        self.unwinding_map.get(&loc).copied().unwrap_or(0)
    }

    pub fn recursion_count(&self, function: &str) -> u32 {
        self.recursion_map.get(function).copied().unwrap_or(0)
    }

    // ---- variables ----

    /// The current valuation of a variable component.
    ///
    /// Growing a store moves its elements, so the returned reference must not
    /// be held across an access that may create new slots. The mutable
    /// borrow of the state enforces this.
    pub fn get_var_state(&mut self, var_info: &VarInfo) -> &mut VarState {
        let current = self.current_thread;
        assert!(
            current < self.threads.len(),
            "variable access without an active thread"
        );
        let vars = if var_info.is_shared() {
            &mut self.shared_vars
        } else {
            &mut self.threads[current].local_vars
        };
        if vars.len() <= var_info.number {
            vars.resize_with(var_info.number + 1, VarState::default);
        }
        &mut vars[var_info.number]
    }

    /// Assign `rhs` to the scalar or aggregate lvalue `lhs` and record the
    /// assignment in the history.
    ///
    /// The right-hand side is read before any component of `lhs` changes.
    pub fn write(&mut self, lhs: &Expr, rhs: &Expr) -> SymexResult<()> {
        let ssa_rhs = self.read(rhs)?;
        self.write_ssa(lhs, ssa_rhs)
    }

    /// Assign a value that was already read, possibly in another frame.
    pub fn write_ssa(&mut self, lhs: &Expr, ssa_rhs: Expr) -> SymexResult<()> {
        let lhs = self.resolve_lhs(lhs)?;
        self.assign(lhs, ssa_rhs)
    }

    fn assign(&mut self, lhs: Expr, ssa_rhs: Expr) -> SymexResult<()> {
        match lhs.ty() {
            Type::Struct { fields } => {
                for field in fields {
                    let rhs_field = simplify(Expr::member(ssa_rhs.clone(), &field.name));
                    self.assign(Expr::member(lhs.clone(), &field.name), rhs_field)?;
                }
                Ok(())
            }
            Type::Array {
                size: Some(size), ..
            } => {
                for i in 0..size as i64 {
                    let rhs_element = simplify(Expr::index(ssa_rhs.clone(), Expr::int(i)));
                    self.assign(Expr::index(lhs.clone(), Expr::int(i)), rhs_element)?;
                }
                Ok(())
            }
            _ => self.assign_scalar(lhs, ssa_rhs),
        }
    }

    fn assign_scalar(&mut self, lhs: Expr, ssa_rhs: Expr) -> SymexResult<()> {
        let (symbol, suffix) =
            object_path(&lhs).ok_or_else(|| SymexError::UnsupportedLhs { lhs: lhs.clone() })?;
        let info = self.var_map.get(&symbol, &suffix, &lhs.ty())?;
        info.increment_ssa_counter();
        let ssa_lhs = info.ssa_symbol();

        let value = if ssa_rhs.is_constant() || is_pointer_value(&ssa_rhs) {
            ssa_rhs.clone()
        } else {
            Expr::Nil
        };
        let var_state = self.get_var_state(&info);
        var_state.value = value;
        var_state.ssa_symbol = ssa_lhs.clone();
        trace!(lhs = %lhs, ssa = %ssa_lhs, "assignment");

        self.record_step_with(StepEffect::Assignment {
            full_lhs: lhs,
            ssa_lhs,
            ssa_rhs,
        });
        Ok(())
    }

    // ---- calls ----

    /// Push `frame`, saving the current values of the callee's locals so
    /// that they can be restored on return.
    pub fn enter_function(&mut self, mut frame: Frame, locals: &[Arc<VarInfo>]) {
        for info in locals.iter().filter(|i| !i.is_shared()) {
            let saved = self.get_var_state(info).clone();
            frame.saved_local_vars.insert(info.number, saved);
        }
        *self
            .recursion_map
            .entry(frame.current_function.clone())
            .or_insert(0) += 1;
        self.current_thread_mut().call_stack.push(frame);
    }

    /// Pop the innermost frame and restore the locals it saved.
    pub fn leave_function(&mut self) -> Option<Frame> {
        let frame = self.current_thread_mut().call_stack.pop()?;
        let locals = &mut self.threads[self.current_thread].local_vars;
        for (&number, saved) in &frame.saved_local_vars {
            if locals.len() <= number {
                locals.resize_with(number + 1, VarState::default);
            }
            locals[number] = saved.clone();
        }
        if let Some(count) = self.recursion_map.get_mut(&frame.current_function) {
            *count = count.saturating_sub(1);
        }
        Some(frame)
    }

    // ---- history ----

    /// Append a step for the instruction at the current program counter.
    pub fn record_step(&mut self) {
        self.record_step_with(StepEffect::None);
    }

    /// Append a step that contributes `effect` to the path constraint.
    pub fn record_step_with(&mut self, effect: StepEffect) {
        // is there a context switch happening?
        if let Some(previous) = self.history.get() {
            if previous.thread_nr != self.current_thread {
                self.no_thread_interleavings += 1;
                trace!(
                    from = previous.thread_nr,
                    to = self.current_thread,
                    "context switch"
                );
            }
        }

        let step = Step {
            predecessor: None,
            pc: self.pc(),
            thread_nr: self.current_thread,
            hidden: self.get_hide(),
            effect,
        };
        self.history.generate_successor(step);
    }

    /// Record the outcome of a conditional branch on `guard`.
    pub fn record_branch(&mut self, guard: &Expr, taken: bool) -> SymexResult<()> {
        let guard = self.read(guard)?;
        let (guard, branch) = if taken {
            (guard, BranchKind::Taken)
        } else {
            (simplify(Expr::not(guard)), BranchKind::NotTaken)
        };
        self.increase_no_branches();
        self.record_step_with(StepEffect::Guard { guard, branch });
        Ok(())
    }

    /// Record that `guard` holds from here on.
    pub fn record_assume(&mut self, guard: &Expr) -> SymexResult<()> {
        let guard = self.read(guard)?;
        self.record_step_with(StepEffect::Guard {
            guard,
            branch: BranchKind::None,
        });
        Ok(())
    }

    // ---- decision procedure queries ----

    /// Whether the path constraint is satisfiable.
    pub fn is_feasible(
        &self,
        decision_procedure: &mut (impl DecisionProcedure + ?Sized),
    ) -> SymexResult<bool> {
        // feed path constraint to decision procedure
        self.history.convert(decision_procedure);

        let result = decision_procedure.dec_solve();
        debug!(
            procedure = decision_procedure.decision_procedure_text(),
            ?result,
            "feasibility check"
        );
        match result {
            DecisionResult::Satisfiable => Ok(true),
            DecisionResult::Unsatisfiable => Ok(false),
            DecisionResult::Error => Err(SymexError::DecisionProcedure {
                context: "feasibility check",
            }),
        }
    }

    /// Check the assertion at the current program counter on this path.
    ///
    /// Panics if the current instruction is not an assertion.
    pub fn check_assertion(
        &mut self,
        decision_procedure: &mut (impl DecisionProcedure + ?Sized),
    ) -> SymexResult<AssertionVerdict> {
        let instruction = self.get_instruction();
        assert!(
            instruction.is_assert(),
            "check_assertion at non-assertion location {}",
            self.pc()
        );
        let guard = instruction.guard().cloned().unwrap_or(Expr::Nil);

        // the assertion in SSA
        let assertion = self.read(&guard)?;

        if assertion.is_true() {
            trace!(pc = %self.pc(), "assertion trivially true");
            return Ok(AssertionVerdict::Safe);
        }

        self.history.convert(decision_procedure);
        decision_procedure.set_to_false(&assertion);

        let result = decision_procedure.dec_solve();
        debug!(
            pc = %self.pc(),
            procedure = decision_procedure.decision_procedure_text(),
            ?result,
            "assertion check"
        );
        match result {
            DecisionResult::Satisfiable => Ok(AssertionVerdict::Violated),
            DecisionResult::Unsatisfiable => Ok(AssertionVerdict::Safe),
            DecisionResult::Error => Err(SymexError::DecisionProcedure {
                context: "assertion check",
            }),
        }
    }

    fn fmt_thread(thread: &Thread, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  PC: {}", thread.pc)?;
        write!(f, "  Call stack:")?;
        for frame in &thread.call_stack {
            writeln!(f, " {}", frame.return_location)?;
        }
        writeln!(f)
    }
}

impl fmt::Display for PathSymexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (t, thread) in self.threads.iter().enumerate() {
            writeln!(f, "*** Thread {}", t)?;
            Self::fmt_thread(thread, f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathsym_ir::{InstructionKind, Loc, SourceLocation, VarKind};

    fn straight_line(n: usize) -> Locs {
        let mut loc_vector: Vec<Loc> = (0..n)
            .map(|_| Loc {
                instruction: Instruction::new(InstructionKind::Skip),
                function: "main".into(),
                distance_to_property: None,
            })
            .collect();
        loc_vector.push(Loc {
            instruction: Instruction::new(InstructionKind::EndFunction),
            function: "main".into(),
            distance_to_property: None,
        });
        Locs::new(loc_vector, LocRef::new(0), BTreeMap::new())
    }

    fn fresh(n: usize) -> PathSymexState {
        initial_state(
            Arc::new(VarMap::new()),
            Arc::new(straight_line(n)),
            &History::new(),
        )
    }

    #[test]
    fn test_initial_state() {
        let state = fresh(3);
        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.get_current_thread(), 0);
        assert_eq!(state.pc(), LocRef::new(0));
        assert_eq!(state.get_depth(), 0);
        assert_eq!(state.get_no_branches(), 0);
        assert_eq!(state.get_no_thread_interleavings(), 0);
        assert!(state.is_executable());
        assert!(state.history.is_nil());
    }

    #[test]
    fn test_executable_requires_active_thread() {
        let empty = PathSymexState::new(
            Arc::new(VarMap::new()),
            Arc::new(straight_line(1)),
            &History::new(),
        );
        assert!(!empty.is_executable());

        let mut state = fresh(1);
        state.disable_current_thread();
        assert!(!state.is_executable());
    }

    #[test]
    #[should_panic(expected = "no active thread")]
    fn test_pc_without_threads_panics() {
        let empty = PathSymexState::new(
            Arc::new(VarMap::new()),
            Arc::new(straight_line(1)),
            &History::new(),
        );
        let _ = empty.pc();
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_current_thread_out_of_range() {
        let mut state = fresh(1);
        state.set_current_thread(1);
    }

    #[test]
    fn test_pc_bookkeeping_affects_active_thread_only() {
        let mut state = fresh(4);
        state.add_thread().pc = LocRef::new(2);
        state.next_pc();
        assert_eq!(state.threads[0].pc, LocRef::new(1));
        assert_eq!(state.threads[1].pc, LocRef::new(2));

        state.set_current_thread(1);
        state.set_pc(LocRef::new(3));
        assert_eq!(state.threads[0].pc, LocRef::new(1));
        assert_eq!(state.threads[1].pc, LocRef::new(3));
    }

    #[test]
    fn test_record_step_counts_context_switches() {
        let mut state = fresh(4);
        state.add_thread().pc = LocRef::new(1);

        state.record_step(); // first step never counts
        assert_eq!(state.get_no_thread_interleavings(), 0);
        state.record_step();
        assert_eq!(state.get_no_thread_interleavings(), 0);

        state.set_current_thread(1);
        state.record_step();
        assert_eq!(state.get_no_thread_interleavings(), 1);

        state.set_current_thread(0);
        state.record_step();
        assert_eq!(state.get_no_thread_interleavings(), 2);

        let tail = state.history.get().unwrap();
        assert_eq!(tail.thread_nr, 0);
        assert_eq!(tail.pc, LocRef::new(0));
        assert_eq!(state.history.len(), 4);
    }

    #[test]
    fn test_hidden_steps() {
        let mut locs = straight_line(2);
        locs.loc_vector[1].instruction.source = SourceLocation {
            hidden: true,
            ..SourceLocation::default()
        };
        let mut state = initial_state(Arc::new(VarMap::new()), Arc::new(locs), &History::new());

        assert!(!state.get_hide());
        state.next_pc();
        assert!(state.get_hide());
        state.set_pc(LocRef::new(0));
        state.enter_function(Frame::new("lib", LocRef::new(2)).hidden(true), &[]);
        assert!(state.get_hide());
        state.record_step();
        assert!(state.history.get().unwrap().hidden);
    }

    #[test]
    fn test_get_var_state_routes_by_storage_class() {
        let var_map = Arc::new(VarMap::new());
        var_map.declare("g", VarKind::Shared);
        var_map.declare("t", VarKind::ThreadLocal);
        let mut state = initial_state(
            Arc::clone(&var_map),
            Arc::new(straight_line(1)),
            &History::new(),
        );
        state.add_thread();

        let g = var_map.get("g", "", &Type::Int).unwrap();
        let t = var_map.get("t", "", &Type::Int).unwrap();

        state.get_var_state(&g).value = Expr::int(1);
        state.get_var_state(&t).value = Expr::int(2);
        assert_eq!(state.shared_vars.len(), 1);
        assert_eq!(state.threads[0].local_vars.len(), 1);

        state.set_current_thread(1);
        assert_eq!(state.get_var_state(&g).value, Expr::int(1));
        assert!(state.get_var_state(&t).value.is_nil());
    }

    #[test]
    fn test_frames_restore_locals() {
        let var_map = Arc::new(VarMap::new());
        var_map.declare("n", VarKind::ProcedureLocal);
        let mut state = initial_state(
            Arc::clone(&var_map),
            Arc::new(straight_line(1)),
            &History::new(),
        );
        let n = var_map.get("n", "", &Type::Int).unwrap();
        let local = Expr::symbol("n", Type::Int);

        state.write(&local, &Expr::int(5)).unwrap();
        state.enter_function(Frame::new("f", LocRef::new(1)), &[Arc::clone(&n)]);
        assert_eq!(state.recursion_count("f"), 1);

        state.write(&local, &Expr::int(9)).unwrap();
        assert_eq!(state.get_var_state(&n).value, Expr::int(9));

        let frame = state.leave_function().unwrap();
        assert_eq!(frame.return_location, LocRef::new(1));
        assert_eq!(state.get_var_state(&n).value, Expr::int(5));
        assert_eq!(state.recursion_count("f"), 0);
        assert!(state.leave_function().is_none());
    }

    #[test]
    fn test_unwinding_counts() {
        let mut state = fresh(2);
        assert_eq!(state.unwinding_count(LocRef::new(1)), 0);
        state.increase_unwinding(LocRef::new(1));
        assert_eq!(state.increase_unwinding(LocRef::new(1)), 2);
        assert_eq!(state.unwinding_count(LocRef::new(1)), 2);
    }

    #[test]
    fn test_last_was_branch() {
        let mut state = fresh(2);
        assert!(!state.last_was_branch());
        state.record_branch(&Expr::bool(true), false).unwrap();
        assert!(state.last_was_branch());
        assert_eq!(state.get_no_branches(), 1);
        state.record_step();
        assert!(!state.last_was_branch());
    }

    #[test]
    fn test_display() {
        let mut state = fresh(3);
        state.add_thread().pc = LocRef::new(2);
        state.enter_function(Frame::new("f", LocRef::new(1)), &[]);
        let text = state.to_string();
        assert_eq!(
            text,
            "*** Thread 0\n  PC: 0\n  Call stack: 1\n\n\n*** Thread 1\n  PC: 2\n  Call stack:\n\n"
        );
    }

    #[test]
    fn test_clone_does_not_share_appends() {
        let mut a = fresh(3);
        a.record_step();
        let mut b = a.clone();
        a.next_pc();
        a.record_step();
        b.record_step();
        b.record_step();
        assert_eq!(a.history.len(), 2);
        assert_eq!(b.history.len(), 3);
        assert_eq!(a.history.predecessor().index(), b.history.predecessor().predecessor().index());
    }
}
