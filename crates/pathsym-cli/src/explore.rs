//! A small exploration driver over symbolic states.
//!
//! Paths are expanded one instruction at a time. Conditional jumps fork the
//! state and infeasible branches are pruned; backward jumps and recursive
//! calls are bounded by the unwinding limit. Threads are not scheduled.

use crate::{CliError, CliResult};
use pathsym_ir::{Expr, Instruction, InstructionKind, LocRef, Locs, Program, VarMap};
use pathsym_solver::{EnumerativeProcedure, EnumeratorConfig};
use pathsym_symex::{
    initial_state, AssertionVerdict, Frame, History, PathSymexState, SymexError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Exploration limits.
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Maximum traversals of each backward jump, and maximum nesting of
    /// each function, per path.
    pub unwind: u32,
    /// Expand the state closest to the property first.
    pub guided: bool,
    pub enumerator: EnumeratorConfig,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            unwind: 8,
            guided: false,
            enumerator: EnumeratorConfig::default(),
        }
    }
}

/// Counters of one exploration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExploreStats {
    /// Paths that ran to completion.
    pub paths: usize,
    /// Paths cut off by an infeasible branch or assumption.
    pub infeasible: usize,
    /// Paths cut off by the unwinding limit.
    pub bounded: usize,
    pub steps: usize,
}

/// Outcome of one assertion over all explored paths.
#[derive(Debug, Clone)]
pub struct AssertionReport {
    pub loc: LocRef,
    pub instruction: String,
    pub violated: bool,
    /// Values of the SSA symbols on the first violating path.
    pub counterexample: Vec<(String, String)>,
}

pub struct Explorer {
    locs: Arc<Locs>,
    var_map: Arc<VarMap>,
    config: ExploreConfig,
    reports: BTreeMap<LocRef, AssertionReport>,
    stats: ExploreStats,
}

impl Explorer {
    pub fn new(program: Program, config: ExploreConfig) -> Self {
        Self {
            locs: Arc::new(program.locs),
            var_map: Arc::new(program.var_map),
            config,
            reports: BTreeMap::new(),
            stats: ExploreStats::default(),
        }
    }

    pub fn stats(&self) -> &ExploreStats {
        &self.stats
    }

    /// Per-assertion results in location order.
    pub fn reports(&self) -> impl Iterator<Item = &AssertionReport> {
        self.reports.values()
    }

    pub fn any_violated(&self) -> bool {
        self.reports.values().any(|r| r.violated)
    }

    /// Explore every path from the entry location.
    pub fn run(&mut self) -> CliResult<()> {
        let history = History::new();
        let mut worklist = vec![initial_state(
            Arc::clone(&self.var_map),
            Arc::clone(&self.locs),
            &history,
        )];

        while let Some(state) = self.select(&mut worklist) {
            worklist.extend(self.step(state)?);
        }

        debug!(
            paths = self.stats.paths,
            steps = self.stats.steps,
            history = history.len(),
            "exploration finished"
        );
        Ok(())
    }

    fn select(&self, worklist: &mut Vec<PathSymexState>) -> Option<PathSymexState> {
        if !self.config.guided {
            return worklist.pop();
        }
        let closest = worklist
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| {
                self.locs[s.pc()]
                    .distance_to_property
                    .unwrap_or(usize::MAX)
            })
            .map(|(i, _)| i)?;
        Some(worklist.swap_remove(closest))
    }

    fn step(&mut self, mut state: PathSymexState) -> CliResult<Vec<PathSymexState>> {
        if !state.is_executable() {
            self.stats.paths += 1;
            return Ok(Vec::new());
        }

        let pc = state.pc();
        let instruction = state.get_instruction().clone();
        self.stats.steps += 1;
        state.increase_depth();

        match &instruction.kind {
            InstructionKind::Skip | InstructionKind::Decl { .. } | InstructionKind::Dead { .. } => {
                state.record_step();
                state.next_pc();
            }
            InstructionKind::AtomicBegin | InstructionKind::AtomicEnd => {
                state.inside_atomic_section =
                    matches!(instruction.kind, InstructionKind::AtomicBegin);
                state.record_step();
                state.next_pc();
            }
            InstructionKind::Assign { lhs, rhs } => {
                state.write(lhs, rhs)?;
                state.next_pc();
            }
            InstructionKind::Assume { guard } => {
                state.record_assume(guard)?;
                if !self.feasible(&state)? {
                    self.stats.infeasible += 1;
                    return Ok(Vec::new());
                }
                state.next_pc();
            }
            InstructionKind::Assert { guard, .. } => {
                self.check(&mut state, pc, &instruction)?;
                state.record_assume(guard)?;
                state.next_pc();
            }
            InstructionKind::Goto { guard, target } => {
                return self.branch(state, pc, &instruction, guard, *target);
            }
            InstructionKind::FunctionCall {
                lhs,
                function,
                arguments,
            } => {
                if !self.call(&mut state, pc, lhs.as_ref(), function, arguments)? {
                    self.stats.bounded += 1;
                    return Ok(Vec::new());
                }
            }
            InstructionKind::Return { value } => {
                if let Some(value) = value {
                    let value = state.read(value)?;
                    let current = state.get_current_thread();
                    if let Some(frame) = state.threads[current].call_stack.last_mut() {
                        frame.return_rhs = value;
                    }
                }
                state.record_step();
                match self.locs.function(&self.locs[pc].function) {
                    Some(f) => state.set_pc(f.end_loc),
                    None => state.next_pc(),
                }
            }
            InstructionKind::EndFunction => {
                state.record_step();
                match state.leave_function() {
                    Some(frame) => {
                        if !frame.return_lhs.is_nil() && !frame.return_rhs.is_nil() {
                            state.write_ssa(&frame.return_lhs, frame.return_rhs.clone())?;
                        }
                        state.set_pc(frame.return_location);
                    }
                    None => {
                        state.disable_current_thread();
                        self.stats.paths += 1;
                        return Ok(Vec::new());
                    }
                }
            }
            InstructionKind::EndThread => {
                state.record_step();
                state.disable_current_thread();
                self.stats.paths += 1;
                return Ok(Vec::new());
            }
            InstructionKind::StartThread { .. } => {
                return Err(CliError::Unsupported {
                    loc: pc,
                    instruction: instruction.to_string(),
                });
            }
        }
        Ok(vec![state])
    }

    fn branch(
        &mut self,
        mut state: PathSymexState,
        pc: LocRef,
        instruction: &Instruction,
        guard: &Expr,
        target: LocRef,
    ) -> CliResult<Vec<PathSymexState>> {
        let backwards = instruction.is_backwards_goto(pc);
        let condition = state.read(guard)?;

        if condition.is_false() {
            state.record_step();
            state.next_pc();
            return Ok(vec![state]);
        }

        let mut successors = Vec::with_capacity(2);
        let mut taken = if condition.is_true() {
            state.record_step();
            state
        } else {
            let mut not_taken = state.clone();
            not_taken.record_branch(guard, false)?;
            if self.feasible(&not_taken)? {
                not_taken.next_pc();
                successors.push(not_taken);
            } else {
                self.stats.infeasible += 1;
            }

            state.record_branch(guard, true)?;
            if !self.feasible(&state)? {
                self.stats.infeasible += 1;
                return Ok(successors);
            }
            state
        };

        if backwards && taken.increase_unwinding(pc) > self.config.unwind {
            debug!(loc = %pc, "unwinding limit reached");
            self.stats.bounded += 1;
            return Ok(successors);
        }
        taken.set_pc(target);
        successors.push(taken);
        Ok(successors)
    }

    /// Enter `function`. Returns false if the recursion limit cuts the path.
    fn call(
        &mut self,
        state: &mut PathSymexState,
        pc: LocRef,
        lhs: Option<&Expr>,
        function: &str,
        arguments: &[Expr],
    ) -> CliResult<bool> {
        let Some(callee) = self.locs.function(function).cloned() else {
            warn!(function, loc = %pc, "call to undefined function skipped");
            state.record_step();
            state.next_pc();
            return Ok(true);
        };
        if state.recursion_count(function) >= self.config.unwind {
            debug!(function, "recursion limit reached");
            return Ok(false);
        }

        // arguments are read in the caller's frame
        let values = arguments
            .iter()
            .map(|a| state.read(a))
            .collect::<Result<Vec<_>, _>>()?;
        let mut locals = Vec::with_capacity(callee.parameters.len());
        for parameter in &callee.parameters {
            if let Expr::Symbol { name, ty } = parameter {
                locals.push(self.var_map.get(name, "", ty)?);
            }
        }

        let frame = Frame::new(function, pc.next())
            .hidden(callee.hidden)
            .with_return_lhs(lhs.cloned().unwrap_or(Expr::Nil));
        state.record_step();
        state.enter_function(frame, &locals);
        for (parameter, value) in callee.parameters.iter().zip(values) {
            state.write_ssa(parameter, value)?;
        }
        state.set_pc(callee.first_loc);
        Ok(true)
    }

    fn feasible(&self, state: &PathSymexState) -> CliResult<bool> {
        let mut dp = EnumerativeProcedure::new(self.config.enumerator.clone());
        match state.is_feasible(&mut dp) {
            Err(SymexError::DecisionProcedure { context }) => Err(CliError::Solver {
                context,
                message: dp.last_error().map(ToString::to_string).unwrap_or_default(),
            }),
            other => Ok(other?),
        }
    }

    fn check(
        &mut self,
        state: &mut PathSymexState,
        pc: LocRef,
        instruction: &Instruction,
    ) -> CliResult<()> {
        let mut dp = EnumerativeProcedure::new(self.config.enumerator.clone());
        let verdict = match state.check_assertion(&mut dp) {
            Err(SymexError::DecisionProcedure { context }) => {
                return Err(CliError::Solver {
                    context,
                    message: dp.last_error().map(ToString::to_string).unwrap_or_default(),
                })
            }
            other => other?,
        };

        let report = self.reports.entry(pc).or_insert_with(|| AssertionReport {
            loc: pc,
            instruction: instruction.to_string(),
            violated: false,
            counterexample: Vec::new(),
        });
        if verdict == AssertionVerdict::Violated && !report.violated {
            report.violated = true;
            report.counterexample = dp
                .model()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
                .unwrap_or_default();
        }
        Ok(())
    }
}
