//! Bounded enumerative decision procedure.
//!
//! Constraints of the form `symbol == rhs` whose symbol does not occur in
//! `rhs` define that symbol: it takes the value of `rhs` and is never
//! enumerated, so assignment steps cost nothing and may leave the domain.
//! Every other free SSA symbol ranges over a finite domain: booleans over
//! both values, integers over `int_lo..=int_hi`, pointers over the addresses
//! that occur in the constraints plus null. The conjunction is decided by
//! trying every assignment of the free symbols, so answers are exact for
//! that domain.

use crate::{SolverError, SolverResult};
use pathsym_ir::{BinOp, DecisionProcedure, DecisionResult, Expr, Type, UnaryOp};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

/// Configuration for the enumerative procedure.
#[derive(Debug, Clone)]
pub struct EnumeratorConfig {
    /// Smallest value of an integer symbol.
    pub int_lo: i64,
    /// Largest value of an integer symbol.
    pub int_hi: i64,
    /// Give up (answer ERROR) above this many candidate assignments.
    pub max_assignments: u64,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            int_lo: -8,
            int_hi: 8,
            max_assignments: 1_000_000,
        }
    }
}

/// A concrete value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    /// The address of an object path, `None` for null.
    Addr(Option<Expr>),
    Struct(Vec<(String, Value)>),
    Array(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Addr(None) => write!(f, "NULL"),
            Value::Addr(Some(object)) => write!(f, "&{}", object),
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " .{} = {}", name, v)?;
                }
                write!(f, " }}")
            }
            Value::Array(elements) => {
                write!(f, "{{")?;
                for (i, v) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}", v)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// The enumerative decision procedure.
#[derive(Debug, Default)]
pub struct EnumerativeProcedure {
    config: EnumeratorConfig,
    constraints: Vec<(Expr, bool)>,
    model: Option<BTreeMap<String, Value>>,
    last_error: Option<SolverError>,
}

impl EnumerativeProcedure {
    pub fn new(config: EnumeratorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Number of constraints added so far.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Drop all constraints and the last answer.
    pub fn clear(&mut self) {
        self.constraints.clear();
        self.model = None;
        self.last_error = None;
    }

    /// The satisfying assignment found by the last `dec_solve`.
    pub fn model(&self) -> Option<&BTreeMap<String, Value>> {
        self.model.as_ref()
    }

    /// Why the last `dec_solve` answered ERROR.
    pub fn last_error(&self) -> Option<&SolverError> {
        self.last_error.as_ref()
    }

    /// Defining constraints, in an order in which each right-hand side only
    /// mentions free symbols and symbols defined before it.
    fn definitions(&self) -> Vec<(String, &Expr)> {
        let mut defined = BTreeSet::new();
        // symbols read by accepted right-hand sides
        let mut used = BTreeSet::new();
        let mut definitions = Vec::new();

        for (expr, polarity) in &self.constraints {
            let Expr::Binary {
                op: BinOp::Eq,
                left,
                right,
            } = expr
            else {
                continue;
            };
            let Expr::Symbol { name, .. } = &**left else {
                continue;
            };
            if !*polarity || defined.contains(name) || used.contains(name) {
                continue;
            }
            let mut rhs = Free::default();
            rhs.collect(right);
            if rhs.symbols.contains_key(name) {
                continue;
            }
            used.extend(rhs.symbols.into_keys());
            defined.insert(name.clone());
            definitions.push((name.clone(), &**right));
        }
        definitions
    }

    fn solve(&self) -> SolverResult<Option<BTreeMap<String, Value>>> {
        let definitions = self.definitions();
        let mut free = Free::default();
        for (expr, _) in &self.constraints {
            free.collect(expr);
        }
        for (name, _) in &definitions {
            free.symbols.remove(name);
        }

        let mut names = Vec::with_capacity(free.symbols.len());
        let mut domains = Vec::with_capacity(free.symbols.len());
        let mut size: u64 = 1;
        for (name, ty) in &free.symbols {
            let domain = self.domain(name, ty, &free.addresses)?;
            size = size.saturating_mul(domain.len() as u64);
            names.push(name.clone());
            domains.push(domain);
        }
        if size > self.config.max_assignments {
            return Err(SolverError::Budget {
                size,
                limit: self.config.max_assignments,
            });
        }
        debug!(
            symbols = names.len(),
            defined = definitions.len(),
            assignments = size,
            "enumerating"
        );
        if size == 0 {
            return Ok(None);
        }

        // odometer over the domains
        let mut digits = vec![0usize; domains.len()];
        loop {
            let mut assignment: BTreeMap<String, Value> = names
                .iter()
                .zip(&domains)
                .zip(&digits)
                .map(|((name, domain), &d)| (name.clone(), domain[d].clone()))
                .collect();
            for (name, rhs) in &definitions {
                let value = eval(rhs, &assignment)?;
                assignment.insert(name.clone(), value);
            }

            if self.satisfied_by(&assignment)? {
                return Ok(Some(assignment));
            }

            let mut position = 0;
            loop {
                if position == digits.len() {
                    return Ok(None);
                }
                digits[position] += 1;
                if digits[position] < domains[position].len() {
                    break;
                }
                digits[position] = 0;
                position += 1;
            }
        }
    }

    fn domain(
        &self,
        name: &str,
        ty: &Type,
        addresses: &BTreeSet<Expr>,
    ) -> SolverResult<Vec<Value>> {
        match ty {
            Type::Bool => Ok(vec![Value::Bool(false), Value::Bool(true)]),
            Type::Int => Ok((self.config.int_lo..=self.config.int_hi)
                .map(Value::Int)
                .collect()),
            Type::Pointer { .. } => Ok(std::iter::once(Value::Addr(None))
                .chain(addresses.iter().cloned().map(|a| Value::Addr(Some(a))))
                .collect()),
            other => Err(SolverError::Unsupported(format!(
                "symbol {} of type {}",
                name, other
            ))),
        }
    }

    fn satisfied_by(&self, assignment: &BTreeMap<String, Value>) -> SolverResult<bool> {
        for (expr, polarity) in &self.constraints {
            if eval_bool(expr, assignment)? != *polarity {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl DecisionProcedure for EnumerativeProcedure {
    fn set_to(&mut self, expr: &Expr, value: bool) {
        self.constraints.push((expr.clone(), value));
    }

    fn dec_solve(&mut self) -> DecisionResult {
        self.model = None;
        self.last_error = None;
        match self.solve() {
            Ok(Some(model)) => {
                self.model = Some(model);
                DecisionResult::Satisfiable
            }
            Ok(None) => DecisionResult::Unsatisfiable,
            Err(e) => {
                warn!(error = %e, "enumeration failed");
                self.last_error = Some(e);
                DecisionResult::Error
            }
        }
    }

    fn decision_procedure_text(&self) -> &'static str {
        "bounded enumeration"
    }
}

/// Free SSA symbols and the address constants of a constraint set.
#[derive(Default)]
struct Free {
    symbols: BTreeMap<String, Type>,
    addresses: BTreeSet<Expr>,
}

impl Free {
    fn collect(&mut self, expr: &Expr) {
        match expr {
            Expr::Symbol { name, ty } => {
                self.symbols.entry(name.clone()).or_insert_with(|| ty.clone());
            }
            // objects under `&` are program names, only their indices are values
            Expr::AddressOf { object } => {
                if object.is_object_path() {
                    self.addresses.insert((**object).clone());
                }
                self.collect_address(object);
            }
            Expr::Nil
            | Expr::Bool { .. }
            | Expr::Int { .. }
            | Expr::Null { .. } => {}
            Expr::Unary { operand, .. } => self.collect(operand),
            Expr::Binary { left, right, .. } => {
                self.collect(left);
                self.collect(right);
            }
            Expr::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                self.collect(cond);
                self.collect(then_branch);
                self.collect(else_branch);
            }
            Expr::Index { array, index } => {
                self.collect(array);
                self.collect(index);
            }
            Expr::Member { base, .. } => self.collect(base),
            Expr::Deref { pointer } => self.collect(pointer),
            Expr::StructLit { fields } => fields.iter().for_each(|(_, e)| self.collect(e)),
            Expr::ArrayLit { elements, .. } => elements.iter().for_each(|e| self.collect(e)),
        }
    }

    fn collect_address(&mut self, object: &Expr) {
        match object {
            Expr::Member { base, .. } => self.collect_address(base),
            Expr::Index { array, index } => {
                self.collect_address(array);
                self.collect(index);
            }
            _ => {}
        }
    }
}

fn eval_bool(expr: &Expr, assignment: &BTreeMap<String, Value>) -> SolverResult<bool> {
    match eval(expr, assignment)? {
        Value::Bool(b) => Ok(b),
        other => Err(SolverError::Type(format!("{} is {}, not a boolean", expr, other))),
    }
}

fn eval_int(expr: &Expr, assignment: &BTreeMap<String, Value>) -> SolverResult<i64> {
    match eval(expr, assignment)? {
        Value::Int(n) => Ok(n),
        other => Err(SolverError::Type(format!("{} is {}, not an integer", expr, other))),
    }
}

fn eval(expr: &Expr, assignment: &BTreeMap<String, Value>) -> SolverResult<Value> {
    match expr {
        Expr::Bool { value } => Ok(Value::Bool(*value)),
        Expr::Int { value } => Ok(Value::Int(*value)),
        Expr::Symbol { name, .. } => assignment
            .get(name)
            .cloned()
            .ok_or_else(|| SolverError::Unsupported(format!("unassigned symbol {}", name))),
        Expr::Null { .. } => Ok(Value::Addr(None)),
        Expr::AddressOf { object } => Ok(Value::Addr(Some(eval_address(object, assignment)?))),
        Expr::Unary { op, operand } => match op {
            UnaryOp::Not => Ok(Value::Bool(!eval_bool(operand, assignment)?)),
            UnaryOp::Neg => Ok(Value::Int(eval_int(operand, assignment)?.wrapping_neg())),
        },
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, assignment),
        Expr::Ite {
            cond,
            then_branch,
            else_branch,
        } => {
            if eval_bool(cond, assignment)? {
                eval(then_branch, assignment)
            } else {
                eval(else_branch, assignment)
            }
        }
        Expr::StructLit { fields } => Ok(Value::Struct(
            fields
                .iter()
                .map(|(name, e)| Ok((name.clone(), eval(e, assignment)?)))
                .collect::<SolverResult<_>>()?,
        )),
        Expr::ArrayLit { elements, .. } => Ok(Value::Array(
            elements
                .iter()
                .map(|e| eval(e, assignment))
                .collect::<SolverResult<_>>()?,
        )),
        Expr::Member { base, field } => match eval(base, assignment)? {
            Value::Struct(fields) => fields
                .into_iter()
                .find(|(name, _)| name == field)
                .map(|(_, v)| v)
                .ok_or_else(|| SolverError::Type(format!("no field {} in {}", field, base))),
            other => Err(SolverError::Type(format!("{} is not a struct", other))),
        },
        Expr::Index { array, index } => {
            let i = eval_int(index, assignment)?;
            match eval(array, assignment)? {
                Value::Array(elements) => usize::try_from(i)
                    .ok()
                    .and_then(|i| elements.get(i).cloned())
                    .ok_or_else(|| SolverError::Unsupported(format!("index {} out of bounds", i))),
                other => Err(SolverError::Type(format!("{} is not an array", other))),
            }
        }
        Expr::Nil | Expr::Deref { .. } => Err(SolverError::Unsupported(expr.to_string())),
    }
}

/// The object an address expression names, with its indices evaluated.
fn eval_address(object: &Expr, assignment: &BTreeMap<String, Value>) -> SolverResult<Expr> {
    match object {
        Expr::Symbol { .. } => Ok(object.clone()),
        Expr::Member { base, field } => Ok(Expr::member(
            eval_address(base, assignment)?,
            field.clone(),
        )),
        Expr::Index { array, index } => Ok(Expr::index(
            eval_address(array, assignment)?,
            Expr::int(eval_int(index, assignment)?),
        )),
        _ => Err(SolverError::Unsupported(format!("address of {}", object))),
    }
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    assignment: &BTreeMap<String, Value>,
) -> SolverResult<Value> {
    let value = match op {
        BinOp::And => Value::Bool(eval_bool(left, assignment)? && eval_bool(right, assignment)?),
        BinOp::Or => Value::Bool(eval_bool(left, assignment)? || eval_bool(right, assignment)?),
        BinOp::Implies => {
            Value::Bool(!eval_bool(left, assignment)? || eval_bool(right, assignment)?)
        }
        BinOp::Eq => Value::Bool(eval(left, assignment)? == eval(right, assignment)?),
        BinOp::Ne => Value::Bool(eval(left, assignment)? != eval(right, assignment)?),
        _ => {
            let l = eval_int(left, assignment)?;
            let r = eval_int(right, assignment)?;
            match op {
                BinOp::Lt => Value::Bool(l < r),
                BinOp::Le => Value::Bool(l <= r),
                BinOp::Gt => Value::Bool(l > r),
                BinOp::Ge => Value::Bool(l >= r),
                BinOp::Add => Value::Int(l.wrapping_add(r)),
                BinOp::Sub => Value::Int(l.wrapping_sub(r)),
                BinOp::Mul => Value::Int(l.wrapping_mul(r)),
                // division by zero yields 0
                BinOp::Div => Value::Int(l.checked_div(r).unwrap_or(0)),
                BinOp::Mod => Value::Int(l.checked_rem(r).unwrap_or(0)),
                BinOp::And | BinOp::Or | BinOp::Implies | BinOp::Eq | BinOp::Ne => {
                    unreachable!("handled above")
                }
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(name: &str) -> Expr {
        Expr::symbol(name, Type::Int)
    }

    fn solve(constraints: &[(Expr, bool)]) -> (DecisionResult, EnumerativeProcedure) {
        let mut dp = EnumerativeProcedure::default();
        for (e, v) in constraints {
            dp.set_to(e, *v);
        }
        (dp.dec_solve(), dp)
    }

    #[test]
    fn test_empty_conjunction_is_satisfiable() {
        let (result, dp) = solve(&[]);
        assert_eq!(result, DecisionResult::Satisfiable);
        assert!(dp.model().unwrap().is_empty());
    }

    #[test]
    fn test_linear_constraints() {
        let x = int("x#0");
        let y = int("y#1");
        let (result, dp) = solve(&[
            (Expr::eq(y.clone(), Expr::binary(BinOp::Add, x.clone(), Expr::int(1))), true),
            (Expr::binary(BinOp::Gt, y.clone(), Expr::int(3)), true),
            (Expr::binary(BinOp::Lt, x.clone(), Expr::int(4)), true),
        ]);
        assert_eq!(result, DecisionResult::Satisfiable);
        let model = dp.model().unwrap();
        assert_eq!(model["x#0"], Value::Int(3));
        assert_eq!(model["y#1"], Value::Int(4));
    }

    #[test]
    fn test_negated_constraint() {
        let x = int("x#0");
        let (result, _) = solve(&[
            (Expr::eq(x.clone(), Expr::int(1)), true),
            (Expr::eq(x, Expr::int(1)), false),
        ]);
        assert_eq!(result, DecisionResult::Unsatisfiable);
    }

    #[test]
    fn test_pointer_domain() {
        let p = Expr::symbol("p#1", Type::pointer(Type::Int));
        let null = Expr::Null { ty: p.ty() };
        let x = Expr::symbol("x", Type::Int);
        let y = Expr::symbol("y", Type::Int);
        let (result, dp) = solve(&[
            (Expr::eq(p.clone(), null.clone()), false),
            (Expr::eq(p.clone(), Expr::address_of(x.clone())), false),
            (Expr::eq(p.clone(), Expr::address_of(y.clone())), false),
        ]);
        assert_eq!(result, DecisionResult::Unsatisfiable);
        assert!(dp.model().is_none());

        let (result, dp) = solve(&[
            (Expr::eq(p.clone(), null), false),
            (Expr::eq(p, Expr::address_of(x.clone())), false),
        ]);
        assert_eq!(result, DecisionResult::Satisfiable);
        // the address symbol itself is not a free variable
        assert_eq!(dp.model().unwrap().len(), 1);
        assert_eq!(dp.model().unwrap()["p#1"], Value::Addr(Some(x)));
    }

    #[test]
    fn test_budget() {
        let mut dp = EnumerativeProcedure::new(EnumeratorConfig {
            max_assignments: 100,
            ..EnumeratorConfig::default()
        });
        dp.set_to_true(&Expr::binary(BinOp::Lt, int("a#0"), int("b#0")));
        assert_eq!(dp.dec_solve(), DecisionResult::Error);
        assert!(matches!(
            dp.last_error(),
            Some(SolverError::Budget { size: 289, limit: 100 })
        ));
    }

    #[test]
    fn test_unsupported_symbol_type() {
        let s = Expr::symbol(
            "s#0",
            Type::Struct {
                fields: Vec::new(),
            },
        );
        let (result, dp) = solve(&[(Expr::eq(s.clone(), s), true)]);
        assert_eq!(result, DecisionResult::Error);
        assert!(matches!(dp.last_error(), Some(SolverError::Unsupported(_))));
    }

    #[test]
    fn test_aggregate_literals() {
        let x = int("x#0");
        let lit = Expr::StructLit {
            fields: vec![("a".into(), x.clone()), ("b".into(), Expr::int(2))],
        };
        let (result, dp) = solve(&[(
            Expr::eq(Expr::member(lit, "a"), Expr::int(-3)),
            true,
        )]);
        assert_eq!(result, DecisionResult::Satisfiable);
        assert_eq!(dp.model().unwrap()["x#0"], Value::Int(-3));
    }

    #[test]
    fn test_definitions_leave_the_domain() {
        let i1 = int("i#1");
        let i2 = int("i#2");
        let (result, dp) = solve(&[
            (Expr::eq(i1.clone(), Expr::int(100)), true),
            (Expr::eq(i2.clone(), Expr::binary(BinOp::Mul, i1, Expr::int(3))), true),
            (Expr::binary(BinOp::Gt, i2, Expr::int(299)), true),
        ]);
        assert_eq!(result, DecisionResult::Satisfiable);
        let model = dp.model().unwrap();
        assert_eq!(model["i#1"], Value::Int(100));
        assert_eq!(model["i#2"], Value::Int(300));
    }

    #[test]
    fn test_definitions_do_not_count_against_budget() {
        let mut dp = EnumerativeProcedure::new(EnumeratorConfig {
            max_assignments: 17,
            ..EnumeratorConfig::default()
        });
        dp.set_to_true(&Expr::eq(int("y#1"), Expr::binary(BinOp::Add, int("x#0"), Expr::int(1))));
        for n in 1..=5 {
            dp.set_to_true(&Expr::eq(int(&format!("i#{}", n)), Expr::int(n)));
        }
        dp.set_to_false(&Expr::eq(int("y#1"), Expr::int(5)));
        assert_eq!(dp.dec_solve(), DecisionResult::Satisfiable);
        assert_eq!(dp.model().unwrap().len(), 7);
    }

    #[test]
    fn test_redefinition_is_a_constraint() {
        let x = int("x#1");
        let (result, _) = solve(&[
            (Expr::eq(x.clone(), Expr::int(1)), true),
            (Expr::eq(x, Expr::int(2)), true),
        ]);
        assert_eq!(result, DecisionResult::Unsatisfiable);
    }

    #[test]
    fn test_clear() {
        let (_, mut dp) = solve(&[(Expr::bool(false), true)]);
        assert_eq!(dp.len(), 1);
        dp.clear();
        assert!(dp.is_empty());
        assert_eq!(dp.dec_solve(), DecisionResult::Satisfiable);
    }
}
