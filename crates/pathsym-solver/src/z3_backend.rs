//! Z3 backend.
//!
//! Booleans map to Z3 booleans and integers to unbounded Z3 integers.
//! Pointers are integers: null is 0 and every address constant occurring in
//! the constraints gets its own positive identifier.

use crate::{SolverError, SolverResult};
use pathsym_ir::{BinOp, DecisionProcedure, DecisionResult, Expr, Type, UnaryOp};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use z3::ast::{Bool, Dynamic, Int};
use z3::{Params, SatResult, Solver};

/// Configuration for the Z3 backend.
#[derive(Debug, Clone, Default)]
pub struct Z3Config {
    /// Per-query timeout. A timed-out query answers ERROR.
    pub timeout_ms: Option<u64>,
}

/// Decision procedure backed by Z3.
#[derive(Debug, Default)]
pub struct Z3Procedure {
    config: Z3Config,
    constraints: Vec<(Expr, bool)>,
    last_error: Option<SolverError>,
}

impl Z3Procedure {
    pub fn new(config: Z3Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn last_error(&self) -> Option<&SolverError> {
        self.last_error.as_ref()
    }

    fn solve(&self) -> SolverResult<bool> {
        let solver = Solver::new();
        if let Some(ms) = self.config.timeout_ms {
            let mut params = Params::new();
            params.set_u32("timeout", u32::try_from(ms).unwrap_or(u32::MAX));
            solver.set_params(&params);
        }

        let mut encoder = Encoder::default();
        for (expr, value) in &self.constraints {
            let b = encoder.encode_bool(expr)?;
            if *value {
                solver.assert(&b);
            } else {
                solver.assert(&b.not());
            }
        }

        match solver.check() {
            SatResult::Sat => Ok(true),
            SatResult::Unsat => Ok(false),
            SatResult::Unknown => Err(SolverError::Unknown(
                "timeout or incomplete theory".into(),
            )),
        }
    }
}

impl DecisionProcedure for Z3Procedure {
    fn set_to(&mut self, expr: &Expr, value: bool) {
        self.constraints.push((expr.clone(), value));
    }

    fn dec_solve(&mut self) -> DecisionResult {
        self.last_error = None;
        let result = match self.solve() {
            Ok(true) => DecisionResult::Satisfiable,
            Ok(false) => DecisionResult::Unsatisfiable,
            Err(e) => {
                warn!(error = %e, "z3 query failed");
                self.last_error = Some(e);
                DecisionResult::Error
            }
        };
        debug!(constraints = self.constraints.len(), ?result, "z3 query");
        result
    }

    fn decision_procedure_text(&self) -> &'static str {
        "Z3"
    }
}

/// Translates expressions to Z3 terms.
#[derive(Default)]
struct Encoder {
    symbols: BTreeMap<String, Dynamic>,
    addresses: BTreeMap<Expr, i64>,
}

impl Encoder {
    fn encode_bool(&mut self, expr: &Expr) -> SolverResult<Bool> {
        let dyn_val = self.encode(expr)?;
        dyn_val
            .as_bool()
            .ok_or_else(|| SolverError::Type(format!("expected boolean expression, got {}", expr)))
    }

    fn encode_int(&mut self, expr: &Expr) -> SolverResult<Int> {
        let dyn_val = self.encode(expr)?;
        dyn_val
            .as_int()
            .ok_or_else(|| SolverError::Type(format!("expected integer expression, got {}", expr)))
    }

    fn address_id(&mut self, object: &Expr) -> i64 {
        let next = self.addresses.len() as i64 + 1;
        *self.addresses.entry(object.clone()).or_insert(next)
    }

    fn encode(&mut self, expr: &Expr) -> SolverResult<Dynamic> {
        match expr {
            Expr::Bool { value } => Ok(Dynamic::from_ast(&Bool::from_bool(*value))),
            Expr::Int { value } => Ok(Dynamic::from_ast(&Int::from_i64(*value))),
            Expr::Symbol { name, ty } => self.encode_symbol(name, ty),
            Expr::Null { .. } => Ok(Dynamic::from_ast(&Int::from_i64(0))),
            Expr::AddressOf { object } if object.is_object_path() => {
                let id = self.address_id(object);
                Ok(Dynamic::from_ast(&Int::from_i64(id)))
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    let v = self.encode_bool(operand)?;
                    Ok(Dynamic::from_ast(&v.not()))
                }
                UnaryOp::Neg => {
                    let v = self.encode_int(operand)?;
                    Ok(Dynamic::from_ast(&v.unary_minus()))
                }
            },
            Expr::Binary { op, left, right } => self.encode_binary(*op, left, right),
            Expr::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.encode_bool(cond)?;
                let t = self.encode(then_branch)?;
                let e = self.encode(else_branch)?;
                if let (Some(ti), Some(ei)) = (t.as_int(), e.as_int()) {
                    Ok(Dynamic::from_ast(&c.ite(&ti, &ei)))
                } else if let (Some(tb), Some(eb)) = (t.as_bool(), e.as_bool()) {
                    Ok(Dynamic::from_ast(&c.ite(&tb, &eb)))
                } else {
                    Err(SolverError::Type(
                        "if-then-else branches have incompatible types".into(),
                    ))
                }
            }
            _ => Err(SolverError::Unsupported(expr.to_string())),
        }
    }

    fn encode_symbol(&mut self, name: &str, ty: &Type) -> SolverResult<Dynamic> {
        if let Some(v) = self.symbols.get(name) {
            return Ok(v.clone());
        }
        let v = match ty {
            Type::Bool => Dynamic::from_ast(&Bool::new_const(name)),
            Type::Int | Type::Pointer { .. } => Dynamic::from_ast(&Int::new_const(name)),
            other => {
                return Err(SolverError::Unsupported(format!(
                    "symbol {} of type {}",
                    name, other
                )))
            }
        };
        self.symbols.insert(name.to_string(), v.clone());
        Ok(v)
    }

    fn encode_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> SolverResult<Dynamic> {
        match op {
            BinOp::And => {
                let l = self.encode_bool(left)?;
                let r = self.encode_bool(right)?;
                Ok(Dynamic::from_ast(&Bool::and(&[l, r])))
            }
            BinOp::Or => {
                let l = self.encode_bool(left)?;
                let r = self.encode_bool(right)?;
                Ok(Dynamic::from_ast(&Bool::or(&[l, r])))
            }
            BinOp::Implies => {
                let l = self.encode_bool(left)?;
                let r = self.encode_bool(right)?;
                Ok(Dynamic::from_ast(&l.implies(&r)))
            }
            BinOp::Eq => Ok(Dynamic::from_ast(&self.encode_eq(left, right)?)),
            BinOp::Ne => Ok(Dynamic::from_ast(&self.encode_eq(left, right)?.not())),
            BinOp::Lt => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&l.lt(&r)))
            }
            BinOp::Le => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&l.le(&r)))
            }
            BinOp::Gt => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&l.gt(&r)))
            }
            BinOp::Ge => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&l.ge(&r)))
            }
            BinOp::Add => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&Int::add(&[l, r])))
            }
            BinOp::Sub => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&Int::sub(&[l, r])))
            }
            BinOp::Mul => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&Int::mul(&[l, r])))
            }
            BinOp::Div => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&l.div(&r)))
            }
            BinOp::Mod => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(Dynamic::from_ast(&l.modulo(&r)))
            }
        }
    }

    fn encode_eq(&mut self, left: &Expr, right: &Expr) -> SolverResult<Bool> {
        // aggregates compare component-wise
        match (left, right) {
            (Expr::StructLit { fields: lf }, Expr::StructLit { fields: rf }) => {
                let mut conjuncts = Vec::with_capacity(lf.len());
                for ((ln, le), (rn, re)) in lf.iter().zip(rf) {
                    if ln != rn {
                        return Err(SolverError::Type(format!(
                            "field {} compared with field {}",
                            ln, rn
                        )));
                    }
                    conjuncts.push(self.encode_eq(le, re)?);
                }
                return Ok(Bool::and(&conjuncts));
            }
            (Expr::ArrayLit { elements: le, .. }, Expr::ArrayLit { elements: re, .. }) => {
                if le.len() != re.len() {
                    return Ok(Bool::from_bool(false));
                }
                let mut conjuncts = Vec::with_capacity(le.len());
                for (l, r) in le.iter().zip(re) {
                    conjuncts.push(self.encode_eq(l, r)?);
                }
                return Ok(Bool::and(&conjuncts));
            }
            _ => {}
        }

        let l = self.encode(left)?;
        let r = self.encode(right)?;
        if let (Some(li), Some(ri)) = (l.as_int(), r.as_int()) {
            Ok(li.eq(&ri))
        } else if let (Some(lb), Some(rb)) = (l.as_bool(), r.as_bool()) {
            Ok(lb.eq(&rb))
        } else {
            Err(SolverError::Type(
                "equality between incompatible types".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(name: &str) -> Expr {
        Expr::symbol(name, Type::Int)
    }

    #[test]
    fn test_unbounded_integers() {
        let x = int("x#0");
        let mut dp = Z3Procedure::default();
        dp.set_to_true(&Expr::binary(BinOp::Gt, x.clone(), Expr::int(1_000_000)));
        assert_eq!(dp.dec_solve(), DecisionResult::Satisfiable);

        dp.set_to_false(&Expr::binary(BinOp::Gt, x, Expr::int(5)));
        assert_eq!(dp.dec_solve(), DecisionResult::Unsatisfiable);
    }

    #[test]
    fn test_address_constants_are_distinct() {
        let x = Expr::symbol("x", Type::Int);
        let y = Expr::symbol("y", Type::Int);
        let mut dp = Z3Procedure::default();
        dp.set_to_true(&Expr::eq(Expr::address_of(x), Expr::address_of(y)));
        assert_eq!(dp.dec_solve(), DecisionResult::Unsatisfiable);
    }

    #[test]
    fn test_unsupported_construct() {
        let mut dp = Z3Procedure::new(Z3Config {
            timeout_ms: Some(1_000),
        });
        dp.set_to_true(&Expr::deref(Expr::symbol("p#0", Type::pointer(Type::Bool))));
        assert_eq!(dp.dec_solve(), DecisionResult::Error);
        assert!(matches!(dp.last_error(), Some(SolverError::Unsupported(_))));
    }
}
