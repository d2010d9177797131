//! Resolution of pointer dereferences to candidate objects.

use pathsym_ir::Expr;
use std::fmt;

/// A points-to oracle consulted when reading `*p`.
///
/// `pointer` is the value of `p` as read with constant propagation. The
/// result lists the program objects (a symbol, possibly followed by members
/// and constant indices) that `p` may point to. An empty result means the
/// dereference has no valid target.
pub trait PointsTo: fmt::Debug + Send + Sync {
    fn resolve(&self, pointer: &Expr, propagate: bool) -> Vec<Expr>;
}

/// Resolves pointers whose propagated value spells out their targets:
/// `&obj`, and conditionals over such values.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntacticPointsTo;

impl SyntacticPointsTo {
    fn collect(pointer: &Expr, out: &mut Vec<Expr>) {
        match pointer {
            Expr::AddressOf { object } if object.is_object_path() => {
                if !out.contains(object) {
                    out.push((**object).clone());
                }
            }
            Expr::Ite {
                then_branch,
                else_branch,
                ..
            } => {
                Self::collect(then_branch, out);
                Self::collect(else_branch, out);
            }
            _ => {}
        }
    }
}

impl PointsTo for SyntacticPointsTo {
    fn resolve(&self, pointer: &Expr, _propagate: bool) -> Vec<Expr> {
        let mut objects = Vec::new();
        Self::collect(pointer, &mut objects);
        objects
    }
}

/// Whether `value` may be propagated in place of a pointer's SSA symbol:
/// an address constant, or a conditional choosing between such values.
pub(crate) fn is_pointer_value(value: &Expr) -> bool {
    match value {
        Expr::Ite {
            then_branch,
            else_branch,
            ..
        } => is_pointer_value(then_branch) && is_pointer_value(else_branch),
        _ => value.is_address_constant(),
    }
}
