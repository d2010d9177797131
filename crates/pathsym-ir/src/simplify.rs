//! A small bottom-up constant folder.
//!
//! Only rewrites that are valid regardless of the values of free symbols are
//! applied. Its main job is to let symbolic reading recognize guards that
//! became trivially true after constant propagation.

use crate::expr::{BinOp, Expr, UnaryOp};

/// Simplify an expression.
pub fn simplify(expr: Expr) -> Expr {
    match expr {
        Expr::Unary { op, operand } => simplify_unary(op, simplify(*operand)),
        Expr::Binary { op, left, right } => simplify_binary(op, simplify(*left), simplify(*right)),
        Expr::Ite {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = simplify(*cond);
            let then_branch = simplify(*then_branch);
            let else_branch = simplify(*else_branch);
            match cond {
                Expr::Bool { value: true } => then_branch,
                Expr::Bool { value: false } => else_branch,
                _ if then_branch == else_branch => then_branch,
                cond => Expr::ite(cond, then_branch, else_branch),
            }
        }
        Expr::Index { array, index } => {
            let array = simplify(*array);
            let index = simplify(*index);
            if let (Expr::ArrayLit { elements, .. }, Some(i)) = (&array, index.as_int()) {
                if let Some(e) = usize::try_from(i).ok().and_then(|i| elements.get(i)) {
                    return e.clone();
                }
            }
            Expr::index(array, index)
        }
        Expr::Member { base, field } => {
            let base = simplify(*base);
            if let Expr::StructLit { fields } = &base {
                if let Some((_, e)) = fields.iter().find(|(name, _)| *name == field) {
                    return e.clone();
                }
            }
            Expr::member(base, field)
        }
        Expr::Deref { pointer } => match simplify(*pointer) {
            Expr::AddressOf { object } => *object,
            pointer => Expr::deref(pointer),
        },
        Expr::AddressOf { object } => match simplify(*object) {
            Expr::Deref { pointer } => *pointer,
            object => Expr::address_of(object),
        },
        Expr::StructLit { fields } => Expr::StructLit {
            fields: fields
                .into_iter()
                .map(|(name, e)| (name, simplify(e)))
                .collect(),
        },
        Expr::ArrayLit { element, elements } => Expr::ArrayLit {
            element,
            elements: elements.into_iter().map(simplify).collect(),
        },
        leaf => leaf,
    }
}

fn simplify_unary(op: UnaryOp, operand: Expr) -> Expr {
    match (op, operand) {
        (UnaryOp::Not, Expr::Bool { value }) => Expr::bool(!value),
        (
            UnaryOp::Not,
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            },
        ) => *operand,
        (UnaryOp::Neg, Expr::Int { value }) => Expr::int(value.wrapping_neg()),
        (op, operand) => Expr::unary(op, operand),
    }
}

fn simplify_binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    match op {
        BinOp::And => match (&left, &right) {
            (Expr::Bool { value: false }, _) | (_, Expr::Bool { value: false }) => {
                Expr::bool(false)
            }
            (Expr::Bool { value: true }, _) => right,
            (_, Expr::Bool { value: true }) => left,
            _ if left == right => left,
            _ => Expr::binary(op, left, right),
        },
        BinOp::Or => match (&left, &right) {
            (Expr::Bool { value: true }, _) | (_, Expr::Bool { value: true }) => Expr::bool(true),
            (Expr::Bool { value: false }, _) => right,
            (_, Expr::Bool { value: false }) => left,
            _ if left == right => left,
            _ => Expr::binary(op, left, right),
        },
        BinOp::Implies => match (&left, &right) {
            (Expr::Bool { value: false }, _) | (_, Expr::Bool { value: true }) => Expr::bool(true),
            (Expr::Bool { value: true }, _) => right,
            _ if left == right => Expr::bool(true),
            _ => Expr::binary(op, left, right),
        },
        BinOp::Eq | BinOp::Ne => {
            let equal = match (&left, &right) {
                _ if left == right => Some(true),
                (Expr::Bool { value: a }, Expr::Bool { value: b }) => Some(a == b),
                (Expr::Int { value: a }, Expr::Int { value: b }) => Some(a == b),
                // distinct objects have distinct addresses
                _ if left.is_address_constant() && right.is_address_constant() => Some(false),
                _ => None,
            };
            match equal {
                Some(eq) => Expr::bool(if op == BinOp::Eq { eq } else { !eq }),
                None => Expr::binary(op, left, right),
            }
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => Expr::bool(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            }),
            _ => Expr::binary(op, left, right),
        },
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
                let folded = match op {
                    BinOp::Add => Some(a.wrapping_add(b)),
                    BinOp::Sub => Some(a.wrapping_sub(b)),
                    BinOp::Mul => Some(a.wrapping_mul(b)),
                    BinOp::Div => a.checked_div(b),
                    _ => a.checked_rem(b),
                };
                if let Some(n) = folded {
                    return Expr::int(n);
                }
            }
            match (op, left.as_int(), right.as_int()) {
                (BinOp::Add, _, Some(0)) | (BinOp::Sub, _, Some(0)) | (BinOp::Mul, _, Some(1)) => {
                    left
                }
                (BinOp::Add, Some(0), _) | (BinOp::Mul, Some(1), _) => right,
                _ => Expr::binary(op, left, right),
            }
        }
    }
}
