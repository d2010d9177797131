//! Constant folding checked against a direct evaluator on generated trees.

use pathsym_ir::{simplify, BinOp, Expr, Type};
use proptest::prelude::*;

fn int_tree() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-20i64..20).prop_map(Expr::int),
        Just(Expr::symbol("x", Type::Int)),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        (
            prop_oneof![Just(BinOp::Add), Just(BinOp::Sub), Just(BinOp::Mul)],
            inner.clone(),
            inner,
        )
            .prop_map(|(op, l, r)| Expr::binary(op, l, r))
    })
}

/// Value of `e` with `x` bound to `x`.
fn eval(e: &Expr, x: i64) -> i64 {
    match e {
        Expr::Int { value } => *value,
        Expr::Symbol { .. } => x,
        Expr::Binary { op, left, right } => {
            let (l, r) = (eval(left, x), eval(right, x));
            match op {
                BinOp::Add => l.wrapping_add(r),
                BinOp::Sub => l.wrapping_sub(r),
                BinOp::Mul => l.wrapping_mul(r),
                other => panic!("unexpected operator {:?}", other),
            }
        }
        other => panic!("unexpected expression {}", other),
    }
}

fn substitute(e: &Expr, x: i64) -> Expr {
    match e {
        Expr::Symbol { .. } => Expr::int(x),
        Expr::Binary { op, left, right } => {
            Expr::binary(*op, substitute(left, x), substitute(right, x))
        }
        other => other.clone(),
    }
}

proptest! {
    #[test]
    fn closed_terms_fold_to_their_value(e in int_tree(), x in -5i64..5) {
        let closed = substitute(&e, x);
        prop_assert_eq!(simplify(closed), Expr::int(eval(&e, x)));
    }

    #[test]
    fn simplification_preserves_value(e in int_tree(), x in -5i64..5) {
        let simplified = simplify(e.clone());
        prop_assert_eq!(eval(&simplified, x), eval(&e, x));
    }

    #[test]
    fn simplification_is_idempotent(e in int_tree()) {
        let once = simplify(e);
        prop_assert_eq!(simplify(once.clone()), once);
    }

    #[test]
    fn comparisons_of_constants_fold(a in -50i64..50, b in -50i64..50) {
        let lt = Expr::binary(BinOp::Lt, Expr::int(a), Expr::int(b));
        prop_assert_eq!(simplify(lt), Expr::bool(a < b));
        let ne = Expr::binary(BinOp::Ne, Expr::int(a), Expr::int(b));
        prop_assert_eq!(simplify(ne), Expr::bool(a != b));
    }
}

#[test]
fn symbolic_identities() {
    let x = Expr::symbol("x", Type::Int);
    let e = Expr::binary(
        BinOp::Mul,
        Expr::int(1),
        Expr::binary(BinOp::Add, x.clone(), Expr::int(0)),
    );
    assert_eq!(simplify(e), x);
}
