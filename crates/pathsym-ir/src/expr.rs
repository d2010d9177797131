//! Expressions and types of the analyzed program.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest number of scalar components a loaded type may have.
pub const MAX_COMPONENTS: u64 = 1 << 16;

/// Types of program variables and expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Type {
    Bool,
    Int,
    Pointer {
        target: Box<Type>,
    },
    /// Arrays without a size are modeled abstractly through their index set.
    Array {
        element: Box<Type>,
        #[serde(default)]
        size: Option<u64>,
    },
    Struct {
        fields: Vec<Field>,
    },
    /// The type of nil and of statements.
    Empty,
}

/// A named struct component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Type {
    pub fn pointer(target: Type) -> Self {
        Type::Pointer {
            target: Box::new(target),
        }
    }

    pub fn array(element: Type, size: Option<u64>) -> Self {
        Type::Array {
            element: Box::new(element),
            size,
        }
    }

    /// Look up the type of a struct component.
    pub fn field(&self, name: &str) -> Option<&Type> {
        match self {
            Type::Struct { fields } => fields.iter().find(|f| f.name == name).map(|f| &f.ty),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct { .. } | Type::Array { .. })
    }

    /// Number of scalar components a value of this type is split into, or
    /// `None` on overflow. Unbounded arrays count as one.
    pub fn components(&self) -> Option<u64> {
        match self {
            Type::Struct { fields } => fields
                .iter()
                .try_fold(0u64, |total, f| total.checked_add(f.ty.components()?)),
            Type::Array {
                element,
                size: Some(n),
            } => element.components()?.checked_mul(*n),
            _ => Some(1),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Pointer { target } => write!(f, "{}*", target),
            Type::Array {
                element,
                size: Some(n),
            } => write!(f, "{}[{}]", element, n),
            Type::Array {
                element,
                size: None,
            } => write!(f, "{}[]", element),
            Type::Struct { fields } => {
                write!(f, "struct {{")?;
                for field in fields {
                    write!(f, " {} {};", field.ty, field.name)?;
                }
                write!(f, " }}")
            }
            Type::Empty => write!(f, "empty"),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinOp {
    And,
    Or,
    Implies,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// Whether the operator yields a boolean.
    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Implies => "==>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A program expression.
///
/// The same type is used before and after symbolic reading: after `read`,
/// symbols name SSA versions (`x#3`) instead of program variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    /// Absence of an expression (e.g. an unset value).
    Nil,
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Symbol {
        name: String,
        ty: Type,
    },
    /// The null pointer of the given pointer type.
    Null {
        ty: Type,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ite {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
    },
    Deref {
        pointer: Box<Expr>,
    },
    AddressOf {
        object: Box<Expr>,
    },
    StructLit {
        fields: Vec<(String, Expr)>,
    },
    ArrayLit {
        element: Type,
        elements: Vec<Expr>,
    },
}

impl Expr {
    pub fn bool(value: bool) -> Self {
        Expr::Bool { value }
    }

    pub fn int(value: i64) -> Self {
        Expr::Int { value }
    }

    pub fn symbol(name: impl Into<String>, ty: Type) -> Self {
        Expr::Symbol {
            name: name.into(),
            ty,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Expr::unary(UnaryOp::Not, operand)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(BinOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(BinOp::Or, left, right)
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::binary(BinOp::Eq, left, right)
    }

    pub fn ite(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::Ite {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    pub fn index(array: Expr, index: Expr) -> Self {
        Expr::Index {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    pub fn member(base: Expr, field: impl Into<String>) -> Self {
        Expr::Member {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn deref(pointer: Expr) -> Self {
        Expr::Deref {
            pointer: Box::new(pointer),
        }
    }

    pub fn address_of(object: Expr) -> Self {
        Expr::AddressOf {
            object: Box::new(object),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Expr::Nil)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Bool { value: true })
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Bool { value: false })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int { value } => Some(*value),
            _ => None,
        }
    }

    /// Whether this expression denotes the address of a fixed object,
    /// i.e. `&` applied to a chain of members and constant indices of a symbol.
    pub fn is_address_constant(&self) -> bool {
        match self {
            Expr::Null { .. } => true,
            Expr::AddressOf { object } => object.is_object_path(),
            _ => false,
        }
    }

    /// A symbol, optionally followed by members and constant indices.
    pub fn is_object_path(&self) -> bool {
        match self {
            Expr::Symbol { .. } => true,
            Expr::Member { base, .. } => base.is_object_path(),
            Expr::Index { array, index } => index.as_int().is_some() && array.is_object_path(),
            _ => false,
        }
    }

    /// Constants may be propagated in place of SSA symbols.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Bool { .. } | Expr::Int { .. } => true,
            Expr::Null { .. } | Expr::AddressOf { .. } => self.is_address_constant(),
            Expr::StructLit { fields } => fields.iter().all(|(_, e)| e.is_constant()),
            Expr::ArrayLit { elements, .. } => elements.iter().all(Expr::is_constant),
            _ => false,
        }
    }

    /// The type of this expression.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Nil => Type::Empty,
            Expr::Bool { .. } => Type::Bool,
            Expr::Int { .. } => Type::Int,
            Expr::Symbol { ty, .. } | Expr::Null { ty } => ty.clone(),
            Expr::Unary { op, .. } => match op {
                UnaryOp::Not => Type::Bool,
                UnaryOp::Neg => Type::Int,
            },
            Expr::Binary { op, .. } => {
                if op.is_predicate() {
                    Type::Bool
                } else {
                    Type::Int
                }
            }
            Expr::Ite { then_branch, .. } => then_branch.ty(),
            Expr::Index { array, .. } => match array.ty() {
                Type::Array { element, .. } => *element,
                _ => Type::Empty,
            },
            Expr::Member { base, field } => base.ty().field(field).cloned().unwrap_or(Type::Empty),
            Expr::Deref { pointer } => match pointer.ty() {
                Type::Pointer { target } => *target,
                _ => Type::Empty,
            },
            Expr::AddressOf { object } => Type::pointer(object.ty()),
            Expr::StructLit { fields } => Type::Struct {
                fields: fields
                    .iter()
                    .map(|(name, e)| Field {
                        name: name.clone(),
                        ty: e.ty(),
                    })
                    .collect(),
            },
            Expr::ArrayLit { element, elements } => {
                Type::array(element.clone(), Some(elements.len() as u64))
            }
        }
    }

    /// Visit every sub-expression, parents before children.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Nil
            | Expr::Bool { .. }
            | Expr::Int { .. }
            | Expr::Symbol { .. }
            | Expr::Null { .. } => {}
            Expr::Unary { operand, .. } => operand.visit(f),
            Expr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.visit(f);
                then_branch.visit(f);
                else_branch.visit(f);
            }
            Expr::Index { array, index } => {
                array.visit(f);
                index.visit(f);
            }
            Expr::Member { base, .. } => base.visit(f),
            Expr::Deref { pointer } => pointer.visit(f),
            Expr::AddressOf { object } => object.visit(f),
            Expr::StructLit { fields } => fields.iter().for_each(|(_, e)| e.visit(f)),
            Expr::ArrayLit { elements, .. } => elements.iter().for_each(|e| e.visit(f)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Nil => write!(f, "nil"),
            Expr::Bool { value } => write!(f, "{}", value),
            Expr::Int { value } => write!(f, "{}", value),
            Expr::Symbol { name, .. } => write!(f, "{}", name),
            Expr::Null { .. } => write!(f, "NULL"),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Neg => write!(f, "-{}", operand),
            },
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Ite {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "({} ? {} : {})", cond, then_branch, else_branch),
            Expr::Index { array, index } => write!(f, "{}[{}]", array, index),
            Expr::Member { base, field } => write!(f, "{}.{}", base, field),
            Expr::Deref { pointer } => write!(f, "*{}", pointer),
            Expr::AddressOf { object } => write!(f, "&{}", object),
            Expr::StructLit { fields } => {
                write!(f, "{{")?;
                for (i, (name, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " .{} = {}", name, e)?;
                }
                write!(f, " }}")
            }
            Expr::ArrayLit { elements, .. } => {
                write!(f, "{{")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}", e)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Type {
        Type::Struct {
            fields: vec![
                Field {
                    name: "x".into(),
                    ty: Type::Int,
                },
                Field {
                    name: "y".into(),
                    ty: Type::Bool,
                },
            ],
        }
    }

    #[test]
    fn test_member_and_index_types() {
        let p = Expr::symbol("p", point());
        assert_eq!(Expr::member(p.clone(), "y").ty(), Type::Bool);
        assert_eq!(Expr::member(p, "z").ty(), Type::Empty);

        let a = Expr::symbol("a", Type::array(Type::Int, Some(4)));
        assert_eq!(Expr::index(a, Expr::int(1)).ty(), Type::Int);
    }

    #[test]
    fn test_address_constants() {
        let x = Expr::symbol("x", Type::Int);
        let a = Expr::symbol("a", Type::array(Type::Int, None));
        let i = Expr::symbol("i", Type::Int);

        assert!(Expr::address_of(x.clone()).is_constant());
        assert!(Expr::address_of(Expr::index(a.clone(), Expr::int(2))).is_constant());
        assert!(!Expr::address_of(Expr::index(a, i)).is_constant());
        assert!(!x.is_constant());
    }

    #[test]
    fn test_display() {
        let x = Expr::symbol("x", Type::Int);
        let e = Expr::ite(
            Expr::binary(BinOp::Lt, x.clone(), Expr::int(3)),
            Expr::deref(Expr::address_of(x)),
            Expr::int(0),
        );
        assert_eq!(e.to_string(), "((x < 3) ? *&x : 0)");
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{"kind":"Binary","op":"Eq","left":{"kind":"Symbol","name":"x","ty":{"kind":"Int"}},"right":{"kind":"Int","value":1}}"#;
        let e: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(e, Expr::eq(Expr::symbol("x", Type::Int), Expr::int(1)));
    }
}
