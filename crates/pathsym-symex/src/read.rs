//! Symbolic reading: rewriting program expressions over the current state.
//!
//! Reading replaces every variable component by its current SSA symbol, or
//! by its known value when propagation is requested. Aggregates are expanded
//! into literals of their components, pointer dereferences are resolved
//! through the points-to oracle, and symbolic array indices are turned into
//! conditional selections.

use crate::state::PathSymexState;
use crate::thread::IndexSet;
use crate::{SymexError, SymexResult};
use pathsym_ir::{simplify, Expr, Type};
use tracing::{trace, warn};

/// Split an lvalue into its program variable and component suffix.
///
/// Indices need not be constant: `a[i#1]` names the component of `a` at the
/// symbolic index `i#1`.
pub(crate) fn object_path(expr: &Expr) -> Option<(String, String)> {
    match expr {
        Expr::Symbol { name, .. } => Some((name.clone(), String::new())),
        Expr::Member { base, field } => {
            let (symbol, mut suffix) = object_path(base)?;
            suffix.push('.');
            suffix.push_str(field);
            Some((symbol, suffix))
        }
        Expr::Index { array, index } => {
            let (symbol, mut suffix) = object_path(array)?;
            suffix.push_str(&PathSymexState::array_index_as_string(index));
            Some((symbol, suffix))
        }
        _ => None,
    }
}

/// Rebuild `expr` with `f` applied to each direct child.
fn map_children(
    expr: &Expr,
    mut f: impl FnMut(&Expr) -> SymexResult<Expr>,
) -> SymexResult<Expr> {
    Ok(match expr {
        Expr::Nil
        | Expr::Bool { .. }
        | Expr::Int { .. }
        | Expr::Symbol { .. }
        | Expr::Null { .. } => expr.clone(),
        Expr::Unary { op, operand } => Expr::unary(*op, f(operand)?),
        Expr::Binary { op, left, right } => Expr::binary(*op, f(left)?, f(right)?),
        Expr::Ite {
            cond,
            then_branch,
            else_branch,
        } => Expr::ite(f(cond)?, f(then_branch)?, f(else_branch)?),
        Expr::Index { array, index } => Expr::index(f(array)?, f(index)?),
        Expr::Member { base, field } => Expr::member(f(base)?, field.clone()),
        Expr::Deref { pointer } => Expr::deref(f(pointer)?),
        Expr::AddressOf { object } => Expr::address_of(f(object)?),
        Expr::StructLit { fields } => Expr::StructLit {
            fields: fields
                .iter()
                .map(|(name, e)| Ok((name.clone(), f(e)?)))
                .collect::<SymexResult<_>>()?,
        },
        Expr::ArrayLit { element, elements } => Expr::ArrayLit {
            element: element.clone(),
            elements: elements.iter().map(&mut f).collect::<SymexResult<_>>()?,
        },
    })
}

/// Select `index` from an already-read array value.
fn select(array: Expr, index: Expr) -> Expr {
    match (&array, index.as_int()) {
        (Expr::ArrayLit { elements, .. }, None) if !elements.is_empty() => {
            let mut elements = elements.clone();
            let mut result = elements.pop().unwrap_or(Expr::Nil);
            for (i, e) in elements.into_iter().enumerate().rev() {
                result = Expr::ite(Expr::eq(index.clone(), Expr::int(i as i64)), e, result);
            }
            result
        }
        _ => Expr::index(array, index),
    }
}

impl PathSymexState {
    /// Read `expr` in the current state, propagating known values.
    pub fn read(&mut self, expr: &Expr) -> SymexResult<Expr> {
        self.read_with(expr, true)
    }

    /// Read `expr` in the current state using SSA symbols only.
    pub fn read_no_propagate(&mut self, expr: &Expr) -> SymexResult<Expr> {
        self.read_with(expr, false)
    }

    fn read_with(&mut self, expr: &Expr, propagate: bool) -> SymexResult<Expr> {
        let instantiated = self.instantiate_rec(expr, propagate)?;
        Ok(simplify(instantiated))
    }

    /// Component suffix for an array index: `[3]` for constants, the index
    /// expression itself otherwise.
    pub fn array_index_as_string(index: &Expr) -> String {
        match index.as_int() {
            Some(i) => format!("[{}]", i),
            None => format!("[{}]", index),
        }
    }

    fn instantiate_rec(&mut self, expr: &Expr, propagate: bool) -> SymexResult<Expr> {
        match expr {
            Expr::Symbol { .. } | Expr::Member { .. } if expr.is_object_path() => {
                self.read_symbol_member_index(expr, propagate)
            }
            Expr::Index { array, index } => self.read_index(array, index, propagate),
            Expr::Deref { pointer } => self.dereference_rec(pointer, propagate),
            Expr::AddressOf { object } => self.instantiate_rec_address(object, propagate),
            _ => map_children(expr, |child| self.instantiate_rec(child, propagate)),
        }
    }

    fn read_index(&mut self, array: &Expr, index: &Expr, propagate: bool) -> SymexResult<Expr> {
        // component names depend on the index value
        let index = self.read_with(index, true)?;

        if !array.is_object_path() {
            let array = self.instantiate_rec(array, propagate)?;
            return Ok(select(array, index));
        }

        let array_ty = array.ty();
        if let Type::Array { size: None, .. } = array_ty {
            self.index_set_mut(array)?.record_read(index.clone());
            return self.array_theory(array, &array_ty, index, propagate);
        }

        if index.as_int().is_some() {
            self.read_symbol_member_index(&Expr::index(array.clone(), index), propagate)
        } else {
            self.array_theory(array, &array_ty, index, propagate)
        }
    }

    /// Read `array[index]` for a symbolic index, or for any index of an
    /// unbounded array.
    fn array_theory(
        &mut self,
        array: &Expr,
        array_ty: &Type,
        index: Expr,
        propagate: bool,
    ) -> SymexResult<Expr> {
        match array_ty {
            Type::Array {
                size: Some(size), ..
            } if *size > 0 => {
                let last = *size as i64 - 1;
                let mut result = self.read_symbol_member_index(
                    &Expr::index(array.clone(), Expr::int(last)),
                    propagate,
                )?;
                for i in (0..last).rev() {
                    let element =
                        self.read_symbol_member_index(&Expr::index(array.clone(), Expr::int(i)), propagate)?;
                    result = Expr::ite(Expr::eq(index.clone(), Expr::int(i)), element, result);
                }
                Ok(result)
            }
            _ => {
                // unbounded: the newest recorded index that aliases `index`
                // wins, so the fold runs oldest first
                let indices: Vec<Expr> = self.index_set_mut(array)?.iter().cloned().collect();
                let mut result = self
                    .read_symbol_member_index(&Expr::index(array.clone(), index.clone()), propagate)?;
                for j in indices {
                    let element =
                        self.read_symbol_member_index(&Expr::index(array.clone(), j.clone()), propagate)?;
                    result = if j == index {
                        element
                    } else {
                        Expr::ite(Expr::eq(index.clone(), j), element, result)
                    };
                }
                Ok(result)
            }
        }
    }

    fn index_set_mut(&mut self, array: &Expr) -> SymexResult<&mut IndexSet> {
        let (symbol, suffix) = object_path(array).ok_or_else(|| SymexError::UnsupportedLhs {
            lhs: array.clone(),
        })?;
        let info = self.var_map.get(&symbol, &suffix, &array.ty())?;
        Ok(&mut self.get_var_state(&info).index_set)
    }

    /// Read an object path, expanding aggregates into literals.
    fn read_symbol_member_index(&mut self, path: &Expr, propagate: bool) -> SymexResult<Expr> {
        let ty = path.ty();
        if matches!(ty, Type::Struct { .. } | Type::Array { size: Some(_), .. }) {
            return self.expand_structs_and_arrays(path, &ty, propagate);
        }

        let Some((symbol, suffix)) = object_path(path) else {
            return map_children(path, |child| self.instantiate_rec(child, propagate));
        };
        let info = self.var_map.get(&symbol, &suffix, &ty)?;
        let var_state = self.get_var_state(&info);

        if propagate && !var_state.value.is_nil() {
            return Ok(var_state.value.clone());
        }
        if var_state.ssa_symbol.is_nil() {
            var_state.ssa_symbol = info.ssa_symbol();
        }
        Ok(var_state.ssa_symbol.clone())
    }

    fn expand_structs_and_arrays(
        &mut self,
        path: &Expr,
        ty: &Type,
        propagate: bool,
    ) -> SymexResult<Expr> {
        match ty {
            Type::Struct { fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    let member = Expr::member(path.clone(), &field.name);
                    values.push((field.name.clone(), self.read_symbol_member_index(&member, propagate)?));
                }
                Ok(Expr::StructLit { fields: values })
            }
            Type::Array {
                element,
                size: Some(size),
            } => {
                let mut elements = Vec::with_capacity(*size as usize);
                for i in 0..*size as i64 {
                    let component = Expr::index(path.clone(), Expr::int(i));
                    elements.push(self.read_symbol_member_index(&component, propagate)?);
                }
                Ok(Expr::ArrayLit {
                    element: (**element).clone(),
                    elements,
                })
            }
            _ => self.read_symbol_member_index(path, propagate),
        }
    }

    fn dereference_rec(&mut self, pointer: &Expr, propagate: bool) -> SymexResult<Expr> {
        let target_ty = match pointer.ty() {
            Type::Pointer { target } => *target,
            _ => Type::Empty,
        };

        let ssa_pointer = self.read_with(pointer, propagate)?;
        let hint = if propagate {
            ssa_pointer.clone()
        } else {
            self.read_with(pointer, true)?
        };

        let candidates = self.points_to.resolve(&hint, propagate);
        trace!(pointer = %ssa_pointer, candidates = candidates.len(), "dereference");
        match candidates.as_slice() {
            [] => {
                warn!(pointer = %ssa_pointer, "dereference without a valid target");
                Ok(Expr::symbol(format!("deref_failed({})", ssa_pointer), target_ty))
            }
            [object] => self.instantiate_rec(object, propagate),
            [init @ .., last] => {
                let mut result = self.instantiate_rec(last, propagate)?;
                for object in init.iter().rev() {
                    let value = self.instantiate_rec(object, propagate)?;
                    let cond = Expr::eq(ssa_pointer.clone(), Expr::address_of(object.clone()));
                    result = Expr::ite(cond, value, result);
                }
                Ok(result)
            }
        }
    }

    /// Read `&object`: the object itself is kept, its indices are read.
    fn instantiate_rec_address(&mut self, object: &Expr, propagate: bool) -> SymexResult<Expr> {
        match object {
            Expr::Deref { pointer } => self.read_with(pointer, propagate),
            _ => Ok(Expr::address_of(self.address_rec(object, propagate)?)),
        }
    }

    fn address_rec(&mut self, object: &Expr, propagate: bool) -> SymexResult<Expr> {
        match object {
            Expr::Symbol { .. } => Ok(object.clone()),
            Expr::Member { base, field } => {
                Ok(Expr::member(self.address_rec(base, propagate)?, field.clone()))
            }
            Expr::Index { array, index } => {
                let array = self.address_rec(array, propagate)?;
                Ok(Expr::index(array, self.read_with(index, true)?))
            }
            Expr::Deref { pointer } => Ok(Expr::deref(self.read_with(pointer, propagate)?)),
            _ => self.instantiate_rec(object, propagate),
        }
    }

    /// Resolve an assignment target to an object path, reading its indices
    /// and dereferences.
    pub(crate) fn resolve_lhs(&mut self, lhs: &Expr) -> SymexResult<Expr> {
        match lhs {
            Expr::Symbol { .. } => Ok(lhs.clone()),
            Expr::Member { base, field } => {
                Ok(Expr::member(self.resolve_lhs(base)?, field.clone()))
            }
            Expr::Index { array, index } => {
                let array = self.resolve_lhs(array)?;
                let index = self.read(index)?;
                match array.ty() {
                    Type::Array { size: None, .. } => {
                        self.index_set_mut(&array)?.record_write(index.clone());
                    }
                    _ if index.as_int().is_none() => {
                        return Err(SymexError::UnsupportedLhs { lhs: lhs.clone() });
                    }
                    _ => {}
                }
                Ok(Expr::index(array, index))
            }
            Expr::Deref { pointer } => {
                let value = self.read(pointer)?;
                match self.points_to.resolve(&value, true).as_slice() {
                    [object] => self.resolve_lhs(object),
                    _ => Err(SymexError::UnsupportedLhs { lhs: lhs.clone() }),
                }
            }
            _ => Err(SymexError::UnsupportedLhs { lhs: lhs.clone() }),
        }
    }
}
