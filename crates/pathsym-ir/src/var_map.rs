//! The variable map: storage slots and SSA counters for program variables.
//!
//! Every scalar component of a program variable (`s.f`, `a[2]`) gets its own
//! entry, keyed by its full identifier. Entries are numbered separately for
//! shared and non-shared storage so that each class indexes a dense vector.
//! The map is shared by every state of one analysis run and may be grown
//! concurrently by a parallel search driver.

use crate::error::{ProgramError, ProgramResult};
use crate::expr::{Expr, Type};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Storage class of a variable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarKind {
    /// Visible to all threads.
    #[default]
    Shared,
    /// One copy per thread.
    ThreadLocal,
    /// Function parameters and locals; saved and restored around calls.
    ProcedureLocal,
}

/// Descriptor of one variable component.
#[derive(Debug)]
pub struct VarInfo {
    pub kind: VarKind,
    /// Base identifier plus suffix, e.g. `s.f` or `a[2]`.
    pub full_identifier: String,
    /// The program variable this component belongs to.
    pub symbol: String,
    /// Member/index path below the program variable.
    pub suffix: String,
    pub ty: Type,
    /// Slot within the storage class.
    pub number: usize,
    ssa_counter: AtomicUsize,
}

impl VarInfo {
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.kind == VarKind::Shared
    }

    pub fn ssa_counter(&self) -> usize {
        self.ssa_counter.load(Ordering::Relaxed)
    }

    /// Allocate a fresh SSA version and return it.
    pub fn increment_ssa_counter(&self) -> usize {
        self.ssa_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The SSA name of the current version, `<full identifier>#<counter>`.
    pub fn ssa_identifier(&self) -> String {
        format!("{}#{}", self.full_identifier, self.ssa_counter())
    }

    pub fn ssa_symbol(&self) -> Expr {
        Expr::symbol(self.ssa_identifier(), self.ty.clone())
    }
}

/// Thread-safe map from variable components to their descriptors.
#[derive(Debug, Default)]
pub struct VarMap {
    /// Storage class of each declared program variable.
    decls: DashMap<String, VarKind>,
    id_map: DashMap<String, Arc<VarInfo>>,
    shared_count: AtomicUsize,
    local_count: AtomicUsize,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a program variable and its storage class.
    pub fn declare(&self, symbol: impl Into<String>, kind: VarKind) {
        self.decls.insert(symbol.into(), kind);
    }

    pub fn kind_of(&self, symbol: &str) -> Option<VarKind> {
        self.decls.get(symbol).map(|k| *k)
    }

    /// Get (creating on first use) the descriptor of `symbol` + `suffix`.
    pub fn get(&self, symbol: &str, suffix: &str, ty: &Type) -> ProgramResult<Arc<VarInfo>> {
        let full_identifier = format!("{}{}", symbol, suffix);
        if let Some(info) = self.id_map.get(&full_identifier) {
            return Ok(Arc::clone(&info));
        }

        let kind = self
            .kind_of(symbol)
            .ok_or_else(|| ProgramError::UnknownVariable {
                name: symbol.to_string(),
            })?;

        let info = self
            .id_map
            .entry(full_identifier.clone())
            .or_insert_with(|| {
                let counter = if kind == VarKind::Shared {
                    &self.shared_count
                } else {
                    &self.local_count
                };
                let number = counter.fetch_add(1, Ordering::Relaxed);
                trace!(identifier = %full_identifier, number, ?kind, "new variable slot");
                Arc::new(VarInfo {
                    kind,
                    full_identifier: full_identifier.clone(),
                    symbol: symbol.to_string(),
                    suffix: suffix.to_string(),
                    ty: ty.clone(),
                    number,
                    ssa_counter: AtomicUsize::new(0),
                })
            })
            .clone();
        Ok(info)
    }

    /// Look up an existing component without creating it.
    pub fn lookup(&self, full_identifier: &str) -> Option<Arc<VarInfo>> {
        self.id_map.get(full_identifier).map(|info| Arc::clone(&info))
    }

    /// Number of components in shared storage.
    pub fn shared_count(&self) -> usize {
        self.shared_count.load(Ordering::Relaxed)
    }

    /// Number of components in thread-local and procedure-local storage.
    pub fn local_count(&self) -> usize {
        self.local_count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering_per_storage_class() {
        let map = VarMap::new();
        map.declare("g", VarKind::Shared);
        map.declare("t", VarKind::ThreadLocal);
        map.declare("l", VarKind::ProcedureLocal);

        let g = map.get("g", "", &Type::Int).unwrap();
        let t = map.get("t", "", &Type::Int).unwrap();
        let l = map.get("l", "", &Type::Int).unwrap();
        let g_again = map.get("g", "", &Type::Int).unwrap();

        assert_eq!(g.number, 0);
        assert_eq!(t.number, 0);
        assert_eq!(l.number, 1);
        assert!(Arc::ptr_eq(&g, &g_again));
        assert!(g.is_shared());
        assert!(!t.is_shared());
        assert_eq!(map.shared_count(), 1);
        assert_eq!(map.local_count(), 2);
    }

    #[test]
    fn test_components_inherit_storage_class() {
        let map = VarMap::new();
        map.declare("s", VarKind::ThreadLocal);
        let f = map.get("s", ".f", &Type::Bool).unwrap();
        assert_eq!(f.full_identifier, "s.f");
        assert_eq!(f.kind, VarKind::ThreadLocal);
        assert_eq!(f.ty, Type::Bool);
    }

    #[test]
    fn test_ssa_identifiers() {
        let map = VarMap::new();
        map.declare("x", VarKind::Shared);
        let x = map.get("x", "", &Type::Int).unwrap();
        assert_eq!(x.ssa_identifier(), "x#0");
        assert_eq!(x.increment_ssa_counter(), 1);
        assert_eq!(x.ssa_symbol(), Expr::symbol("x#1", Type::Int));
    }

    #[test]
    fn test_unknown_variable() {
        let map = VarMap::new();
        assert!(matches!(
            map.get("nope", "", &Type::Int),
            Err(ProgramError::UnknownVariable { .. })
        ));
    }
}
